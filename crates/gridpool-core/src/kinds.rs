//! The work-kind registry.
//!
//! A *kind* is a named unit-of-work handler. The orchestrator and every
//! worker build the same registry at startup; the orchestrator picks a kind
//! by name, the worker looks the same name up in its own table and runs it.
//! Arguments and results cross the wire as JSON, so any Serialize /
//! DeserializeOwned pair works as a handler signature.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A unit-of-work handler: one JSON argument tuple in, one JSON result out.
///
/// Handlers run on blocking worker threads and may take arbitrary time.
pub trait WorkKind: Send + Sync + 'static {
    /// Execute the handler against raw JSON arguments.
    fn call(&self, args: Value) -> Result<Value, KindError>;
}

/// Why a handler invocation did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum KindError {
    /// The JSON arguments or result did not match the handler signature.
    #[error("invalid arguments: {0}")]
    BadArgs(#[from] serde_json::Error),
    /// The handler itself failed.
    #[error("{0}")]
    Failed(String),
}

struct FnKind<F>(F);

impl<F> WorkKind for FnKind<F>
where
    F: Fn(Value) -> Result<Value, KindError> + Send + Sync + 'static,
{
    fn call(&self, args: Value) -> Result<Value, KindError> {
        (self.0)(args)
    }
}

/// Named table of [`WorkKind`] handlers.
#[derive(Default, Clone)]
pub struct KindRegistry {
    kinds: BTreeMap<String, Arc<dyn WorkKind>>,
}

impl KindRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `name`.
    ///
    /// The handler's argument type is deserialized from, and its result
    /// serialized to, JSON. Errors are captured as the job's reported
    /// failure description.
    pub fn register<A, R, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let wrapped = move |raw: Value| -> Result<Value, KindError> {
            let args: A = serde_json::from_value(raw)?;
            let out = f(args).map_err(|err| KindError::Failed(format!("{err:#}")))?;
            Ok(serde_json::to_value(out)?)
        };
        self.kinds.insert(name.into(), Arc::new(FnKind(wrapped)));
        self
    }

    /// Register a raw handler under `name`.
    pub fn register_raw(&mut self, name: impl Into<String>, kind: Arc<dyn WorkKind>) -> &mut Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    /// Look a handler up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkKind>> {
        self.kinds.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ready-made handler for command fan-out: `(cwd, command)` runs `command`
/// through `sh -c` in `cwd` and reports the exit code.
pub fn shell(args: (String, String)) -> anyhow::Result<i32> {
    let (cwd, command) = args;
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&cwd)
        .status()?;
    Ok(status.code().unwrap_or(-1))
}
