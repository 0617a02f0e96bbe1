//! HTTP client for the broker, shared by workers and the orchestrator.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::job::{JobId, Outcome, ResultRecord};
use crate::wire::{
    ApiErrorBody, CounterSnapshot, DrainRequest, FetchResponse, FinishMode, FinishedRequest,
    FinishedResponse, RegisterRequest, RegisterResponse, ResultEntry, ResultsResponse,
    StatusSnapshot, StoredCountResponse, SubmitRequest, SubmitResponse, TaskDescriptor,
};

/// Stable error codes carried in [`ApiErrorBody`].
pub mod codes {
    /// `fetch` on a job that already left `Waiting`.
    pub const ALREADY_FETCHED: &str = "already_fetched";
    /// `submit_result` on a job that is not `Running`.
    pub const NOT_RUNNING: &str = "not_running";
    /// Job id out of range.
    pub const UNKNOWN_JOB: &str = "unknown_job";
}

/// Why a broker call failed.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker answered with an error body.
    #[error("broker refused ({code}): {message}")]
    Api {
        /// HTTP status.
        status: StatusCode,
        /// Stable code from [`codes`].
        code: String,
        /// Human description.
        message: String,
    },
    /// The broker could not be reached or the response was malformed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl BrokerError {
    /// Whether this is a per-job protocol violation the worker should
    /// report as the job's outcome instead of dying.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            BrokerError::Api { code, .. }
                if code == codes::ALREADY_FETCHED
                    || code == codes::NOT_RUNNING
                    || code == codes::UNKNOWN_JOB
        )
    }
}

/// Client for one broker endpoint.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base: String,
}

impl BrokerClient {
    /// Build a client for `base`, e.g. `http://10.0.0.7:41273`.
    pub fn connect(base: impl Into<String>) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    /// The task descriptor (kind, workdir, nqueue).
    pub async fn task(&self) -> Result<TaskDescriptor, BrokerError> {
        self.get_json("/api/task").await
    }

    /// Register one job; returns its dense id. Orchestrator-only.
    pub async fn register(&self, args: &Value) -> Result<JobId, BrokerError> {
        let res: RegisterResponse = self
            .post_json("/api/jobs", &RegisterRequest { args: args.clone() })
            .await?;
        Ok(res.id)
    }

    /// Fetch the arguments of `id`, transitioning it to `Running`.
    pub async fn fetch(&self, id: JobId) -> Result<Value, BrokerError> {
        let res: FetchResponse = self
            .post_json(&format!("/api/jobs/{id}/fetch"), &serde_json::json!({}))
            .await?;
        Ok(res.args)
    }

    /// Submit the outcome of `id`. Returns false if the registry is
    /// stopping and dropped the result.
    pub async fn submit(
        &self,
        id: JobId,
        outcome: Outcome,
        elapsed_ms: u64,
    ) -> Result<bool, BrokerError> {
        let res: SubmitResponse = self
            .post_json(
                &format!("/api/jobs/{id}/result"),
                &SubmitRequest { outcome, elapsed_ms },
            )
            .await?;
        Ok(res.accepted)
    }

    /// Dequeue one result, waiting up to `wait` for one to arrive.
    pub async fn drain(&self, wait: Duration) -> Result<Option<ResultRecord>, BrokerError> {
        let body = DrainRequest {
            wait_ms: wait.as_millis() as u64,
        };
        let res = self
            .http
            .post(self.url("/api/results/next"))
            .json(&body)
            .send()
            .await?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let res = Self::check(res).await?;
        Ok(Some(res.json().await?))
    }

    /// Number of results currently `Stored`.
    pub async fn stored_count(&self) -> Result<usize, BrokerError> {
        let res: StoredCountResponse = self.get_json("/api/stored").await?;
        Ok(res.stored)
    }

    /// Per-state counts, summary string and done count.
    pub async fn status(&self) -> Result<StatusSnapshot, BrokerError> {
        self.get_json("/api/status").await
    }

    /// Whether every job reached `Done` under the given completion rule.
    pub async fn finished(&self, mode: FinishMode) -> Result<bool, BrokerError> {
        let res: FinishedResponse = self
            .post_json("/api/finished", &FinishedRequest { mode })
            .await?;
        Ok(res.finished)
    }

    /// The id-ordered result vector materialized by map-mode `finished`.
    pub async fn results(&self) -> Result<Vec<ResultEntry>, BrokerError> {
        let res: ResultsResponse = self.get_json("/api/results").await?;
        Ok(res.results)
    }

    /// Mark the registry stopping; returns once no transition is in flight.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let res = self
            .http
            .post(self.url("/api/stop"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// Result-signature counter snapshot.
    pub async fn counter(&self) -> Result<CounterSnapshot, BrokerError> {
        self.get_json("/api/counter").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BrokerError> {
        let res = self.http.get(self.url(path)).send().await?;
        let res = Self::check(res).await?;
        Ok(res.json().await?)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let res = self.http.post(self.url(path)).json(body).send().await?;
        let res = Self::check(res).await?;
        Ok(res.json().await?)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, BrokerError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
            return Err(BrokerError::Api {
                status,
                code: err.code,
                message: err.message,
            });
        }
        Err(BrokerError::Api {
            status,
            code: "http_error".to_string(),
            message: body,
        })
    }
}
