//! Which job ids a worker is responsible for, as encoded on its command
//! line.

use gridpool_core::job::JobId;

/// Job-id assignment modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Explicit id list (`C` mode): the scheduler task was handed its ids
    /// literally.
    Explicit(Vec<JobId>),
    /// Array task (`A` mode): the task derives its id range from the array
    /// index, the group size, and the total job count.
    Array {
        /// Array index of this task.
        index: u64,
        /// Jobs per task.
        groupsize: u64,
        /// Total number of registered jobs.
        total: u64,
    },
}

impl Assignment {
    /// The ids this worker will execute, in order.
    pub fn job_ids(&self) -> Vec<JobId> {
        match self {
            Assignment::Explicit(ids) => ids.clone(),
            Assignment::Array {
                index,
                groupsize,
                total,
            } => {
                let start = (index * groupsize).min(*total);
                let end = ((index + 1) * groupsize).min(*total);
                (start..end).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ids_pass_through() {
        let assignment = Assignment::Explicit(vec![3, 1, 8]);
        assert_eq!(assignment.job_ids(), vec![3, 1, 8]);
    }

    #[test]
    fn array_slices_are_clipped_to_the_total() {
        let ids = |index| {
            Assignment::Array {
                index,
                groupsize: 4,
                total: 10,
            }
            .job_ids()
        };
        assert_eq!(ids(0), vec![0, 1, 2, 3]);
        assert_eq!(ids(1), vec![4, 5, 6, 7]);
        assert_eq!(ids(2), vec![8, 9]);
        assert_eq!(ids(3), Vec::<JobId>::new());
    }

    #[test]
    fn array_covers_every_id_exactly_once() {
        let total = 23u64;
        let groupsize = 5u64;
        let ngroups = total.div_ceil(groupsize);
        let mut seen = Vec::new();
        for index in 0..ngroups {
            seen.extend(
                Assignment::Array {
                    index,
                    groupsize,
                    total,
                }
                .job_ids(),
            );
        }
        assert_eq!(seen, (0..total).collect::<Vec<_>>());
    }
}
