//! Aggregate progress derivation for polling clients.

use serde::Serialize;

use crate::store::models::BatchJob;

/// Point-in-time aggregate counts for a job.
///
/// Derived from the job header on every read; nothing is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ProgressSnapshot {
    pub(crate) total: i32,
    pub(crate) completed: i32,
    pub(crate) failed: i32,
    pub(crate) percentage: i32,
}

impl ProgressSnapshot {
    pub(crate) fn derive(job: &BatchJob) -> Self {
        let processed = job.completed_count + job.failed_count;
        let percentage = if job.target_count > 0 {
            #[allow(clippy::cast_possible_truncation)]
            {
                (f64::from(processed) * 100.0 / f64::from(job.target_count)).round() as i32
            }
        } else {
            0
        };

        Self {
            total: job.target_count,
            completed: job.completed_count,
            failed: job.failed_count,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::store::models::JobStatus;

    fn job(target: i32, completed: i32, failed: i32) -> BatchJob {
        BatchJob {
            id: Uuid::new_v4(),
            channel_id: "UC123".to_string(),
            channel_name: "Example Channel".to_string(),
            requested_count: target,
            target_count: target,
            completed_count: completed,
            failed_count: failed,
            status: JobStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn percentage_counts_failures_as_processed() {
        let snapshot = ProgressSnapshot::derive(&job(4, 1, 1));
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.percentage, 50);
    }

    #[test]
    fn percentage_rounds_to_nearest() {
        assert_eq!(ProgressSnapshot::derive(&job(3, 1, 0)).percentage, 33);
        assert_eq!(ProgressSnapshot::derive(&job(3, 2, 0)).percentage, 67);
        assert_eq!(ProgressSnapshot::derive(&job(3, 3, 0)).percentage, 100);
    }

    #[test]
    fn zero_target_yields_zero_percentage() {
        assert_eq!(ProgressSnapshot::derive(&job(0, 0, 0)).percentage, 0);
    }
}
