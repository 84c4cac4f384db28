//! Background drain loop for a freshly started batch.
//!
//! One spawned task repeatedly advances the job until no claimable task
//! remains. The advance endpoint stays available as the external trigger for
//! deployments that disable the driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::executor::{AdvanceOutcome, PipelineExecutor, TaskOutcome};

const STORAGE_ERROR_PAUSE: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_ERRORS: usize = 3;

/// Spawn a driver that advances `job_id` until the task set is drained.
pub(crate) fn spawn_batch_driver(
    executor: Arc<PipelineExecutor>,
    job_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(%job_id, "batch driver started");
        let mut consecutive_errors = 0;

        loop {
            match executor.advance(job_id).await {
                Ok(AdvanceOutcome::Drained) => break,
                Ok(AdvanceOutcome::Processed(processed)) => {
                    consecutive_errors = 0;
                    match processed.outcome {
                        TaskOutcome::Completed { analysis_id } => {
                            debug!(
                                %job_id,
                                task_id = processed.task_id,
                                analysis_id,
                                "driver advanced one task"
                            );
                        }
                        TaskOutcome::Failed { error } => {
                            debug!(
                                %job_id,
                                task_id = processed.task_id,
                                error = %error,
                                "driver advanced one task to failed"
                            );
                        }
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    error!(
                        %job_id,
                        consecutive_errors,
                        error = ?err,
                        "batch driver advance failed"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(%job_id, "batch driver giving up after repeated storage failures");
                        break;
                    }
                    sleep(STORAGE_ERROR_PAUSE).await;
                }
            }
        }

        info!(%job_id, "batch driver finished");
    })
}
