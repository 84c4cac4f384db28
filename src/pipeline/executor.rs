//! Per-task stage pipeline: extraction, cooldown, summarization.
//!
//! Each `advance` invocation claims at most one pending task and drives it to
//! a terminal state before returning, so the executor is safely re-triggerable
//! from stateless request handlers. Suspension points (cooldown, retry
//! backoff) block only the current invocation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::{CaptionClient, GeminiClient};
use crate::observability::metrics::Metrics;
use crate::store::dao::BatchDao;
use crate::store::models::{AnalysisId, BatchJob, BatchTask, NewAnalysis, TaskId};
use crate::util::retry::{CallError, RetryPolicy};

/// Result of one `advance` invocation.
#[derive(Debug)]
pub(crate) enum AdvanceOutcome {
    /// No claimable task remained.
    Drained,
    /// One task was driven to a terminal state.
    Processed(ProcessedTask),
}

#[derive(Debug)]
pub(crate) struct ProcessedTask {
    pub(crate) task_id: TaskId,
    pub(crate) video_id: String,
    pub(crate) title: String,
    pub(crate) source_url: String,
    pub(crate) outcome: TaskOutcome,
}

#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Completed { analysis_id: AnalysisId },
    Failed { error: String },
}

/// Internal stage failure split: an upstream failure consumes the task
/// (terminal `failed`), a storage failure propagates to the caller with the
/// task left `processing` for the staleness reclaim to recover.
enum StageError {
    Upstream(String),
    Storage(anyhow::Error),
}

pub(crate) struct PipelineExecutor {
    dao: Arc<BatchDao>,
    captions: Arc<CaptionClient>,
    gemini: Arc<GeminiClient>,
    retry_policy: RetryPolicy,
    stage_cooldown: Duration,
    task_stale_after: Duration,
    metrics: Arc<Metrics>,
}

impl PipelineExecutor {
    pub(crate) fn new(
        dao: Arc<BatchDao>,
        captions: Arc<CaptionClient>,
        gemini: Arc<GeminiClient>,
        retry_policy: RetryPolicy,
        stage_cooldown: Duration,
        task_stale_after: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dao,
            captions,
            gemini,
            retry_policy,
            stage_cooldown,
            task_stale_after,
            metrics,
        }
    }

    /// Drive at most one pending task of the job to a terminal state.
    ///
    /// Claims the lowest-id pending task with a single conditional update, so
    /// concurrent invocations cannot double-claim. Stale `processing` tasks
    /// left behind by a killed invocation are released back to `pending`
    /// first.
    ///
    /// # Errors
    /// Returns an error only for storage failures; an upstream failure is
    /// absorbed into the task's terminal `failed` state.
    pub(crate) async fn advance(&self, job_id: Uuid) -> Result<AdvanceOutcome> {
        let reclaimed = self
            .dao
            .release_stale_tasks(job_id, self.task_stale_after)
            .await?;
        if reclaimed > 0 {
            warn!(%job_id, reclaimed, "released stale processing tasks back to pending");
            #[allow(clippy::cast_precision_loss)]
            self.metrics.tasks_reclaimed.inc_by(reclaimed as f64);
        }

        let Some(task) = self.dao.claim_next_task(job_id).await? else {
            return Ok(AdvanceOutcome::Drained);
        };

        let job = self
            .dao
            .get_job(job_id)
            .await?
            .context("job disappeared while a task was claimed")?;

        info!(
            %job_id,
            task_id = task.id,
            video_id = %task.video_id,
            "processing batch task"
        );
        let started = Instant::now();

        let outcome = match self.run_stages(&job, &task).await {
            Ok(analysis_id) => {
                if self.dao.mark_task_completed(task.id, job_id).await? {
                    self.metrics.tasks_completed.inc();
                    info!(%job_id, task_id = task.id, analysis_id, "batch task completed");
                } else {
                    // A stale-reclaimed duplicate invocation settled the task
                    // first; its terminal write wins.
                    warn!(%job_id, task_id = task.id, "task already settled by another invocation");
                }
                TaskOutcome::Completed { analysis_id }
            }
            Err(StageError::Upstream(message)) => {
                if self.dao.mark_task_failed(task.id, job_id, &message).await? {
                    self.metrics.tasks_failed.inc();
                    error!(%job_id, task_id = task.id, error = %message, "batch task failed");
                } else {
                    warn!(%job_id, task_id = task.id, "task already settled by another invocation");
                }
                TaskOutcome::Failed { error: message }
            }
            Err(StageError::Storage(error)) => {
                // The claimed task stays `processing`; the staleness reclaim
                // returns it to `pending` once the threshold passes.
                return Err(error.context("storage failure while processing task"));
            }
        };

        self.metrics
            .task_duration
            .observe(started.elapsed().as_secs_f64());
        self.finalize_job(job_id).await?;

        Ok(AdvanceOutcome::Processed(ProcessedTask {
            task_id: task.id,
            video_id: task.video_id,
            title: task.title,
            source_url: task.source_url,
            outcome,
        }))
    }

    /// Run extraction, cooldown, and summarization for one claimed task.
    async fn run_stages(&self, job: &BatchJob, task: &BatchTask) -> Result<AnalysisId, StageError> {
        let extraction_started = Instant::now();
        let transcript = self.extract_transcript(task).await?;
        self.metrics
            .extraction_duration
            .observe(extraction_started.elapsed().as_secs_f64());

        let analysis_id = self
            .dao
            .insert_transcript(&NewAnalysis {
                video_id: task.video_id.clone(),
                url: task.source_url.clone(),
                title: Some(task.title.clone()),
                transcript: transcript.clone(),
                channel_id: Some(job.channel_id.clone()),
                channel_name: Some(job.channel_name.clone()),
            })
            .await
            .map_err(StageError::Storage)?;
        self.dao
            .link_analysis(task.id, analysis_id)
            .await
            .map_err(StageError::Storage)?;

        // The extraction and summarization calls share one provider quota;
        // the fixed inter-stage delay is the rate-limit-avoidance mechanism.
        self.dao
            .set_task_step(task.id, "cooldown")
            .await
            .map_err(StageError::Storage)?;
        sleep(self.stage_cooldown).await;

        self.dao
            .set_task_step(task.id, "summarizing")
            .await
            .map_err(StageError::Storage)?;
        let summary_started = Instant::now();
        let summary = self
            .retry_policy
            .run("summary generation", || {
                let gemini = Arc::clone(&self.gemini);
                let transcript = transcript.clone();
                let title = task.title.clone();
                let metrics = Arc::clone(&self.metrics);
                async move {
                    let result = gemini.summarize(&transcript, Some(&title)).await;
                    if matches!(result, Err(CallError::Transient(_))) {
                        metrics.llm_transient_failures.inc();
                    }
                    result
                }
            })
            .await
            .map_err(|error| StageError::Upstream(format!("summary generation failed: {error}")))?;

        self.dao
            .attach_summary(analysis_id, &summary)
            .await
            .map_err(StageError::Storage)?;
        self.metrics.summaries_generated.inc();
        self.metrics
            .summary_duration
            .observe(summary_started.elapsed().as_secs_f64());

        Ok(analysis_id)
    }

    /// Stage 1: cheap direct-caption lookup first, generative fallback after.
    async fn extract_transcript(&self, task: &BatchTask) -> Result<String, StageError> {
        if let Some(transcript) = self.captions.fetch_transcript(&task.video_id).await {
            info!(
                task_id = task.id,
                video_id = %task.video_id,
                chars = transcript.len(),
                "transcript served by direct caption lookup"
            );
            self.metrics.caption_hits.inc();
            return Ok(transcript);
        }

        let transcript = self
            .retry_policy
            .run("transcript extraction", || {
                let gemini = Arc::clone(&self.gemini);
                let source_url = task.source_url.clone();
                let metrics = Arc::clone(&self.metrics);
                async move {
                    let result = gemini.extract_transcript(&source_url).await;
                    if matches!(result, Err(CallError::Transient(_))) {
                        metrics.llm_transient_failures.inc();
                    }
                    result
                }
            })
            .await
            .map_err(|error| {
                StageError::Upstream(format!("transcript extraction failed: {error}"))
            })?;

        self.metrics.llm_extractions.inc();
        Ok(transcript)
    }

    /// Terminal-transition bookkeeping: flip the job to `completed` once
    /// every task is terminal.
    async fn finalize_job(&self, job_id: Uuid) -> Result<()> {
        if self.dao.finalize_job_if_done(job_id).await? {
            info!(%job_id, "batch job completed");
            self.metrics.jobs_completed.inc();
            self.metrics.active_jobs.dec();
        }
        Ok(())
    }
}
