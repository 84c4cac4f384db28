use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::models::{
    Analysis, AnalysisId, AnalysisStatus, BatchJob, BatchTask, JobStatus, NewAnalysis, NewBatchJob,
    NewBatchTask, TaskId, TaskStatus,
};

/// Data access for batch jobs, their tasks, and analysis artifacts.
///
/// All mutations that the pipeline relies on for correctness are single
/// statements: task claiming uses `FOR UPDATE SKIP LOCKED`, terminal
/// transitions are guarded on the previous status, and job counters are
/// incremented in SQL rather than read-modify-written in application code.
#[derive(Debug, Clone)]
pub(crate) struct BatchDao {
    pool: PgPool,
}

impl BatchDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 接続性チェック（readinessプローブ用）。
    pub(crate) async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    /// 既に解析済みの動画IDを一括で問い合わせる。
    pub(crate) async fn existing_video_ids(&self, video_ids: &[String]) -> Result<HashSet<String>> {
        if video_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query("SELECT video_id FROM analyses WHERE video_id = ANY($1)")
            .bind(video_ids)
            .fetch_all(&self.pool)
            .await
            .context("failed to query existing analyses")?;

        let mut existing = HashSet::with_capacity(rows.len());
        for row in rows {
            let video_id: String = row.try_get("video_id").context("failed to get video_id")?;
            existing.insert(video_id);
        }
        Ok(existing)
    }

    /// Create a job header and its full task set in one transaction.
    ///
    /// `target_count` is set to the number of tasks actually created, so the
    /// counter invariant (`completed + failed <= target`) can reach equality
    /// even on a discovery shortfall.
    pub(crate) async fn create_job_with_tasks(
        &self,
        job: &NewBatchJob,
        tasks: &[NewBatchTask],
    ) -> Result<Uuid> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        sqlx::query(
            r"
            INSERT INTO batch_jobs
                (id, channel_id, channel_name, requested_count, target_count,
                 completed_count, failed_count, status)
            VALUES ($1, $2, $3, $4, $5, 0, 0, 'running')
            ",
        )
        .bind(job.id)
        .bind(&job.channel_id)
        .bind(&job.channel_name)
        .bind(job.requested_count)
        .bind(i32::try_from(tasks.len()).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await
        .context("failed to insert batch job")?;

        for task in tasks {
            sqlx::query(
                r"
                INSERT INTO batch_tasks (job_id, video_id, title, source_url, status)
                VALUES ($1, $2, $3, $4, 'pending')
                ",
            )
            .bind(job.id)
            .bind(&task.video_id)
            .bind(&task.title)
            .bind(&task.source_url)
            .execute(&mut *tx)
            .await
            .context("failed to insert batch task")?;
        }

        tx.commit().await.context("failed to commit batch job")?;

        Ok(job.id)
    }

    pub(crate) async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        let row = sqlx::query(
            r"
            SELECT id, channel_id, channel_name, requested_count, target_count,
                   completed_count, failed_count, status, created_at, completed_at
            FROM batch_jobs
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get batch job")?;

        row.map(Self::row_to_job).transpose()
    }

    pub(crate) async fn get_tasks_by_job(&self, job_id: Uuid) -> Result<Vec<BatchTask>> {
        let rows = sqlx::query(
            r"
            SELECT id, job_id, video_id, title, source_url, status, current_step,
                   analysis_id, error_message, created_at, started_at, finished_at
            FROM batch_tasks
            WHERE job_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to get tasks by job")?;

        rows.into_iter().map(Self::row_to_task).collect()
    }

    /// 一定時間進捗のないprocessingタスクをpendingへ戻す。
    ///
    /// 実行コンテキストがクールダウン中に失われたタスクの再請求経路。
    pub(crate) async fn release_stale_tasks(
        &self,
        job_id: Uuid,
        older_than: Duration,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE batch_tasks
            SET status = 'pending',
                current_step = NULL,
                started_at = NULL
            WHERE job_id = $1
              AND status = 'processing'
              AND started_at < NOW() - make_interval(secs => $2)
            ",
        )
        .bind(job_id)
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("failed to release stale tasks")?;

        Ok(result.rows_affected())
    }

    /// Claim the oldest pending task of a job.
    ///
    /// Single conditional update guarded by `FOR UPDATE SKIP LOCKED`, so
    /// concurrent advance invocations never double-claim a row.
    pub(crate) async fn claim_next_task(&self, job_id: Uuid) -> Result<Option<BatchTask>> {
        let row = sqlx::query(
            r"
            UPDATE batch_tasks
            SET status = 'processing',
                started_at = NOW(),
                current_step = 'extracting'
            WHERE id = (
                SELECT id
                FROM batch_tasks
                WHERE job_id = $1 AND status = 'pending'
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_id, video_id, title, source_url, status, current_step,
                      analysis_id, error_message, created_at, started_at, finished_at
            ",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim next task")?;

        row.map(Self::row_to_task).transpose()
    }

    /// 進行中タスクの表示用ステップラベルを更新する。
    pub(crate) async fn set_task_step(&self, task_id: TaskId, step: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE batch_tasks
            SET current_step = $2
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .bind(step)
        .execute(&self.pool)
        .await
        .context("failed to update task step")?;

        Ok(())
    }

    pub(crate) async fn link_analysis(&self, task_id: TaskId, analysis_id: AnalysisId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE batch_tasks
            SET analysis_id = $2
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .bind(analysis_id)
        .execute(&self.pool)
        .await
        .context("failed to link analysis to task")?;

        Ok(())
    }

    /// Mark a task completed and bump the job's completed counter in one
    /// transaction.
    ///
    /// The task write is guarded on `processing`, so a terminal task is never
    /// rewritten and the counter is incremented exactly once per task even if
    /// a stale-reclaimed duplicate invocation races this one. Returns whether
    /// this call performed the transition.
    pub(crate) async fn mark_task_completed(&self, task_id: TaskId, job_id: Uuid) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        let updated = sqlx::query(
            r"
            UPDATE batch_tasks
            SET status = 'completed',
                current_step = 'completed',
                finished_at = NOW()
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark task as completed")?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("failed to rollback transaction")?;
            return Ok(false);
        }

        sqlx::query("UPDATE batch_jobs SET completed_count = completed_count + 1 WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("failed to increment completed count")?;

        tx.commit()
            .await
            .context("failed to commit task completion")?;
        Ok(true)
    }

    /// Mark a task failed with a human-readable message and bump the job's
    /// failed counter in one transaction. Same guard semantics as
    /// [`Self::mark_task_completed`].
    pub(crate) async fn mark_task_failed(
        &self,
        task_id: TaskId,
        job_id: Uuid,
        error: &str,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        let updated = sqlx::query(
            r"
            UPDATE batch_tasks
            SET status = 'failed',
                current_step = 'failed',
                error_message = $2,
                finished_at = NOW()
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .context("failed to mark task as failed")?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("failed to rollback transaction")?;
            return Ok(false);
        }

        sqlx::query("UPDATE batch_jobs SET failed_count = failed_count + 1 WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("failed to increment failed count")?;

        tx.commit().await.context("failed to commit task failure")?;
        Ok(true)
    }

    /// Flip the job to `completed` once every task reached a terminal state.
    ///
    /// Guarded conditional update; returns whether this call performed the
    /// transition.
    pub(crate) async fn finalize_job_if_done(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE batch_jobs
            SET status = 'completed',
                completed_at = NOW()
            WHERE id = $1
              AND status = 'running'
              AND completed_count + failed_count >= target_count
            ",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("failed to finalize job")?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a freshly extracted transcript as a `transcript_only` artifact.
    ///
    /// Upserts on `video_id` so a stale-reclaimed task replaying its
    /// extraction refreshes the existing row instead of violating the key.
    pub(crate) async fn insert_transcript(&self, analysis: &NewAnalysis) -> Result<AnalysisId> {
        let row = sqlx::query(
            r"
            INSERT INTO analyses
                (video_id, url, title, transcript, status, channel_id, channel_name, source)
            VALUES ($1, $2, $3, $4, 'transcript_only', $5, $6, 'batch')
            ON CONFLICT (video_id) DO UPDATE
            SET transcript = EXCLUDED.transcript,
                url = EXCLUDED.url,
                title = EXCLUDED.title
            RETURNING id
            ",
        )
        .bind(&analysis.video_id)
        .bind(&analysis.url)
        .bind(&analysis.title)
        .bind(&analysis.transcript)
        .bind(&analysis.channel_id)
        .bind(&analysis.channel_name)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert transcript analysis")?;

        let id: AnalysisId = row.try_get("id").context("failed to get analysis id")?;
        Ok(id)
    }

    /// Attach the summary and mark the artifact complete.
    pub(crate) async fn attach_summary(&self, analysis_id: AnalysisId, summary: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE analyses
            SET summary = $2,
                status = 'completed'
            WHERE id = $1
            ",
        )
        .bind(analysis_id)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("failed to attach summary")?;

        Ok(())
    }

    pub(crate) async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<Option<Analysis>> {
        let row = sqlx::query(
            r"
            SELECT id, video_id, url, title, transcript, summary, status,
                   channel_id, channel_name, source, created_at
            FROM analyses
            WHERE id = $1
            ",
        )
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get analysis")?;

        row.map(Self::row_to_analysis).transpose()
    }

    /// 直近の解析結果を新しい順で返す。
    pub(crate) async fn recent_analyses(&self, limit: i64) -> Result<Vec<Analysis>> {
        let rows = sqlx::query(
            r"
            SELECT id, video_id, url, title, transcript, summary, status,
                   channel_id, channel_name, source, created_at
            FROM analyses
            ORDER BY created_at DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list recent analyses")?;

        rows.into_iter().map(Self::row_to_analysis).collect()
    }

    fn row_to_job(row: PgRow) -> Result<BatchJob> {
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let status = JobStatus::from_str(&status_str)
            .with_context(|| format!("invalid job status: {status_str}"))?;

        Ok(BatchJob {
            id: row.try_get("id").context("failed to get id")?,
            channel_id: row
                .try_get("channel_id")
                .context("failed to get channel_id")?,
            channel_name: row
                .try_get("channel_name")
                .context("failed to get channel_name")?,
            requested_count: row
                .try_get("requested_count")
                .context("failed to get requested_count")?,
            target_count: row
                .try_get("target_count")
                .context("failed to get target_count")?,
            completed_count: row
                .try_get("completed_count")
                .context("failed to get completed_count")?,
            failed_count: row
                .try_get("failed_count")
                .context("failed to get failed_count")?,
            status,
            created_at: row
                .try_get("created_at")
                .context("failed to get created_at")?,
            completed_at: row.try_get("completed_at").ok(),
        })
    }

    fn row_to_task(row: PgRow) -> Result<BatchTask> {
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let status = TaskStatus::from_str(&status_str)
            .with_context(|| format!("invalid task status: {status_str}"))?;

        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .context("failed to get created_at")?;

        Ok(BatchTask {
            id: row.try_get("id").context("failed to get id")?,
            job_id: row.try_get("job_id").context("failed to get job_id")?,
            video_id: row.try_get("video_id").context("failed to get video_id")?,
            title: row.try_get("title").context("failed to get title")?,
            source_url: row
                .try_get("source_url")
                .context("failed to get source_url")?,
            status,
            current_step: row.try_get("current_step").ok().flatten(),
            analysis_id: row.try_get("analysis_id").ok().flatten(),
            error_message: row.try_get("error_message").ok().flatten(),
            created_at,
            started_at: row.try_get("started_at").ok(),
            finished_at: row.try_get("finished_at").ok(),
        })
    }

    fn row_to_analysis(row: PgRow) -> Result<Analysis> {
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let status = AnalysisStatus::from_str(&status_str)
            .with_context(|| format!("invalid analysis status: {status_str}"))?;

        Ok(Analysis {
            id: row.try_get("id").context("failed to get id")?,
            video_id: row.try_get("video_id").context("failed to get video_id")?,
            url: row.try_get("url").context("failed to get url")?,
            title: row.try_get("title").ok().flatten(),
            transcript: row
                .try_get("transcript")
                .context("failed to get transcript")?,
            summary: row.try_get("summary").ok().flatten(),
            status,
            channel_id: row.try_get("channel_id").ok().flatten(),
            channel_name: row.try_get("channel_name").ok().flatten(),
            source: row.try_get("source").context("failed to get source")?,
            created_at: row
                .try_get("created_at")
                .context("failed to get created_at")?,
        })
    }
}
