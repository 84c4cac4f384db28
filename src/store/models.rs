use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Running,
    Completed,
}

impl JobStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            _ => None,
        }
    }
}

/// Status of a per-video task within a job.
///
/// Transitions are monotonic: `pending -> processing -> completed | failed`.
/// Terminal states never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Stage completeness of a persisted analysis artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AnalysisStatus {
    TranscriptOnly,
    Completed,
}

impl AnalysisStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::TranscriptOnly => "transcript_only",
            AnalysisStatus::Completed => "completed",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "transcript_only" => Some(AnalysisStatus::TranscriptOnly),
            "completed" => Some(AnalysisStatus::Completed),
            _ => None,
        }
    }
}

/// One batch analysis run over a set of discovered videos.
#[derive(Debug, Clone)]
pub(crate) struct BatchJob {
    pub(crate) id: Uuid,
    pub(crate) channel_id: String,
    pub(crate) channel_name: String,
    /// How many videos the caller asked for.
    pub(crate) requested_count: i32,
    /// How many tasks were actually created; the counter invariant binds here.
    pub(crate) target_count: i32,
    pub(crate) completed_count: i32,
    pub(crate) failed_count: i32,
    pub(crate) status: JobStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

/// Task row id (database primary key).
pub(crate) type TaskId = i64;

/// Analysis row id (database primary key).
pub(crate) type AnalysisId = i64;

/// The per-video unit of work within a job.
#[derive(Debug, Clone)]
pub(crate) struct BatchTask {
    pub(crate) id: TaskId,
    pub(crate) job_id: Uuid,
    pub(crate) video_id: String,
    pub(crate) title: String,
    pub(crate) source_url: String,
    pub(crate) status: TaskStatus,
    pub(crate) current_step: Option<String>,
    pub(crate) analysis_id: Option<AnalysisId>,
    pub(crate) error_message: Option<String>,
    #[allow(dead_code)]
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

/// A task to be created alongside its job.
#[derive(Debug, Clone)]
pub(crate) struct NewBatchTask {
    pub(crate) video_id: String,
    pub(crate) title: String,
    pub(crate) source_url: String,
}

/// A new job header to be created atomically with its tasks.
#[derive(Debug, Clone)]
pub(crate) struct NewBatchJob {
    pub(crate) id: Uuid,
    pub(crate) channel_id: String,
    pub(crate) channel_name: String,
    pub(crate) requested_count: i32,
}

/// The persisted transcript/summary artifact for one video.
///
/// Keyed by `video_id`; outlives any job that produced it.
#[derive(Debug, Clone)]
pub(crate) struct Analysis {
    pub(crate) id: AnalysisId,
    pub(crate) video_id: String,
    pub(crate) url: String,
    pub(crate) title: Option<String>,
    pub(crate) transcript: String,
    pub(crate) summary: Option<String>,
    pub(crate) status: AnalysisStatus,
    pub(crate) channel_id: Option<String>,
    pub(crate) channel_name: Option<String>,
    pub(crate) source: String,
    pub(crate) created_at: DateTime<Utc>,
}

/// Fields for a freshly extracted transcript artifact.
#[derive(Debug, Clone)]
pub(crate) struct NewAnalysis {
    pub(crate) video_id: String,
    pub(crate) url: String,
    pub(crate) title: Option<String>,
    pub(crate) transcript: String,
    pub(crate) channel_id: Option<String>,
    pub(crate) channel_name: Option<String>,
}
