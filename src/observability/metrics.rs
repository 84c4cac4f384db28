/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub videos_discovered: Counter,
    pub shorts_filtered: Counter,
    pub duplicates_filtered: Counter,
    pub caption_hits: Counter,
    pub llm_extractions: Counter,
    pub summaries_generated: Counter,
    pub llm_transient_failures: Counter,
    pub tasks_completed: Counter,
    pub tasks_failed: Counter,
    pub tasks_reclaimed: Counter,
    pub jobs_completed: Counter,

    // ヒストグラム
    pub discovery_duration: Histogram,
    pub extraction_duration: Histogram,
    pub summary_duration: Histogram,
    pub task_duration: Histogram,

    // ゲージ
    pub active_jobs: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            videos_discovered: register_counter_with_registry!(
                "digest_videos_discovered_total",
                "Total number of qualifying videos discovered",
                registry
            )?,
            shorts_filtered: register_counter_with_registry!(
                "digest_shorts_filtered_total",
                "Total number of short-form candidates dropped by the title filter",
                registry
            )?,
            duplicates_filtered: register_counter_with_registry!(
                "digest_duplicates_filtered_total",
                "Total number of candidates dropped as already analyzed",
                registry
            )?,
            caption_hits: register_counter_with_registry!(
                "digest_caption_hits_total",
                "Total number of transcripts served by the direct caption lookup",
                registry
            )?,
            llm_extractions: register_counter_with_registry!(
                "digest_llm_extractions_total",
                "Total number of transcripts produced by the generative extraction call",
                registry
            )?,
            summaries_generated: register_counter_with_registry!(
                "digest_summaries_generated_total",
                "Total number of summary reports generated",
                registry
            )?,
            llm_transient_failures: register_counter_with_registry!(
                "digest_llm_transient_failures_total",
                "Total number of transient generative API failures observed",
                registry
            )?,
            tasks_completed: register_counter_with_registry!(
                "digest_tasks_completed_total",
                "Total number of batch tasks completed",
                registry
            )?,
            tasks_failed: register_counter_with_registry!(
                "digest_tasks_failed_total",
                "Total number of batch tasks failed",
                registry
            )?,
            tasks_reclaimed: register_counter_with_registry!(
                "digest_tasks_reclaimed_total",
                "Total number of stale processing tasks returned to pending",
                registry
            )?,
            jobs_completed: register_counter_with_registry!(
                "digest_jobs_completed_total",
                "Total number of batch jobs driven to completion",
                registry
            )?,
            discovery_duration: register_histogram_with_registry!(
                "digest_discovery_duration_seconds",
                "Time spent collecting qualifying candidates for a batch",
                registry
            )?,
            extraction_duration: register_histogram_with_registry!(
                "digest_extraction_duration_seconds",
                "Time spent extracting one transcript",
                registry
            )?,
            summary_duration: register_histogram_with_registry!(
                "digest_summary_duration_seconds",
                "Time spent generating one summary report",
                registry
            )?,
            task_duration: register_histogram_with_registry!(
                "digest_task_duration_seconds",
                "End-to-end time for one task, including the cooldown",
                registry
            )?,
            active_jobs: register_gauge_with_registry!(
                "digest_active_jobs",
                "Number of batch jobs currently running",
                registry
            )?,
        })
    }
}
