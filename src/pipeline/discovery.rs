//! 重複排除とフィルタリング付きのチャンネル候補収集。
//!
//! カタログAPIをページ単位で読み、ショート動画と解析済み動画を落として
//! 目標件数に達するまで蓄積する。1ページごとの判定は純粋な状態機械
//! （`CandidateAccumulator`）として実装し、I/Oループから分離している。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::clients::catalog::{CatalogClient, VideoSummary};
use crate::observability::metrics::Metrics;
use crate::store::dao::BatchDao;

/// Title markers for short-form content, matched case-insensitively.
const SHORT_FORM_MARKERS: &[&str] = &["shorts", "short"];

/// タイトルがショート動画のマーカーを含むかどうか。
pub(crate) fn is_short_form(title: &str) -> bool {
    let lowered = title.to_lowercase();
    SHORT_FORM_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Whether the page loop should fetch another page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageVerdict {
    NeedMore,
    Done,
}

/// Pure accumulation state machine over discovery pages.
///
/// Candidates arrive in publish-date-descending order and leave in the same
/// order; the accumulator only drops (short-form, already analyzed) and
/// truncates at the target count.
#[derive(Debug)]
pub(crate) struct CandidateAccumulator {
    target: usize,
    max_pages: usize,
    pages_fetched: usize,
    shorts_dropped: usize,
    duplicates_dropped: usize,
    collected: Vec<VideoSummary>,
}

impl CandidateAccumulator {
    pub(crate) fn new(target: usize, max_pages: usize) -> Self {
        Self {
            target,
            max_pages,
            pages_fetched: 0,
            shorts_dropped: 0,
            duplicates_dropped: 0,
            collected: Vec::with_capacity(target),
        }
    }

    /// Fold one page of raw candidates into the accumulated set.
    ///
    /// `existing` is the batched existence-check result for this page's
    /// surviving candidate ids.
    pub(crate) fn absorb(
        &mut self,
        page: Vec<VideoSummary>,
        existing: &HashSet<String>,
        has_next_page: bool,
    ) -> PageVerdict {
        self.pages_fetched += 1;

        for video in page {
            if self.collected.len() >= self.target {
                break;
            }
            if is_short_form(&video.title) {
                self.shorts_dropped += 1;
                continue;
            }
            if existing.contains(&video.video_id) {
                self.duplicates_dropped += 1;
                continue;
            }
            self.collected.push(video);
        }

        if self.collected.len() >= self.target
            || !has_next_page
            || self.pages_fetched >= self.max_pages
        {
            PageVerdict::Done
        } else {
            PageVerdict::NeedMore
        }
    }

    pub(crate) fn into_report(self, requested: usize) -> DiscoveryReport {
        DiscoveryReport {
            videos: self.collected,
            requested,
            shorts_dropped: self.shorts_dropped,
            duplicates_dropped: self.duplicates_dropped,
            pages_fetched: self.pages_fetched,
        }
    }
}

/// Outcome of one discovery run.
#[derive(Debug)]
pub(crate) struct DiscoveryReport {
    pub(crate) videos: Vec<VideoSummary>,
    pub(crate) requested: usize,
    pub(crate) shorts_dropped: usize,
    pub(crate) duplicates_dropped: usize,
    pub(crate) pages_fetched: usize,
}

impl DiscoveryReport {
    pub(crate) fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.videos.len())
    }

    /// Human-readable outcome line for the start response.
    ///
    /// A shortfall is a normal outcome, never an error.
    pub(crate) fn message(&self) -> String {
        if self.videos.is_empty() {
            return "no new videos to analyze (all candidates were short-form or already analyzed)"
                .to_string();
        }

        let shortfall = self.shortfall();
        if shortfall > 0 {
            format!(
                "collected {} of {} requested videos ({} missing: {} short-form and {} already-analyzed candidates filtered)",
                self.videos.len(),
                self.requested,
                shortfall,
                self.shorts_dropped,
                self.duplicates_dropped
            )
        } else {
            format!(
                "collected all {} requested videos ({} short-form and {} already-analyzed candidates filtered)",
                self.videos.len(),
                self.shorts_dropped,
                self.duplicates_dropped
            )
        }
    }
}

/// カタログAPIと永続層を蓄積器につなぐ収集サービス。
#[derive(Clone)]
pub(crate) struct DiscoveryService {
    catalog: Arc<CatalogClient>,
    dao: Arc<BatchDao>,
    page_size: usize,
    max_pages: usize,
    metrics: Arc<Metrics>,
}

impl DiscoveryService {
    pub(crate) fn new(
        catalog: Arc<CatalogClient>,
        dao: Arc<BatchDao>,
        page_size: usize,
        max_pages: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            catalog,
            dao,
            page_size,
            max_pages,
            metrics,
        }
    }

    /// Collect up to `target` qualifying new videos for a channel.
    ///
    /// Pages until the target is reached, the catalog reports no further
    /// pages, or the page budget is exhausted. An unreachable catalog API is
    /// the only error path; a shortfall is reported as a success.
    pub(crate) async fn collect_new_videos(
        &self,
        channel_id: &str,
        target: usize,
    ) -> Result<DiscoveryReport> {
        let started = Instant::now();
        let mut accumulator = CandidateAccumulator::new(target, self.max_pages);
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .catalog
                .list_videos(channel_id, self.page_size, page_token.as_deref())
                .await
                .context("channel listing failed")?;

            let surviving_ids: Vec<String> = page
                .videos
                .iter()
                .filter(|video| !is_short_form(&video.title))
                .map(|video| video.video_id.clone())
                .collect();
            let existing = self
                .dao
                .existing_video_ids(&surviving_ids)
                .await
                .context("existence check failed")?;

            let has_next_page = page.next_page_token.is_some();
            debug!(
                channel_id,
                page_videos = page.videos.len(),
                already_analyzed = existing.len(),
                has_next_page,
                "absorbing discovery page"
            );

            let verdict = accumulator.absorb(page.videos, &existing, has_next_page);
            match verdict {
                PageVerdict::Done => break,
                PageVerdict::NeedMore => page_token = page.next_page_token,
            }
        }

        let report = accumulator.into_report(target);
        self.metrics
            .videos_discovered
            .inc_by(report.videos.len() as f64);
        self.metrics
            .shorts_filtered
            .inc_by(report.shorts_dropped as f64);
        self.metrics
            .duplicates_filtered
            .inc_by(report.duplicates_dropped as f64);
        self.metrics
            .discovery_duration
            .observe(started.elapsed().as_secs_f64());

        if report.shortfall() > 0 {
            warn!(
                channel_id,
                collected = report.videos.len(),
                requested = report.requested,
                pages_fetched = report.pages_fetched,
                "discovery finished below target"
            );
        } else {
            info!(
                channel_id,
                collected = report.videos.len(),
                pages_fetched = report.pages_fetched,
                "discovery finished"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, title: &str) -> VideoSummary {
        VideoSummary {
            video_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            published_at: None,
        }
    }

    #[test]
    fn short_form_markers_match_case_insensitively() {
        assert!(is_short_form("My #Shorts compilation"));
        assert!(is_short_form("a SHORT take"));
        assert!(is_short_form("shorts"));
        assert!(!is_short_form("Full interview"));
    }

    #[test]
    fn short_form_candidates_are_dropped_before_dedup() {
        let mut accumulator = CandidateAccumulator::new(3, 5);
        let page = vec![
            video("a", "Full video"),
            video("b", "#shorts clip"),
            video("c", "Another full video"),
        ];

        accumulator.absorb(page, &HashSet::new(), false);
        let report = accumulator.into_report(3);

        assert_eq!(report.shorts_dropped, 1);
        let ids: Vec<&str> = report.videos.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn already_analyzed_candidates_are_dropped() {
        // A duplicate is excluded even when the title passes the short-form
        // filter.
        let mut accumulator = CandidateAccumulator::new(3, 5);
        let existing: HashSet<String> = ["b".to_string()].into_iter().collect();
        let page = vec![
            video("a", "New video"),
            video("b", "Previously analyzed video"),
            video("c", "Another new video"),
        ];

        accumulator.absorb(page, &existing, false);
        let report = accumulator.into_report(3);

        assert_eq!(report.duplicates_dropped, 1);
        let ids: Vec<&str> = report.videos.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn accumulation_preserves_source_order_and_truncates() {
        let mut accumulator = CandidateAccumulator::new(2, 5);
        let page = vec![
            video("newest", "One"),
            video("newer", "Two"),
            video("older", "Three"),
        ];

        let verdict = accumulator.absorb(page, &HashSet::new(), true);
        assert_eq!(verdict, PageVerdict::Done);

        let report = accumulator.into_report(2);
        let ids: Vec<&str> = report.videos.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "newer"]);
        assert_eq!(report.shortfall(), 0);
    }

    #[test]
    fn stops_when_source_has_no_further_pages() {
        let mut accumulator = CandidateAccumulator::new(10, 5);
        let verdict = accumulator.absorb(vec![video("a", "Only one")], &HashSet::new(), false);

        assert_eq!(verdict, PageVerdict::Done);
        let report = accumulator.into_report(10);
        assert_eq!(report.videos.len(), 1);
        assert_eq!(report.shortfall(), 9);
    }

    #[test]
    fn stops_when_page_budget_is_exhausted() {
        let mut accumulator = CandidateAccumulator::new(100, 2);

        let first = accumulator.absorb(vec![video("a", "One")], &HashSet::new(), true);
        assert_eq!(first, PageVerdict::NeedMore);

        let second = accumulator.absorb(vec![video("b", "Two")], &HashSet::new(), true);
        assert_eq!(second, PageVerdict::Done);

        let report = accumulator.into_report(100);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.videos.len(), 2);
    }

    #[test]
    fn accumulation_is_deterministic_for_identical_inputs() {
        let existing: HashSet<String> = ["dup".to_string()].into_iter().collect();
        let pages = || {
            vec![
                video("a", "Keep"),
                video("dup", "Also keep by title"),
                video("b", "#short clip"),
                video("c", "Keep too"),
            ]
        };

        let run = || {
            let mut accumulator = CandidateAccumulator::new(5, 5);
            accumulator.absorb(pages(), &existing, false);
            accumulator
                .into_report(5)
                .videos
                .into_iter()
                .map(|v| v.video_id)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
        assert_eq!(run(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn shortfall_message_notes_the_gap() {
        let mut accumulator = CandidateAccumulator::new(10, 5);
        accumulator.absorb(
            vec![video("a", "One"), video("b", "Two")],
            &HashSet::new(),
            false,
        );
        let report = accumulator.into_report(10);

        let message = report.message();
        assert!(message.contains("2 of 10"));
        assert!(message.contains("8 missing"));
    }

    #[test]
    fn empty_result_message_is_explanatory() {
        let mut accumulator = CandidateAccumulator::new(5, 5);
        accumulator.absorb(vec![video("a", "#shorts")], &HashSet::new(), false);
        let report = accumulator.into_report(5);

        assert!(report.videos.is_empty());
        assert!(report.message().contains("no new videos"));
    }
}
