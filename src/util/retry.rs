//! 生成APIコール向けの線形バックオフ付き再試行ロジック。
//!
//! 呼び出し側が各試行の結果を `CallError` に分類し、transient の場合のみ
//! `試行回数 × バックオフ単位` だけ待ってから再試行する。

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Outcome classification for one attempt against an external API.
///
/// `Transient` covers overload/quota/timeout classes and is worth retrying;
/// `Terminal` covers malformed responses and every other error, and fails the
/// logical call immediately.
#[derive(Debug, Error)]
pub(crate) enum CallError {
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Terminal(String),
}

impl CallError {
    #[cfg(test)]
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    max_attempts: usize,
    /// 線形バックオフの単位時間
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_unit: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub(crate) const fn new(max_attempts: usize, backoff_unit: Duration) -> Self {
        Self {
            max_attempts,
            backoff_unit,
        }
    }

    #[allow(dead_code)]
    #[must_use]
    pub(crate) const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// 完了した試行回数（1始まり）に対する待機時間を計算する。
    ///
    /// attempt回目の失敗後は `backoff_unit × attempt` 待つ。
    #[must_use]
    pub(crate) fn delay_after_attempt(&self, attempt: usize) -> Duration {
        self.backoff_unit
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }

    /// Drive `call` until it succeeds, fails terminally, or the attempt
    /// budget is exhausted.
    ///
    /// Issues at most `max_attempts` calls. A `Terminal` error is returned
    /// without further attempts; the final `Transient` error is returned once
    /// the budget runs out.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(CallError::Terminal(message)) => {
                    warn!(operation, attempt, error = %message, "terminal upstream failure");
                    return Err(CallError::Terminal(message));
                }
                Err(CallError::Transient(message)) => {
                    if attempt >= self.max_attempts {
                        return Err(CallError::Transient(format!(
                            "{operation} failed after {attempt} attempts: {message}"
                        )));
                    }
                    let delay = self.delay_after_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %message,
                        "transient upstream failure, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// reqwestのトランスポートエラーを分類する。
///
/// タイムアウトと接続エラーは transient、それ以外は terminal。
pub(crate) fn classify_transport_error(error: &reqwest::Error) -> CallError {
    if error.is_timeout() || error.is_connect() {
        CallError::Transient(error.to_string())
    } else {
        CallError::Terminal(error.to_string())
    }
}

/// HTTPステータスが transient なレート制限/過負荷クラスかどうか。
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
}

/// エラーペイロードの文言が過負荷/クォータ枯渇を示すかどうか。
pub(crate) fn is_overload_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("overloaded")
        || lowered.contains("quota")
        || lowered.contains("rate limit")
        || lowered.contains("resource_exhausted")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn delay_schedule_is_linear() {
        let policy = RetryPolicy::new(10, Duration::from_secs(30));

        assert_eq!(policy.delay_after_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_secs(60));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_secs(90));
        assert_eq!(policy.delay_after_attempt(9), Duration::from_secs(270));
    }

    #[test]
    fn total_backoff_matches_arithmetic_series() {
        let policy = RetryPolicy::new(10, Duration::from_secs(30));

        // 最後の試行の後には待機しないため、k = 1..max_attempts-1 の合計。
        let total: Duration = (1..policy.max_attempts())
            .map(|attempt| policy.delay_after_attempt(attempt))
            .sum();
        assert_eq!(total, Duration::from_secs(30 * 45));
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), CallError> = policy
            .run("extract", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Transient("overloaded".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.expect_err("budget exhausted").is_transient());
    }

    #[tokio::test]
    async fn terminal_error_short_circuits() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), CallError> = policy
            .run("summarize", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Terminal("empty candidates".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!result.expect_err("terminal").is_transient());
    }

    #[tokio::test]
    async fn transient_then_success_recovers() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .run("summarize", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CallError::Transient("503".into()))
                    } else {
                        Ok("report".to_string())
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.expect("recovers"), "report");
    }

    #[test]
    fn overload_message_classification() {
        assert!(is_overload_message("The model is overloaded"));
        assert!(is_overload_message("Quota exceeded for quota metric"));
        assert!(is_overload_message("RESOURCE_EXHAUSTED"));
        assert!(is_overload_message("rate limit reached"));
        assert!(!is_overload_message("invalid argument: bad file uri"));
    }

    #[test]
    fn transient_status_classification() {
        assert!(is_transient_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }
}
