//! 生成API（Gemini `generateContent`）クライアント。
//!
//! 大本抽出と要約生成の2種類の呼び出しを担う。各メソッドは1回分の試行で、
//! 結果を `CallError` に分類して返す。再試行はパイプライン側の
//! `RetryPolicy` が行う。

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde_json::{Value, json};

use crate::util::retry::{
    CallError, classify_transport_error, is_overload_message, is_transient_status,
};

#[derive(Debug, Clone)]
pub(crate) struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    extraction_timeout: Duration,
    summary_timeout: Duration,
}

impl GeminiClient {
    pub(crate) fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        extraction_timeout: Duration,
        summary_timeout: Duration,
    ) -> Result<Self> {
        // Per-request timeouts are applied at call time; the builder timeout
        // stays unset so the long extraction bound is not clipped.
        let client = Client::builder()
            .build()
            .context("failed to build gemini client")?;

        let base_url = Url::parse(&base_url.into()).context("invalid gemini base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            extraction_timeout,
            summary_timeout,
        })
    }

    /// One transcript-extraction attempt for a video URL.
    pub(crate) async fn extract_transcript(&self, video_url: &str) -> Result<String, CallError> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"text": "Transcribe this video in full. Return only the spoken transcript as plain text, with no extra commentary."},
                    {"fileData": {"mimeType": "video/youtube", "fileUri": video_url}}
                ]
            }]
        });

        self.generate(&body, self.extraction_timeout).await
    }

    /// One summary-report attempt over an extracted transcript.
    pub(crate) async fn summarize(
        &self,
        transcript: &str,
        title: Option<&str>,
    ) -> Result<String, CallError> {
        let body = json!({
            "contents": [{
                "parts": [{"text": summary_prompt(transcript, title)}]
            }]
        });

        self.generate(&body, self.summary_timeout).await
    }

    async fn generate(&self, body: &Value, timeout: Duration) -> Result<String, CallError> {
        let url = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|error| CallError::Terminal(format!("invalid gemini URL: {error}")))?;

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| classify_transport_error(&error))?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(CallError::Transient(format!(
                "generative API returned status {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| classify_transport_error(&error))?;

        if let Some(message) = payload
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            return Err(if is_overload_message(message) {
                CallError::Transient(format!("generative API error: {message}"))
            } else {
                CallError::Terminal(format!("generative API error: {message}"))
            });
        }

        payload
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.pointer("/content/parts/0/text"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| CallError::Terminal("response contains no candidate text".to_string()))
    }
}

fn summary_prompt(transcript: &str, title: Option<&str>) -> String {
    let intro = match title {
        Some(title) => {
            format!("The following is the transcript of a video titled \"{title}\".")
        }
        None => "The following is the transcript of a video.".to_string(),
    };

    format!(
        "{intro} Write a one-page summary report of it.\n\n\
         Report format:\n\
         1. Core summary (3-5 sentences)\n\
         2. Key points (5-7 bullet points)\n\
         3. Conclusions and implications\n\n\
         Transcript:\n{transcript}"
    )
}
