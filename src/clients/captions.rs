//! Direct caption-track lookup against the public watch page.
//!
//! This is the cheap extraction path: one page fetch plus one track fetch,
//! no retries. Every failure mode collapses to `None` so the caller can fall
//! back to the generative extraction call.

use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

static CAPTION_TRACKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""captionTracks":(\[.*?\])"#).expect("caption tracks pattern"));

static CAPTION_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<text[^>]*>(.*?)</text>").expect("caption text pattern"));

#[derive(Debug, Clone)]
pub(crate) struct CaptionClient {
    client: Client,
    base_url: Url,
}

impl CaptionClient {
    pub(crate) fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build caption client")?;

        let base_url = Url::parse(&base_url.into()).context("invalid caption base URL")?;

        Ok(Self { client, base_url })
    }

    /// Try to read the first caption track of a video.
    ///
    /// Returns `None` when the page has no caption metadata, the track fetch
    /// fails, or the track contains no text.
    pub(crate) async fn fetch_transcript(&self, video_id: &str) -> Option<String> {
        let watch_url = match self.base_url.join("watch") {
            Ok(url) => url,
            Err(error) => {
                debug!(%error, "failed to build watch URL");
                return None;
            }
        };

        let html = match self
            .client
            .get(watch_url)
            .query(&[("v", video_id)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => match response.text().await {
                Ok(html) => html,
                Err(error) => {
                    debug!(video_id, %error, "failed to read watch page body");
                    return None;
                }
            },
            Err(error) => {
                debug!(video_id, %error, "watch page request failed");
                return None;
            }
        };

        let track_url = match first_track_url(&html) {
            Some(url) => url,
            None => {
                debug!(video_id, "no caption tracks on watch page");
                return None;
            }
        };

        let track_xml = match self
            .client
            .get(&track_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => match response.text().await {
                Ok(xml) => xml,
                Err(error) => {
                    debug!(video_id, %error, "failed to read caption track body");
                    return None;
                }
            },
            Err(error) => {
                debug!(video_id, %error, "caption track request failed");
                return None;
            }
        };

        let transcript = extract_caption_text(&track_xml);
        if transcript.is_empty() {
            None
        } else {
            Some(transcript)
        }
    }
}

/// watchページのHTMLから最初のキャプショントラックURLを取り出す。
fn first_track_url(html: &str) -> Option<String> {
    let raw = CAPTION_TRACKS.captures(html)?.get(1)?.as_str();
    let tracks: Value = serde_json::from_str(raw).ok()?;
    tracks
        .get(0)?
        .get("baseUrl")?
        .as_str()
        .map(ToString::to_string)
}

/// キャプションXMLの `<text>` 要素を連結して平文にする。
fn extract_caption_text(xml: &str) -> String {
    CAPTION_TEXT
        .captures_iter(xml)
        .filter_map(|captures| captures.get(1))
        .map(|segment| unescape_entities(segment.as_str()))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;#39;", "'")
        .replace("&amp;quot;", "\"")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn track_url_is_parsed_from_watch_page() {
        let html = r#"<html>...,"captionTracks":[{"baseUrl":"https://example.com/api/timedtext?v=x","name":{}}],"audioTracks":...</html>"#;
        assert_eq!(
            first_track_url(html).as_deref(),
            Some("https://example.com/api/timedtext?v=x")
        );
    }

    #[test]
    fn missing_tracks_yield_none() {
        assert_eq!(first_track_url("<html>no captions here</html>"), None);
    }

    #[test]
    fn caption_text_is_joined_and_unescaped() {
        let xml = concat!(
            r#"<transcript><text start="0" dur="2">it&amp;#39;s one</text>"#,
            r#"<text start="2" dur="2">and &amp;quot;two&amp;quot;</text></transcript>"#
        );
        assert_eq!(extract_caption_text(xml), "it's one and \"two\"");
    }

    #[tokio::test]
    async fn fetch_transcript_happy_path() {
        let server = MockServer::start().await;
        let track_path = format!("{}/track", server.uri());
        let html = format!(r#"<html>"captionTracks":[{{"baseUrl":"{track_path}"}}]</html>"#);

        Mock::given(method("GET"))
            .and(path("/watch"))
            .and(query_param("v", "vid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/track"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<transcript><text start="0">hello</text><text start="1">world</text></transcript>"#,
            ))
            .mount(&server)
            .await;

        let client = CaptionClient::new(server.uri() + "/", Duration::from_secs(5))
            .expect("client should build");

        let transcript = client.fetch_transcript("vid-1").await;
        assert_eq!(transcript.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn fetch_transcript_without_tracks_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>plain page</html>"))
            .mount(&server)
            .await;

        let client = CaptionClient::new(server.uri() + "/", Duration::from_secs(5))
            .expect("client should build");

        assert_eq!(client.fetch_transcript("vid-1").await, None);
    }
}
