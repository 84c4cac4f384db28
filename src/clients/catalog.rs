//! チャンネルカタログAPI（一覧取得）クライアント。
//!
//! 動画URLからのチャンネル解決と、公開日降順のページング付き動画一覧を提供する。

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Url};
use serde::Deserialize;

const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub(crate) struct CatalogClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

/// The channel a source video belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChannelRef {
    pub(crate) channel_id: String,
    pub(crate) channel_name: String,
}

/// One discovered video, as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoSummary {
    pub(crate) video_id: String,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) published_at: Option<String>,
}

/// One page of the channel listing.
#[derive(Debug, Clone)]
pub(crate) struct VideoPage {
    pub(crate) videos: Vec<VideoSummary>,
    pub(crate) next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    channel_id: String,
    channel_title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    title: String,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl CatalogClient {
    pub(crate) fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build catalog client")?;

        let base_url = Url::parse(&base_url.into()).context("invalid catalog base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// 動画IDからその所属チャンネルを解決する。
    ///
    /// 動画が見つからない場合は `Ok(None)`。
    pub(crate) async fn resolve_channel(&self, video_id: &str) -> Result<Option<ChannelRef>> {
        let url = self
            .base_url
            .join("videos")
            .context("failed to build catalog videos URL")?;

        let response: VideosResponse = self
            .client
            .get(url)
            .query(&[
                ("part", "snippet"),
                ("id", video_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("catalog videos request failed")?
            .json()
            .await
            .context("failed to deserialize catalog videos response")?;

        if let Some(error) = response.error {
            return Err(anyhow!("catalog API error: {}", error.message));
        }

        Ok(response.items.into_iter().next().map(|item| ChannelRef {
            channel_id: item.snippet.channel_id,
            channel_name: item.snippet.channel_title,
        }))
    }

    /// List one page of a channel's videos, newest first.
    ///
    /// `page_size` is capped at the catalog's maximum of 50.
    pub(crate) async fn list_videos(
        &self,
        channel_id: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<VideoPage> {
        let url = self
            .base_url
            .join("search")
            .context("failed to build catalog search URL")?;

        let max_results = page_size.min(MAX_PAGE_SIZE).to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("part", "snippet"),
            ("channelId", channel_id),
            ("maxResults", max_results.as_str()),
            ("order", "date"),
            ("type", "video"),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: SearchResponse = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .context("catalog search request failed")?
            .json()
            .await
            .context("failed to deserialize catalog search response")?;

        if let Some(error) = response.error {
            return Err(anyhow!("catalog API error: {}", error.message));
        }

        let videos = response
            .items
            .into_iter()
            .filter_map(|item| {
                // Playlist/channel hits carry no videoId even with type=video.
                let video_id = item.id.video_id?;
                let url = format!("https://www.youtube.com/watch?v={video_id}");
                Some(VideoSummary {
                    video_id,
                    title: item.snippet.title,
                    url,
                    published_at: item.snippet.published_at,
                })
            })
            .collect();

        Ok(VideoPage {
            videos,
            next_page_token: response.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> CatalogClient {
        CatalogClient::new(server.uri() + "/", "test-key", Duration::from_secs(5))
            .expect("client should build")
    }

    #[tokio::test]
    async fn resolve_channel_parses_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "vid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"snippet": {"channelId": "UC123", "channelTitle": "Example Channel"}}]
            })))
            .mount(&server)
            .await;

        let channel = client_for(&server)
            .resolve_channel("vid-1")
            .await
            .expect("request succeeds")
            .expect("channel found");

        assert_eq!(channel.channel_id, "UC123");
        assert_eq!(channel.channel_name, "Example Channel");
    }

    #[tokio::test]
    async fn resolve_channel_returns_none_for_unknown_video() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})),
            )
            .mount(&server)
            .await;

        let channel = client_for(&server)
            .resolve_channel("missing")
            .await
            .expect("request succeeds");

        assert!(channel.is_none());
    }

    #[tokio::test]
    async fn list_videos_maps_items_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("channelId", "UC123"))
            .and(query_param("order", "date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": {"videoId": "a1"}, "snippet": {"title": "First", "publishedAt": "2025-01-02T00:00:00Z"}},
                    {"id": {}, "snippet": {"title": "playlist hit", "publishedAt": null}},
                    {"id": {"videoId": "b2"}, "snippet": {"title": "Second", "publishedAt": "2025-01-01T00:00:00Z"}}
                ],
                "nextPageToken": "tok-2"
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .list_videos("UC123", 50, None)
            .await
            .expect("request succeeds");

        assert_eq!(page.videos.len(), 2);
        assert_eq!(page.videos[0].video_id, "a1");
        assert_eq!(page.videos[0].url, "https://www.youtube.com/watch?v=a1");
        assert_eq!(page.videos[1].video_id, "b2");
        assert_eq!(page.next_page_token.as_deref(), Some("tok-2"));
    }

    #[tokio::test]
    async fn list_videos_forwards_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("pageToken", "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": []
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .list_videos("UC123", 50, Some("tok-2"))
            .await
            .expect("request succeeds");

        assert!(page.videos.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn error_payload_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"message": "quota exceeded"}
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .list_videos("UC123", 50, None)
            .await
            .expect_err("error payload should fail the call");

        assert!(error.to_string().contains("quota exceeded"));
    }
}
