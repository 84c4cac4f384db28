//! 動画URLから正準の動画IDを取り出すユーティリティ。
//!
//! watch形式、短縮リンク形式、embed形式の順でパターンを適用し、
//! 最初にマッチしたキャプチャを返す。副作用なし。

use once_cell::sync::Lazy;
use regex::Regex;

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:youtube\.com/watch\?v=|youtu\.be/)([^&\n?#]+)",
        r"youtube\.com/embed/([^&\n?#]+)",
        r"youtube\.com/v/([^&\n?#]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("video id pattern is valid"))
    .collect()
});

/// Extract the canonical video id from a free-form URL string.
///
/// Returns `None` when no known URL form matches.
#[must_use]
pub fn extract_video_id(url: &str) -> Option<String> {
    for pattern in VIDEO_ID_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(url) {
            if let Some(id) = captures.get(1) {
                return Some(id.as_str().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::extract_video_id;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://youtu.be/dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/embed/dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/v/dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case(
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&index=4",
        "dQw4w9WgXcQ"
    )]
    #[case("https://youtu.be/dQw4w9WgXcQ?t=42", "dQw4w9WgXcQ")]
    fn extracts_id_from_known_url_forms(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(extract_video_id(url).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("https://example.com/watch?v=dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/channel/UC12345")]
    #[case("not a url at all")]
    #[case("")]
    fn returns_none_for_unknown_forms(#[case] url: &str) {
        assert_eq!(extract_video_id(url), None);
    }

    #[test]
    fn watch_form_wins_over_embed_form() {
        // The ordered matcher list stops at the first hit.
        let url = "https://www.youtube.com/watch?v=abc123#youtube.com/embed/zzz";
        assert_eq!(extract_video_id(url).as_deref(), Some("abc123"));
    }
}
