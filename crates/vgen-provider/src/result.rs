//! Tolerant lookup of the output video URL.
//!
//! Result payloads are not schema-stable across models, so the URL is looked
//! up through an ordered list of known field paths.

use serde_json::Value;
use tracing::debug;

/// Known URL locations, most specific first.
pub const VIDEO_URL_ALIASES: &[&str] = &["video.url", "videoUrl", "video_url"];

/// URL found in a result payload, with the alias that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUrlMatch {
    pub url: String,
    pub alias: &'static str,
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, segment| node.get(segment))
}

fn find_in(root: &Value) -> Option<VideoUrlMatch> {
    VIDEO_URL_ALIASES.iter().find_map(|alias| {
        lookup(root, alias)
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .map(|url| VideoUrlMatch {
                url: url.to_string(),
                alias: *alias,
            })
    })
}

/// Extract the output video URL.
///
/// Checks the payload itself, then a nested `data` envelope.
pub fn extract_video_url(result: &Value) -> Option<VideoUrlMatch> {
    let found = find_in(result).or_else(|| result.get("data").and_then(find_in));
    match &found {
        Some(m) => debug!(alias = m.alias, "Matched video URL alias"),
        None => debug!("No video URL alias matched"),
    }
    found
}
