//! Result extraction from a search results page.
//!
//! The page embeds its data as one large JSON object assigned to
//! `ytInitialData` inside a script tag. We locate the assignment, cut out
//! the balanced object that follows it, decode it into a [`Value`] tree and
//! walk a fixed path down to the list of rendered items.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{SearchError, SearchResult};

/// Hard cap on the number of results returned from one page.
pub const MAX_RESULTS: usize = 10;

/// Assignment forms seen across page variants, tried in order.
static MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"var\s+ytInitialData\s*=\s*",
        r#"window\[\s*["']ytInitialData["']\s*\]\s*=\s*"#,
        r"ytInitialData\s*=\s*",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Keys leading from the document root to the list of result sections.
const SECTIONS_PATH: &[&str] = &[
    "contents",
    "twoColumnSearchResultsRenderer",
    "primaryContents",
    "sectionListRenderer",
    "contents",
];

/// Extract up to [`MAX_RESULTS`] video results from a results page.
///
/// Fails with [`SearchError::NoDataBlock`] when no data assignment is
/// found and with [`SearchError::Parse`] when the block is not valid JSON.
/// A valid document without the expected structure yields no results.
pub fn extract(document: &str) -> Result<Vec<SearchResult>, SearchError> {
    let block = find_data_block(document).ok_or(SearchError::NoDataBlock)?;
    let data: Value = serde_json::from_str(block)?;

    let Some(sections) = walk(&data, SECTIONS_PATH).and_then(Value::as_array) else {
        tracing::debug!("Result data has no section list");
        return Ok(Vec::new());
    };

    let videos = sections
        .iter()
        .filter_map(|section| walk(section, &["itemSectionRenderer", "contents"])?.as_array())
        .flatten()
        .filter_map(|item| item.get("videoRenderer"))
        .map(video_result)
        .filter(|result| !result.id.is_empty())
        .take(MAX_RESULTS)
        .collect();

    Ok(videos)
}

/// Find the first marker followed by a balanced object.
fn find_data_block(document: &str) -> Option<&str> {
    MARKERS.iter().find_map(|marker| {
        marker
            .find_iter(document)
            .find_map(|m| balanced_object(&document[m.end()..]))
    })
}

/// Return the `{...}` prefix of `text`, honouring nesting and JSON strings.
fn balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Follow `path` through nested objects, stopping at the first mismatch.
pub(crate) fn walk<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}

/// Text of the first run under `key`, e.g. `title.runs[0].text`.
fn first_run_text(renderer: &Value, key: &str) -> Option<String> {
    walk(renderer, &[key, "runs"])?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

fn string_at(renderer: &Value, path: &[&str]) -> Option<String> {
    walk(renderer, path)?.as_str().map(str::to_string)
}

/// Largest thumbnail is listed last.
fn thumbnail_url(renderer: &Value) -> Option<String> {
    walk(renderer, &["thumbnail", "thumbnails"])?
        .as_array()?
        .last()?
        .get("url")?
        .as_str()
        .map(str::to_string)
}

fn video_result(renderer: &Value) -> SearchResult {
    SearchResult {
        id: string_at(renderer, &["videoId"]).unwrap_or_default(),
        title: first_run_text(renderer, "title").unwrap_or_default(),
        channel: first_run_text(renderer, "ownerText").unwrap_or_default(),
        duration: string_at(renderer, &["lengthText", "simpleText"]).unwrap_or_default(),
        thumbnail: thumbnail_url(renderer),
    }
}
