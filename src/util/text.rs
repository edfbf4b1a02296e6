/// テキスト処理ユーティリティ。
use xxhash_rust::xxh3::xxh3_64;

/// Longest text excerpt written to logs.
pub(crate) const MAX_TEXT_PREVIEW_LENGTH: usize = 200;

/// テキストをXXH3でハッシュする。
#[must_use]
pub(crate) fn hash_text(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

/// Truncates on a char boundary and appends an ellipsis when shortened.
#[must_use]
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Trims and drops empty strings so optional provider fields stay `None`.
#[must_use]
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
