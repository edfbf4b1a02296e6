//! Stable run identifiers derived from source URLs.
//!
//! The identifier names every artifact a run produces, so it has to be a
//! pure function of the URL and safe to embed in a file name.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::util::text::hash_text;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunIdentifier(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("url is empty")]
    Empty,
    #[error("url could not be parsed: {0}")]
    Unparseable(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    MissingHost,
}

impl RunIdentifier {
    /// Derives the identifier for `url`.
    ///
    /// Short links (`/t/{code}`), profile videos and photo posts keep a
    /// readable form; any other URL is keyed by host plus an xxh3 hash of
    /// the URL without query or fragment.
    ///
    /// # Errors
    /// Returns [`ResolveError`] when `url` is not an absolute http(s) URL
    /// with a host.
    pub fn resolve(url: &str) -> Result<Self, ResolveError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::Empty);
        }

        let parsed =
            Url::parse(trimmed).map_err(|error| ResolveError::Unparseable(error.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ResolveError::UnsupportedScheme(other.to_string())),
        }
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or(ResolveError::MissingHost)?;

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self(sanitize(&derive_key(host, &segments, &parsed))))
    }

    /// Key for the `index`-th (1-based) item of a multi-item source.
    #[must_use]
    pub fn item(&self, index: usize) -> Self {
        Self(format!("{}_{index:02}", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn derive_key(host: &str, segments: &[&str], parsed: &Url) -> String {
    if let Some(code) = segment_after(segments, "t") {
        return format!("t_{code}");
    }

    let user = segments
        .iter()
        .find_map(|segment| segment.strip_prefix('@'))
        .filter(|user| !user.is_empty());

    for kind in ["video", "photo"] {
        if let Some(id) = segment_after(segments, kind) {
            return match user {
                Some(user) => format!("{user}_{kind}_{id}"),
                None => format!("{}_{kind}_{id}", host_slug(host)),
            };
        }
    }

    let mut canonical = parsed.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    format!(
        "{}_{:016x}",
        host_slug(host),
        hash_text(canonical.as_str())
    )
}

fn segment_after<'a>(segments: &[&'a str], marker: &str) -> Option<&'a str> {
    segments
        .windows(2)
        .find(|pair| pair[0] == marker)
        .map(|pair| pair[1])
}

fn host_slug(host: &str) -> String {
    host.strip_prefix("www.")
        .unwrap_or(host)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
