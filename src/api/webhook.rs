//! Webhook surface: process one URL on demand, or kick off a pending sweep.
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::envelope::{ApiError, Envelope};
use crate::{
    app::AppState,
    pipeline::{RunMode, RunOptions},
};

#[derive(Debug, Deserialize)]
pub(crate) struct ProcessRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// How much of the pipeline a webhook request asks for, chosen by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessingType {
    Full,
    MetadataOnly,
    AudioOnly,
    VideoOnly,
    LocationOnly,
}

impl ProcessingType {
    pub(crate) const ALL: [Self; 5] = [
        Self::Full,
        Self::MetadataOnly,
        Self::AudioOnly,
        Self::VideoOnly,
        Self::LocationOnly,
    ];

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MetadataOnly => "metadata-only",
            Self::AudioOnly => "audio-only",
            Self::VideoOnly => "video-only",
            Self::LocationOnly => "location-only",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
    }

    /// First recognised tag wins; the remaining tags become category hints.
    fn from_tags(tags: &[String]) -> (Self, Vec<String>) {
        let mut kind = None;
        let mut categories = Vec::new();
        for tag in tags {
            match (kind, Self::parse(tag)) {
                (None, Some(parsed)) => kind = Some(parsed),
                (_, Some(_)) => {}
                (_, None) if !tag.trim().is_empty() => categories.push(tag.trim().to_string()),
                _ => {}
            }
        }
        (kind.unwrap_or(Self::Full), categories)
    }

    fn options(self, categories: Vec<String>) -> RunOptions {
        let mut options = RunOptions {
            categories,
            ..RunOptions::default()
        };
        match self {
            Self::Full => {}
            Self::MetadataOnly => {
                options.skip_transcription = true;
                options.skip_ocr = true;
                options.include_caption = true;
            }
            Self::AudioOnly => options.skip_ocr = true,
            Self::VideoOnly => options.mode = RunMode::VideoOnly,
            Self::LocationOnly => options.mode = RunMode::LocationOnly,
        }
        options
    }
}

fn validate_url(raw: Option<&str>) -> Result<String, ApiError> {
    let raw = raw.map(str::trim).filter(|url| !url.is_empty());
    let raw = raw.ok_or(ApiError::MissingUrl)?;
    match Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Ok(raw.to_string())
        }
        _ => Err(ApiError::InvalidUrl),
    }
}

pub(crate) async fn process(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> Response {
    state.telemetry().metrics().webhook_requests.inc();

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return ApiError::NotJson(rejection.body_text()).into_response(),
    };
    let url = match validate_url(request.url.as_deref()) {
        Ok(url) => url,
        Err(error) => return error.into_response(),
    };

    let (kind, categories) = ProcessingType::from_tags(&request.tags);
    let options = kind.options(categories);
    info!(url = %url, processing_type = kind.as_str(), "webhook processing request");

    let result = state.pipeline().run_one(&url, &options).await;
    let data = json!({
        "processing_type": kind.as_str(),
        "result": result,
    });

    if result.succeeded() {
        Envelope::ok(format!("Successfully processed {url}"))
            .with_data(data)
            .respond(StatusCode::OK)
    } else {
        let error = result
            .first_error()
            .unwrap_or_else(|| "pipeline run failed".to_string());
        warn!(url = %url, error = %error, "webhook processing failed");
        Envelope::failed(format!("Failed to process {url}"), error)
            .with_data(data)
            .respond(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Starts a sweep in the background and answers immediately.
pub(crate) async fn trigger_pending(State(state): State<AppState>) -> Response {
    state.telemetry().metrics().webhook_requests.inc();

    let scheduler = state.scheduler().clone();
    if !scheduler.can_sweep() {
        return ApiError::NoPendingSource.into_response();
    }
    tokio::spawn(async move {
        scheduler.run_sweep("webhook").await;
    });
    Envelope::ok("Pending URL sweep started").respond(StatusCode::ACCEPTED)
}
