use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;

use super::HttpEndpoint;

/// Google Vision `images:annotate` client for TEXT_DETECTION.
#[derive(Debug, Clone)]
pub(crate) struct VisionClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<ImageError>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ImageError {
    #[serde(default)]
    message: String,
}

impl VisionClient {
    pub(crate) fn new(endpoint: &HttpEndpoint, api_key: impl Into<String>) -> Result<Self> {
        let (client, base_url) = endpoint.connect("vision")?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Full text found in `image`, or `None` when the image has none.
    pub(crate) async fn detect_text(&self, image: &[u8]) -> Result<Option<String>> {
        let mut url = self
            .base_url
            .join("v1/images:annotate")
            .context("failed to build vision annotate URL")?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let body = json!({
            "requests": [{
                "image": {"content": STANDARD.encode(image)},
                "features": [{"type": "TEXT_DETECTION"}]
            }]
        });

        let response: AnnotateResponse = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("vision annotate request failed")?
            .error_for_status()
            .context("vision annotate returned error status")?
            .json()
            .await
            .context("failed to deserialize vision response")?;

        let Some(image) = response.responses.into_iter().next() else {
            return Ok(None);
        };
        if let Some(error) = image.error {
            bail!("vision rejected image: {}", error.message);
        }
        // The first annotation is the full text block; the rest are words.
        Ok(image
            .text_annotations
            .into_iter()
            .next()
            .map(|annotation| annotation.description.trim().to_string())
            .filter(|text| !text.is_empty()))
    }
}
