pub(crate) mod downloader;
pub(crate) mod frames;
pub(crate) mod gemini;
pub(crate) mod notion;
pub(crate) mod places;
pub(crate) mod transcriber;
pub(crate) mod vision;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};

pub(crate) use downloader::YtDlpDownloader;
pub(crate) use frames::FrameSampler;
pub(crate) use gemini::GeminiClient;
pub(crate) use notion::NotionClient;
pub(crate) use places::PlacesClient;
pub(crate) use transcriber::TranscriptionClient;
pub(crate) use vision::VisionClient;

/// Connection settings shared by every HTTP provider client.
#[derive(Debug, Clone)]
pub(crate) struct HttpEndpoint {
    pub(crate) base_url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
}

impl HttpEndpoint {
    /// Builds the reqwest client and parses the base URL, labelling errors
    /// with `service`.
    pub(crate) fn connect(&self, service: &str) -> Result<(Client, Url)> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.total_timeout)
            .build()
            .with_context(|| format!("failed to build {service} HTTP client"))?;

        let base_url =
            Url::parse(&self.base_url).with_context(|| format!("invalid {service} base URL"))?;

        Ok((client, base_url))
    }
}

#[cfg(test)]
pub(crate) fn test_endpoint(base_url: impl Into<String>) -> HttpEndpoint {
    HttpEndpoint {
        base_url: base_url.into(),
        connect_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_secs(5),
    }
}
