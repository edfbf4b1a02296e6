use std::path::Path;

use anyhow::{Context, Result};
use reqwest::{
    Client, Url,
    multipart::{Form, Part},
};
use serde::Deserialize;

use super::HttpEndpoint;
use crate::pipeline::model::TranscriptText;

/// Whisper互換サーバー（`POST /inference`）への音声書き起こしクライアント。
#[derive(Debug, Clone)]
pub(crate) struct TranscriptionClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl TranscriptionClient {
    pub(crate) fn new(endpoint: &HttpEndpoint) -> Result<Self> {
        let (client, base_url) = endpoint.connect("transcription")?;
        Ok(Self { client, base_url })
    }

    /// Uploads the media file and returns the recognised speech.
    pub(crate) async fn transcribe(&self, media: &Path) -> Result<TranscriptText> {
        let url = self
            .base_url
            .join("inference")
            .context("failed to build transcription URL")?;

        let bytes = tokio::fs::read(media)
            .await
            .with_context(|| format!("failed to read media file {}", media.display()))?;
        let file_name = media
            .file_name()
            .map_or_else(|| "media".to_string(), |name| name.to_string_lossy().into_owned());
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("response_format", "json");

        let response: InferenceResponse = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?
            .error_for_status()
            .context("transcription returned error status")?
            .json()
            .await
            .context("failed to deserialize transcription response")?;

        Ok(TranscriptText {
            text: response.text.trim().to_string(),
            language: response.language,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_endpoint;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn transcribe_uploads_file_and_trims_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "  you have to try the tonkotsu  ",
                "language": "en"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let media = dir.path().join("t_abc.mp4");
        std::fs::write(&media, b"fake video").expect("write");

        let client = TranscriptionClient::new(&test_endpoint(server.uri())).expect("client");
        let transcript = client.transcribe(&media).await.expect("transcribe");

        assert_eq!(transcript.text, "you have to try the tonkotsu");
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn missing_media_file_fails_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(&test_endpoint(server.uri())).expect("client");
        let error = client
            .transcribe(Path::new("/nonexistent/t_x.mp4"))
            .await
            .expect_err("should fail");
        assert!(error.to_string().contains("failed to read media file"));
    }
}
