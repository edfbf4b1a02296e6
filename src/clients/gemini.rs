/// Gemini `generateContent` クライアントと場所抽出レスポンスのパーサー。
use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::HttpEndpoint;
use crate::{
    pipeline::model::{AnalysisHints, PlaceCandidate},
    util::text::non_empty,
};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

const EXTRACTION_INSTRUCTIONS: &str = r#"You extract real-world places from short-form video content.
Cover single places, multi-place area guides, popup events, carousel posts where each image may show a different place, and vendors inside food courts or markets. Keep non-English names exactly as written.

Return only JSON in this shape:
{
  "content_analysis": {"content_type": "single_place|multiple_places|popup_event|area_guide", "confidence_score": 0.0, "primary_focus": ""},
  "places": [
    {"name": "", "address": "", "neighborhood": "", "categories": [], "recommendations": "", "hours": "", "website": "", "is_popup": false}
  ],
  "area_info": {"area_theme": "", "total_places_mentioned": 0, "area_description": ""}
}

Rules:
- Return an empty places array when no specific place can be identified.
- Never use generic names such as "restaurant", "cafe" or "unknown".
- For unnamed market vendors describe the stall by position and market, and use the market address.
- Recommendations are specific menu items or activities, not general praise.
- Use hashtags, captions and location pins as address clues."#;

#[derive(Debug, Clone)]
pub(crate) struct GeminiConfig {
    pub(crate) endpoint: HttpEndpoint,
    pub(crate) api_key: String,
    pub(crate) model: String,
}

#[derive(Debug, Clone)]
pub(crate) struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Parsed extraction payload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LocationAnalysis {
    #[serde(default)]
    pub(crate) content_analysis: Option<Value>,
    #[serde(default)]
    pub(crate) places: Vec<AnalyzedPlace>,
    #[serde(default)]
    pub(crate) area_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalyzedPlace {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    recommendations: Option<Recommendations>,
    #[serde(default)]
    hours: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    is_popup: bool,
}

/// Models answer with either a sentence or a list of items.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Recommendations {
    Text(String),
    List(Vec<String>),
}

impl AnalyzedPlace {
    fn into_candidate(self) -> Option<PlaceCandidate> {
        let name = non_empty(self.name)?;
        let recommendations = match self.recommendations {
            Some(Recommendations::Text(text)) => non_empty(Some(text)),
            Some(Recommendations::List(items)) => non_empty(Some(
                items
                    .iter()
                    .map(|item| item.trim())
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
            None => None,
        };
        Some(PlaceCandidate {
            name,
            address: non_empty(self.address),
            neighborhood: non_empty(self.neighborhood),
            categories: self
                .categories
                .into_iter()
                .filter_map(|category| non_empty(Some(category)))
                .collect(),
            recommendations,
            hours: non_empty(self.hours),
            website: non_empty(self.website),
            map_link: None,
            is_popup: self.is_popup,
            visited: false,
            validated: false,
        })
    }
}

impl GeminiClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: GeminiConfig) -> Result<Self> {
        let (client, base_url) = config.endpoint.connect("gemini")?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            model: config.model,
        })
    }

    /// Asks the model for place candidates in `combined_text`.
    pub(crate) async fn extract_places(
        &self,
        combined_text: &str,
        hints: &AnalysisHints,
    ) -> Result<Vec<PlaceCandidate>> {
        let prompt = build_prompt(combined_text, hints)?;
        let text = self.generate(&prompt).await?;
        let analysis = parse_analysis(&text)?;
        let content_type = analysis
            .content_analysis
            .as_ref()
            .and_then(|value| value.get("content_type"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(
            places = analysis.places.len(),
            content_type, "gemini extraction parsed"
        );
        Ok(analysis
            .places
            .into_iter()
            .filter_map(AnalyzedPlace::into_candidate)
            .collect())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut url = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .context("failed to build gemini generateContent URL")?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.2,
            },
        };

        let response: GenerateResponse = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .context("gemini request failed")?
            .error_for_status()
            .context("gemini returned error status")?
            .json()
            .await
            .context("failed to deserialize gemini response")?;

        response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .map(|part| part.text)
            .find(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow!("gemini response contained no text"))
    }
}

/// Builds the extraction prompt from the combined text plus hints.
pub(crate) fn build_prompt(combined_text: &str, hints: &AnalysisHints) -> Result<String> {
    let mut context = format!("Video content text:\n{combined_text}");
    if let Some(metadata) = &hints.metadata {
        let metadata =
            serde_json::to_string_pretty(metadata).context("failed to serialize metadata")?;
        context.push_str(&format!("\n\nMetadata:\n{metadata}"));
    }
    if !hints.categories.is_empty() {
        context.push_str(&format!(
            "\n\nExpected place categories: {}",
            json!(hints.categories)
        ));
    }
    Ok(format!("{EXTRACTION_INSTRUCTIONS}\n\n{context}\n"))
}

/// Strips a surrounding markdown code fence, if any.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map_or_else(|| text.trim(), |inner| inner.as_str())
}

/// # Errors
/// Fails when the text is not the expected JSON object.
pub(crate) fn parse_analysis(text: &str) -> Result<LocationAnalysis> {
    serde_json::from_str(strip_code_fences(text)).context("gemini returned unparseable analysis")
}
