/// Google Places (Text Search + Details) クライアント。
use anyhow::{Context, Result, bail};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use super::HttpEndpoint;
use crate::{pipeline::model::PlaceDetails, util::text::non_empty};

const DETAIL_FIELDS: &str = "formatted_address,opening_hours,website";

#[derive(Debug, Clone)]
pub(crate) struct PlacesClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<TextSearchResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextSearchResult {
    place_id: String,
    #[serde(default)]
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    result: Option<DetailsResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    opening_hours: Option<OpeningHours>,
    #[serde(default)]
    website: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpeningHours {
    #[serde(default)]
    weekday_text: Vec<String>,
}

impl PlacesClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(endpoint: &HttpEndpoint, api_key: impl Into<String>) -> Result<Self> {
        let (client, base_url) = endpoint.connect("places")?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Text Search on `"{name} {hint}"`, then Details for the first hit.
    pub(crate) async fn lookup(&self, name: &str, context_hint: &str) -> Result<PlaceDetails> {
        let query = format!("{name} {context_hint}").trim().to_string();
        let Some(hit) = self.text_search(&query).await? else {
            debug!(query = %query, "no places match");
            return Ok(PlaceDetails::not_found());
        };

        let details = self.details(&hit.place_id).await?.unwrap_or_default();
        let address = non_empty(details.formatted_address).or(non_empty(hit.formatted_address));
        let hours = details
            .opening_hours
            .map(|hours| hours.weekday_text.join("\n"))
            .and_then(|hours| non_empty(Some(hours)));

        Ok(PlaceDetails {
            map_link: maps_link(Some(&hit.place_id), address.as_deref()),
            address,
            hours,
            website: non_empty(details.website),
            found: true,
        })
    }

    async fn text_search(&self, query: &str) -> Result<Option<TextSearchResult>> {
        let mut url = self
            .base_url
            .join("maps/api/place/textsearch/json")
            .context("failed to build places text search URL")?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("key", &self.api_key);

        let response: TextSearchResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("places text search request failed")?
            .error_for_status()
            .context("places text search returned error status")?
            .json()
            .await
            .context("failed to deserialize places text search response")?;

        match response.status.as_str() {
            "OK" => Ok(response.results.into_iter().next()),
            "ZERO_RESULTS" => Ok(None),
            status => bail!(
                "places text search returned {status}: {}",
                response.error_message.unwrap_or_default()
            ),
        }
    }

    async fn details(&self, place_id: &str) -> Result<Option<DetailsResult>> {
        let mut url = self
            .base_url
            .join("maps/api/place/details/json")
            .context("failed to build places details URL")?;
        url.query_pairs_mut()
            .append_pair("place_id", place_id)
            .append_pair("fields", DETAIL_FIELDS)
            .append_pair("key", &self.api_key);

        let response: DetailsResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("places details request failed")?
            .error_for_status()
            .context("places details returned error status")?
            .json()
            .await
            .context("failed to deserialize places details response")?;

        match response.status.as_str() {
            "OK" => Ok(response.result),
            "ZERO_RESULTS" | "NOT_FOUND" => Ok(None),
            status => bail!(
                "places details returned {status}: {}",
                response.error_message.unwrap_or_default()
            ),
        }
    }
}

/// Place-id links are exact; address search links are the fallback.
pub(crate) fn maps_link(place_id: Option<&str>, address: Option<&str>) -> Option<String> {
    if let Some(place_id) = place_id.filter(|id| !id.is_empty()) {
        return Some(format!(
            "https://maps.google.com/maps/place/?q=place_id:{place_id}"
        ));
    }
    address.filter(|a| !a.trim().is_empty()).map(|address| {
        let encoded: String = url::form_urlencoded::byte_serialize(address.as_bytes()).collect();
        format!("https://maps.google.com/maps/search/{encoded}")
    })
}
