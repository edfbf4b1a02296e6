/// Notion データベースクライアント。
///
/// 場所レコードの重複確認と作成、未処理URLの取得とステータス更新を行います。
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::{
    Client, RequestBuilder, Url,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::HttpEndpoint;
use crate::pipeline::model::{PendingUrl, PlaceCandidate};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;

/// Notion caps a single rich text item at 2000 characters.
const MAX_RICH_TEXT: usize = 2000;

pub(crate) const PROP_NAME: &str = "Name of Place";
pub(crate) const PROP_SOURCE_URL: &str = "Source URL";
pub(crate) const PROP_PENDING_URL: &str = "URL";
pub(crate) const PROP_CREATED: &str = "Created";
pub(crate) const PROP_STATUS: &str = "Status";
pub(crate) const STATUS_PENDING: &str = "Pending";

#[derive(Debug, Clone)]
pub(crate) struct NotionClient {
    client: Client,
    base_url: Url,
    auth: HeaderValue,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Page>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    #[serde(default)]
    properties: Map<String, Value>,
}

impl NotionClient {
    /// # Errors
    /// URLのパース、認証ヘッダーの構築、HTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(endpoint: &HttpEndpoint, api_key: &str) -> Result<Self> {
        let (client, base_url) = endpoint.connect("notion")?;
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("notion api key is not a valid header value")?;
        auth.set_sensitive(true);
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, self.auth.clone())
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Existing place page for the same name and source URL, if any.
    pub(crate) async fn find_place(
        &self,
        database_id: &str,
        name: &str,
        source_url: &str,
    ) -> Result<Option<String>> {
        let filter = json!({
            "and": [
                {"property": PROP_NAME, "title": {"equals": name}},
                {"property": PROP_SOURCE_URL, "url": {"equals": source_url}}
            ]
        });
        let page = self.query(database_id, &filter, None, 1).await?;
        Ok(page.results.into_iter().next().map(|page| page.id))
    }

    /// Creates a place page and returns its id.
    pub(crate) async fn create_place(
        &self,
        database_id: &str,
        candidate: &PlaceCandidate,
        source_url: &str,
    ) -> Result<String> {
        let url = self
            .base_url
            .join("v1/pages")
            .context("failed to build notion pages URL")?;
        let body = json!({
            "parent": {"database_id": database_id},
            "properties": place_properties(candidate, source_url),
        });

        let page: Page = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await
            .context("notion create page request failed")?
            .error_for_status()
            .context("notion create page returned error status")?
            .json()
            .await
            .context("failed to deserialize notion page")?;

        Ok(page.id)
    }

    /// Pages created on or after `today` whose status is still pending.
    /// Pages without a URL are skipped.
    pub(crate) async fn pending_urls(
        &self,
        database_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<PendingUrl>> {
        let filter = json!({
            "and": [
                {"property": PROP_CREATED, "date": {"on_or_after": today.format("%Y-%m-%d").to_string()}},
                {"property": PROP_STATUS, "select": {"equals": STATUS_PENDING}}
            ]
        });

        let mut pending = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .query(database_id, &filter, cursor.as_deref(), PAGE_SIZE)
                .await?;
            for result in page.results {
                match url_property(&result.properties, PROP_PENDING_URL) {
                    Some(source_url) => pending.push(PendingUrl {
                        source_url,
                        source_record_id: result.id,
                    }),
                    None => debug!(page_id = %result.id, "pending page has no url, skipping"),
                }
            }
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(pending)
    }

    /// Sets the `Status` select of a page.
    pub(crate) async fn set_status(&self, page_id: &str, status: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("v1/pages/{page_id}"))
            .context("failed to build notion page URL")?;
        let body = json!({
            "properties": {PROP_STATUS: {"select": {"name": status}}}
        });

        self.authorized(self.client.patch(url))
            .json(&body)
            .send()
            .await
            .context("notion update page request failed")?
            .error_for_status()
            .context("notion update page returned error status")?;
        Ok(())
    }

    async fn query(
        &self,
        database_id: &str,
        filter: &Value,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<QueryResponse> {
        let url = self
            .base_url
            .join(&format!("v1/databases/{database_id}/query"))
            .context("failed to build notion query URL")?;
        let mut body = json!({"filter": filter, "page_size": page_size});
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        self.authorized(self.client.post(url))
            .json(&body)
            .send()
            .await
            .context("notion query request failed")?
            .error_for_status()
            .context("notion query returned error status")?
            .json()
            .await
            .context("failed to deserialize notion query response")
    }
}

fn rich_text(content: &str, link: Option<&str>) -> Value {
    let content: String = content.chars().take(MAX_RICH_TEXT).collect();
    let mut text = json!({"content": content});
    if let Some(link) = link {
        text["link"] = json!({"url": link});
    }
    json!({"rich_text": [{"text": text}]})
}

/// Page properties for a place record.
pub(crate) fn place_properties(candidate: &PlaceCandidate, source_url: &str) -> Value {
    let mut properties = Map::new();
    properties.insert(
        PROP_NAME.into(),
        json!({"title": [{"text": {"content": candidate.name}}]}),
    );
    properties.insert(PROP_SOURCE_URL.into(), json!({"url": source_url}));
    if let Some(address) = &candidate.address {
        properties.insert(
            "Address".into(),
            rich_text(address, candidate.map_link.as_deref()),
        );
    }
    if !candidate.categories.is_empty() {
        let options: Vec<Value> = candidate
            .categories
            .iter()
            // Multi-select option names cannot contain commas.
            .map(|category| json!({"name": category.replace(',', " ")}))
            .collect();
        properties.insert("Categories".into(), json!({"multi_select": options}));
    }
    if let Some(recommendations) = &candidate.recommendations {
        properties.insert("Recommendations".into(), rich_text(recommendations, None));
    }
    if let Some(hours) = &candidate.hours {
        properties.insert("Hours".into(), rich_text(hours, None));
    }
    if let Some(website) = &candidate.website {
        properties.insert("Website".into(), json!({"url": website}));
    }
    properties.insert("Is Popup".into(), json!({"checkbox": candidate.is_popup}));
    properties.insert("Visited".into(), json!({"checkbox": candidate.visited}));
    Value::Object(properties)
}

fn url_property(properties: &Map<String, Value>, name: &str) -> Option<String> {
    properties
        .get(name)?
        .get("url")?
        .as_str()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_endpoint;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NotionClient {
        NotionClient::new(&test_endpoint(server.uri()), "secret").expect("client")
    }

    #[test]
    fn place_properties_link_address_to_map() {
        let mut candidate = PlaceCandidate::named("Ichiran");
        candidate.address = Some("1-22-7 Jinnan".into());
        candidate.map_link = Some("https://maps.google.com/maps/place/?q=place_id:p".into());
        candidate.categories.insert("ramen, noodles".into());

        let properties = place_properties(&candidate, "https://example.com/video/1");

        assert_eq!(
            properties["Name of Place"]["title"][0]["text"]["content"],
            "Ichiran"
        );
        assert_eq!(
            properties["Address"]["rich_text"][0]["text"]["link"]["url"],
            "https://maps.google.com/maps/place/?q=place_id:p"
        );
        assert_eq!(
            properties["Categories"]["multi_select"][0]["name"],
            "ramen  noodles"
        );
        assert_eq!(properties["Visited"]["checkbox"], false);
        assert!(properties.get("Hours").is_none());
    }

    #[tokio::test]
    async fn find_place_filters_on_name_and_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/places-db/query"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "filter": {"and": [
                    {"property": "Name of Place", "title": {"equals": "Ichiran"}},
                    {"property": "Source URL", "url": {"equals": "https://example.com/video/1"}}
                ]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "page-1", "properties": {}}],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let found = client(&server)
            .find_place("places-db", "Ichiran", "https://example.com/video/1")
            .await
            .expect("query");
        assert_eq!(found.as_deref(), Some("page-1"));
    }

    #[tokio::test]
    async fn pending_urls_follow_pagination_and_skip_pages_without_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/source-db/query"))
            .and(body_partial_json(json!({"start_cursor": "c2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "p3", "properties": {"URL": {"type": "url", "url": "https://example.com/video/3"}}}],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/source-db/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": "p1", "properties": {"URL": {"type": "url", "url": "https://example.com/video/1"}}},
                    {"id": "p2", "properties": {"URL": {"type": "url", "url": null}}}
                ],
                "has_more": true,
                "next_cursor": "c2"
            })))
            .mount(&server)
            .await;

        let today = NaiveDate::from_ymd_opt(2026, 10, 18).expect("date");
        let pending = client(&server)
            .pending_urls("source-db", today)
            .await
            .expect("pending");

        assert_eq!(
            pending,
            vec![
                PendingUrl {
                    source_url: "https://example.com/video/1".into(),
                    source_record_id: "p1".into(),
                },
                PendingUrl {
                    source_url: "https://example.com/video/3".into(),
                    source_record_id: "p3".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn set_status_patches_the_select() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/pages/p1"))
            .and(body_partial_json(json!({
                "properties": {"Status": {"select": {"name": "Completed"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "p1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_status("p1", "Completed")
            .await
            .expect("update");
    }
}
