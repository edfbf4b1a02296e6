//! Record sink: the last stage, with the sink's own duplicate check.
use async_trait::async_trait;
use tracing::{debug, info};

use super::model::{PersistReceipt, PlaceCandidate};
use crate::{
    clients::NotionClient,
    util::{error::StageError, retry::CallPolicy},
};

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Stores `candidate` unless an equivalent record already exists.
    ///
    /// The receipt says whether this call created the record.
    async fn persist(
        &self,
        candidate: &PlaceCandidate,
        source_url: &str,
    ) -> Result<PersistReceipt, StageError>;
}

/// Places database in Notion.
pub(crate) struct NotionRecordSink {
    client: NotionClient,
    database_id: String,
    policy: CallPolicy,
}

impl NotionRecordSink {
    pub(crate) fn new(
        client: NotionClient,
        database_id: impl Into<String>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            client,
            database_id: database_id.into(),
            policy,
        }
    }
}

#[async_trait]
impl RecordSink for NotionRecordSink {
    async fn persist(
        &self,
        candidate: &PlaceCandidate,
        source_url: &str,
    ) -> Result<PersistReceipt, StageError> {
        let client = &self.client;
        let database_id = self.database_id.as_str();
        let name = candidate.name.as_str();

        let existing = self
            .policy
            .call("notion", || client.find_place(database_id, name, source_url))
            .await?;
        if let Some(record_id) = existing {
            debug!(name, record_id = %record_id, "place record already exists");
            return Ok(PersistReceipt {
                record_id,
                created: false,
            });
        }

        // Creation is not retried: a timed-out create may still have landed.
        let record_id = self
            .policy
            .single_attempt()
            .call("notion", || client.create_place(database_id, candidate, source_url))
            .await?;
        info!(name, record_id = %record_id, "place record created");
        Ok(PersistReceipt {
            record_id,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clients::test_endpoint, util::retry::RetryConfig};
    use serde_json::json;
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Semaphore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink(server: &MockServer) -> NotionRecordSink {
        NotionRecordSink::new(
            NotionClient::new(&test_endpoint(server.uri()), "secret").expect("client"),
            "places-db",
            CallPolicy::new(
                RetryConfig::new(1, 0, 0),
                Duration::from_secs(5),
                Arc::new(Semaphore::new(1)),
            ),
        )
    }

    fn candidate() -> PlaceCandidate {
        let mut candidate = PlaceCandidate::named("Ichiran");
        candidate.address = Some("1-22-7 Jinnan".into());
        candidate.validated = true;
        candidate
    }

    #[tokio::test]
    async fn existing_record_is_not_created_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/places-db/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "page-9", "properties": {}}],
                "has_more": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pages"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let receipt = sink(&server)
            .persist(&candidate(), "https://example.com/video/1")
            .await
            .expect("persist");
        assert_eq!(
            receipt,
            PersistReceipt {
                record_id: "page-9".into(),
                created: false
            }
        );
    }

    #[tokio::test]
    async fn missing_record_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/places-db/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": [], "has_more": false})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-new"})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sink(&server)
            .persist(&candidate(), "https://example.com/video/1")
            .await
            .expect("persist");
        assert!(receipt.created);
        assert_eq!(receipt.record_id, "page-new");
    }
}
