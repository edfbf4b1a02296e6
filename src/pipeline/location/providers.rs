//! Gemini analysis and Google Places enrichment behind the location traits.
use async_trait::async_trait;

use super::{AnalyzeStage, EnrichStage};
use crate::{
    clients::{GeminiClient, PlacesClient},
    pipeline::model::{AnalysisHints, PlaceCandidate, PlaceDetails},
    util::{error::StageError, retry::CallPolicy},
};

pub(crate) struct GeminiAnalyzeStage {
    client: GeminiClient,
    policy: CallPolicy,
}

impl GeminiAnalyzeStage {
    pub(crate) fn new(client: GeminiClient, policy: CallPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl AnalyzeStage for GeminiAnalyzeStage {
    async fn analyze(
        &self,
        combined_text: &str,
        hints: &AnalysisHints,
    ) -> Result<Vec<PlaceCandidate>, StageError> {
        let client = &self.client;
        self.policy
            .call("gemini", || client.extract_places(combined_text, hints))
            .await
    }
}

pub(crate) struct PlacesEnrichStage {
    client: PlacesClient,
    policy: CallPolicy,
}

impl PlacesEnrichStage {
    pub(crate) fn new(client: PlacesClient, policy: CallPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl EnrichStage for PlacesEnrichStage {
    async fn enrich(&self, name: &str, context_hint: &str) -> Result<PlaceDetails, StageError> {
        let client = &self.client;
        self.policy
            .call("places", || client.lookup(name, context_hint))
            .await
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

    fn policy(max_attempts: usize) -> CallPolicy {
        CallPolicy::new(
            RetryConfig::new(max_attempts, 0, 0),
            Duration::from_secs(5),
            Arc::new(Semaphore::new(1)),
        )
    }

    #[tokio::test]
    async fn places_server_errors_are_retried_then_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/place/textsearch/json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let stage = PlacesEnrichStage::new(
            PlacesClient::new(&test_endpoint(server.uri()), "k").expect("client"),
            policy(3),
        );
        let error = stage.enrich("Cafe", "").await.expect_err("should fail");
        assert!(matches!(error, StageError::Provider { provider: "places", .. }));
    }

    #[tokio::test]
    async fn places_not_found_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/place/textsearch/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ZERO_RESULTS", "results": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stage = PlacesEnrichStage::new(
            PlacesClient::new(&test_endpoint(server.uri()), "k").expect("client"),
            policy(3),
        );
        let details = stage.enrich("Nowhere", "").await.expect("lookup");
        assert!(!details.found);
    }
}
