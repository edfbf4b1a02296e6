//! Source of URLs queued for the scheduled sweep.
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::model::{PendingUrlBatch, ProcessedStatus};
use crate::{
    clients::NotionClient,
    util::{error::StageError, retry::CallPolicy},
};

#[async_trait]
pub trait PendingSource: Send + Sync {
    /// URLs waiting to be processed, in the order they should run.
    async fn pending(&self) -> Result<PendingUrlBatch, StageError>;

    async fn mark_processed(
        &self,
        source_record_id: &str,
        status: ProcessedStatus,
    ) -> Result<(), StageError>;
}

/// Pending pages created today (UTC) in the Notion source database.
pub(crate) struct NotionPendingSource {
    client: NotionClient,
    database_id: String,
    policy: CallPolicy,
}

impl NotionPendingSource {
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
impl PendingSource for NotionPendingSource {
    async fn pending(&self) -> Result<PendingUrlBatch, StageError> {
        let today = Utc::now().date_naive();
        let client = &self.client;
        let database_id = self.database_id.as_str();
        let batch = self
            .policy
            .call("notion", || client.pending_urls(database_id, today))
            .await?;
        info!(count = batch.len(), %today, "pending urls fetched");
        Ok(batch)
    }

    async fn mark_processed(
        &self,
        source_record_id: &str,
        status: ProcessedStatus,
    ) -> Result<(), StageError> {
        let client = &self.client;
        self.policy
            .call("notion", || client.set_status(source_record_id, status.as_str()))
            .await
    }
}
