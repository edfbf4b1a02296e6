//! Location stage group: AI extraction of place candidates, then places
//! enrichment and the validation filter.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::model::{AnalysisHints, DroppedCandidate, PlaceCandidate, PlaceDetails, StageOutcome};
use crate::util::error::StageError;

pub(crate) mod providers;

#[async_trait]
pub trait AnalyzeStage: Send + Sync {
    async fn analyze(
        &self,
        combined_text: &str,
        hints: &AnalysisHints,
    ) -> Result<Vec<PlaceCandidate>, StageError>;
}

#[async_trait]
pub trait EnrichStage: Send + Sync {
    async fn enrich(&self, name: &str, context_hint: &str) -> Result<PlaceDetails, StageError>;
}

/// Candidates that survived validation plus the ones that did not.
#[derive(Debug, Default)]
pub(crate) struct EnrichReport {
    pub(crate) validated: Vec<PlaceCandidate>,
    pub(crate) dropped: Vec<DroppedCandidate>,
    /// Lookups that errored, as opposed to finding nothing.
    pub(crate) errors: usize,
}

impl EnrichReport {
    /// Per-candidate failures only drop that candidate; the stage itself
    /// fails when every lookup errored.
    pub(crate) fn outcome(&self) -> StageOutcome {
        let attempted = self.validated.len() + self.dropped.len();
        let detail = format!(
            "{} validated, {} dropped",
            self.validated.len(),
            self.dropped.len()
        );
        if attempted > 0 && self.errors == attempted {
            StageOutcome::failed(format!("every places lookup failed ({attempted})"))
                .with_detail(detail)
        } else {
            StageOutcome::succeeded().with_detail(detail)
        }
    }
}

#[derive(Clone)]
pub struct LocationStageGroup {
    analyze: Arc<dyn AnalyzeStage>,
    enrich: Arc<dyn EnrichStage>,
}

impl LocationStageGroup {
    #[must_use]
    pub fn new(analyze: Arc<dyn AnalyzeStage>, enrich: Arc<dyn EnrichStage>) -> Self {
        Self { analyze, enrich }
    }

    pub(crate) async fn analyze(
        &self,
        combined_text: &str,
        hints: &AnalysisHints,
    ) -> Result<Vec<PlaceCandidate>, StageError> {
        let candidates = self.analyze.analyze(combined_text, hints).await?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| !candidate.name.trim().is_empty())
            .map(|candidate| PlaceCandidate {
                validated: false,
                ..candidate
            })
            .collect())
    }

    /// Enriches candidates one by one. A failed or empty lookup drops only
    /// that candidate.
    pub(crate) async fn enrich_all(&self, candidates: Vec<PlaceCandidate>) -> EnrichReport {
        let mut report = EnrichReport::default();

        for mut candidate in candidates {
            let hint = candidate.context_hint();
            match self.enrich.enrich(&candidate.name, &hint).await {
                Ok(details) => match validate(&mut candidate, &details) {
                    Ok(()) => {
                        debug!(name = %candidate.name, "candidate validated");
                        report.validated.push(candidate);
                    }
                    Err(reason) => {
                        info!(name = %candidate.name, reason, "dropping candidate");
                        report.dropped.push(DroppedCandidate {
                            name: candidate.name,
                            reason: reason.to_string(),
                        });
                    }
                },
                Err(error) => {
                    warn!(name = %candidate.name, error = %error, "places lookup failed");
                    report.errors += 1;
                    report.dropped.push(DroppedCandidate {
                        name: candidate.name,
                        reason: error.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Validation filter: a candidate is kept only when the lookup resolved it
/// to a real address. Merges the lookup into the candidate when it passes.
fn validate(candidate: &mut PlaceCandidate, details: &PlaceDetails) -> Result<(), &'static str> {
    if !details.found {
        return Err("no matching place");
    }
    candidate.apply(details);
    if candidate
        .address
        .as_deref()
        .is_none_or(|address| address.trim().is_empty())
    {
        candidate.validated = false;
        return Err("place has no resolvable address");
    }
    candidate.validated = true;
    Ok(())
}
