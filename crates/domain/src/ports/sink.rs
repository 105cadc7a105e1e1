use async_trait::async_trait;
use diagnosis_errors::DiagnosisResult;

use crate::models::JobSnapshot;

/// Persistence/reporting collaborator, handed each finished job exactly once.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, snapshot: &JobSnapshot) -> DiagnosisResult<()>;
}
