//! Narrow interfaces over the pipeline's external collaborators, so the
//! estimator and the session state machine can be exercised with
//! deterministic fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DamageReport, ImagePayload, PartPrice, PayoutReceipt, PayoutRequest, Policy};

#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Produce a structured damage report for one image. The model is not
    /// deterministic: repeated calls on the same image may yield different
    /// reports.
    async fn analyze(&self, image: &ImagePayload) -> Result<DamageReport>;
}

#[async_trait]
pub trait PartsStore: Send + Sync {
    /// Candidate parts for an exact make/model match, restricted to rows
    /// whose year range contains `year` when one is known.
    async fn find_parts(
        &self,
        make: &str,
        model: &str,
        year: Option<i32>,
    ) -> Result<Vec<PartPrice>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Look up exactly one policy by normalized plate. `Ok(None)` is a
    /// not-found outcome, distinct from a store failure.
    async fn find_by_plate(&self, plate: &str) -> Result<Option<Policy>>;
}

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn disburse(&self, request: &PayoutRequest) -> Result<PayoutReceipt>;
}

/// Best-effort audit trail. Callers log append failures and never surface
/// them to the user.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_assessment(&self, session_id: &str, report: &DamageReport) -> Result<()>;

    async fn record_payout(
        &self,
        session_id: &str,
        policy: &Policy,
        amount: i64,
        severity: &str,
    ) -> Result<()>;
}
