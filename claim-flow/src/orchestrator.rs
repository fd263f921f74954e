//! Claim pipeline state machine: upload -> analyzed -> verified -> disbursed.
//!
//! Each transition claims its session, performs the stage's external calls
//! without holding the session entry, and commits only if the session was not
//! reset in the meantime. External calls are bounded by per-stage deadlines;
//! a deadline expiry is reported as a retryable upstream failure. Audit
//! appends are fire-and-forget and never affect the visible transition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{ClaimError, Result};
use crate::estimator::estimate;
use crate::model::{
    DamageReport, ImagePayload, PartPrice, PayoutRequest, Policy, Severity, normalize_plate,
};
use crate::ports::{AuditLog, PartsStore, PayoutGateway, PolicyStore, VisionClient};
use crate::session::{ClaimSession, ClaimStage, SessionStore};

pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PAYOUT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ClaimOrchestrator {
    sessions: SessionStore,
    vision: Arc<dyn VisionClient>,
    parts: Arc<dyn PartsStore>,
    policies: Arc<dyn PolicyStore>,
    payouts: Arc<dyn PayoutGateway>,
    audit: Arc<dyn AuditLog>,
}

impl ClaimOrchestrator {
    pub fn new(
        vision: Arc<dyn VisionClient>,
        parts: Arc<dyn PartsStore>,
        policies: Arc<dyn PolicyStore>,
        payouts: Arc<dyn PayoutGateway>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            vision,
            parts,
            policies,
            payouts,
            audit,
        }
    }

    pub fn create_session(&self) -> ClaimSession {
        let session = self.sessions.create();
        info!(session_id = %session.id, "claim session created");
        session
    }

    pub fn session(&self, id: &str) -> Result<ClaimSession> {
        self.sessions.get(id)
    }

    /// User-triggered reset or cancel. Any in-flight request is abandoned and
    /// its result discarded on arrival.
    pub fn reset(&self, id: &str) -> Result<ClaimSession> {
        let session = self.sessions.reset(id)?;
        info!(session_id = %id, "claim session reset");
        Ok(session)
    }

    /// Upload -> Analyzed. Runs vision analysis, fetches candidate parts for
    /// the identified vehicle and prices the report. On any failure the
    /// session stays in Upload with the error recorded for display.
    pub async fn analyze(&self, session_id: &str, image: ImagePayload) -> Result<ClaimSession> {
        let guard = self.sessions.begin(session_id, ClaimStage::Upload, "analyze")?;
        info!(session_id = %session_id, "analyzing uploaded image");

        match self.run_analysis(&image).await {
            Ok((report, candidate_parts, total)) => {
                let audit_report = report.clone();
                let updated = self.sessions.complete(guard, move |session| {
                    session.stage = ClaimStage::Analyzed;
                    session.report = Some(report);
                    session.matched_parts = candidate_parts;
                    session.estimate = Some(total);
                })?;
                info!(session_id = %session_id, estimate = total, "image analyzed and priced");
                self.spawn_assessment_audit(session_id.to_string(), audit_report);
                Ok(updated)
            }
            Err(err) => {
                self.sessions.fail(guard, &err.to_string());
                Err(err)
            }
        }
    }

    async fn run_analysis(
        &self,
        image: &ImagePayload,
    ) -> Result<(DamageReport, Vec<PartPrice>, i64)> {
        let report =
            with_deadline(ANALYSIS_TIMEOUT, "vision analysis", self.vision.analyze(image)).await?;
        // Parts lookup strictly follows analysis: it needs the identified vehicle.
        let year = report.vehicle_info.year_number();
        let candidates = with_deadline(
            STORE_TIMEOUT,
            "parts lookup",
            self.parts
                .find_parts(&report.vehicle_info.make, &report.vehicle_info.model, year),
        )
        .await?;
        let total = estimate(&report, &candidates);
        Ok((report, candidates, total))
    }

    /// Analyzed -> Verified. Normalizes the plate and looks up exactly one
    /// policy. Not-found and lookup-failed are distinct outcomes; both leave
    /// the session in Analyzed.
    pub async fn verify(&self, session_id: &str, plate: &str) -> Result<ClaimSession> {
        let plate = normalize_plate(plate);
        if plate.is_empty() {
            return Err(ClaimError::Validation("plate number is required".to_string()));
        }
        let guard = self.sessions.begin(session_id, ClaimStage::Analyzed, "verify")?;
        info!(session_id = %session_id, plate = %plate, "verifying policy");

        let lookup = with_deadline(
            STORE_TIMEOUT,
            "policy lookup",
            self.policies.find_by_plate(&plate),
        )
        .await;
        match lookup {
            Ok(Some(policy)) => {
                let updated = self.sessions.complete(guard, move |session| {
                    session.stage = ClaimStage::Verified;
                    session.policy = Some(policy);
                })?;
                info!(session_id = %session_id, "policy verified");
                Ok(updated)
            }
            Ok(None) => {
                let err = ClaimError::NotFound(format!("no policy found for plate {plate}"));
                self.sessions.fail(guard, &err.to_string());
                Err(err)
            }
            Err(err) => {
                self.sessions.fail(guard, &err.to_string());
                Err(err)
            }
        }
    }

    /// Verified -> Disbursed. Pays out the current estimate to the verified
    /// policy holder. Holding the Verified stage guarantees both the priced
    /// report and the policy are present.
    pub async fn disburse(&self, session_id: &str) -> Result<ClaimSession> {
        let guard = self.sessions.begin(session_id, ClaimStage::Verified, "disburse")?;
        let (amount, policy, severity) = match (
            guard.snapshot.estimate,
            guard.snapshot.policy.clone(),
            guard.snapshot.report.as_ref().map(|r| r.severity),
        ) {
            (Some(amount), Some(policy), Some(severity)) => (amount, policy, severity),
            _ => {
                let err = ClaimError::InvalidTransition {
                    from: guard.snapshot.stage,
                    action: "disburse",
                };
                self.sessions.fail(guard, &err.to_string());
                return Err(err);
            }
        };
        info!(session_id = %session_id, amount, "disbursing payout");

        let request = PayoutRequest {
            amount,
            plate: policy.plate_number.clone(),
            owner_name: policy.owner_name.clone(),
        };
        match with_deadline(PAYOUT_TIMEOUT, "payout", self.payouts.disburse(&request)).await {
            Ok(receipt) => {
                let updated = self.sessions.complete(guard, move |session| {
                    session.stage = ClaimStage::Disbursed;
                    session.receipt = Some(receipt);
                })?;
                info!(session_id = %session_id, "payout disbursed");
                self.spawn_payout_audit(session_id.to_string(), policy, amount, severity);
                Ok(updated)
            }
            Err(err) => {
                self.sessions.fail(guard, &err.to_string());
                Err(err)
            }
        }
    }

    fn spawn_assessment_audit(&self, session_id: String, report: DamageReport) {
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(err) = audit.record_assessment(&session_id, &report).await {
                warn!(session_id = %session_id, error = %err, "assessment audit write failed");
            }
        });
    }

    fn spawn_payout_audit(&self, session_id: String, policy: Policy, amount: i64, severity: Severity) {
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(err) = audit
                .record_payout(&session_id, &policy, amount, severity.as_str())
                .await
            {
                warn!(session_id = %session_id, error = %err, "payout audit write failed");
            }
        });
    }
}

async fn with_deadline<T>(
    limit: Duration,
    stage: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClaimError::Upstream(format!(
            "{stage} timed out after {}s",
            limit.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PayoutReceipt, PolicyStatus, VehicleInfo};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use tokio::sync::Notify;

    fn sample_report() -> DamageReport {
        DamageReport {
            vehicle_info: VehicleInfo {
                make: "Toyota".to_string(),
                model: "Camry".to_string(),
                year: Some("2018".to_string()),
                plate: Some("LAG-123-ABC".to_string()),
            },
            damage_summary: vec!["Front bumper crack".to_string()],
            severity: Severity::Moderate,
            confidence_score: 0.91,
            is_consistent: true,
        }
    }

    fn bumper_part() -> PartPrice {
        PartPrice {
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year_start: 2015,
            year_end: 2020,
            part_name: "Bumper".to_string(),
            price_tokunbo: 40_000,
            price_new: 95_000,
            labor_cost: 10_000,
        }
    }

    fn sample_policy() -> Policy {
        Policy {
            plate_number: "LAG-123-ABC".to_string(),
            owner_name: "Adaeze Okafor".to_string(),
            insurance_company: "Leadway Assurance".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2027, 3, 14).unwrap(),
            status: PolicyStatus::Active,
        }
    }

    fn sample_image() -> ImagePayload {
        ImagePayload::from_request("data:image/jpeg;base64,/9j/4AAQSkZJRg==").unwrap()
    }

    struct StaticVision(DamageReport);

    #[async_trait]
    impl VisionClient for StaticVision {
        async fn analyze(&self, _image: &ImagePayload) -> Result<DamageReport> {
            Ok(self.0.clone())
        }
    }

    struct FailingVision;

    #[async_trait]
    impl VisionClient for FailingVision {
        async fn analyze(&self, _image: &ImagePayload) -> Result<DamageReport> {
            Err(ClaimError::Upstream("vision model unavailable".to_string()))
        }
    }

    /// Blocks inside the vision call until released, signalling entry.
    struct GatedVision {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        report: DamageReport,
    }

    #[async_trait]
    impl VisionClient for GatedVision {
        async fn analyze(&self, _image: &ImagePayload) -> Result<DamageReport> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.report.clone())
        }
    }

    /// Applies the same make/model/year predicate the SQL store does.
    struct StaticParts(Vec<PartPrice>);

    #[async_trait]
    impl PartsStore for StaticParts {
        async fn find_parts(
            &self,
            make: &str,
            model: &str,
            year: Option<i32>,
        ) -> Result<Vec<PartPrice>> {
            Ok(self
                .0
                .iter()
                .filter(|p| p.make == make && p.model == model)
                .filter(|p| year.is_none_or(|y| p.covers_year(y)))
                .cloned()
                .collect())
        }
    }

    struct PolicyTable {
        policies: Vec<Policy>,
        fail: bool,
    }

    #[async_trait]
    impl PolicyStore for PolicyTable {
        async fn find_by_plate(&self, plate: &str) -> Result<Option<Policy>> {
            if self.fail {
                return Err(ClaimError::Upstream("policy store unavailable".to_string()));
            }
            Ok(self
                .policies
                .iter()
                .find(|p| p.plate_number.to_uppercase() == plate)
                .cloned())
        }
    }

    struct InstantPayout;

    #[async_trait]
    impl PayoutGateway for InstantPayout {
        async fn disburse(&self, request: &PayoutRequest) -> Result<PayoutReceipt> {
            Ok(PayoutReceipt {
                transaction_id: "TXN-TEST00001".to_string(),
                reference: "REF-1".to_string(),
                amount: request.amount,
                currency: "NGN".to_string(),
                recipient: request.owner_name.clone(),
                timestamp: Utc::now(),
            })
        }
    }

    struct NullAudit;

    #[async_trait]
    impl AuditLog for NullAudit {
        async fn record_assessment(&self, _: &str, _: &DamageReport) -> Result<()> {
            Ok(())
        }
        async fn record_payout(&self, _: &str, _: &Policy, _: i64, _: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FailingAudit;

    #[async_trait]
    impl AuditLog for FailingAudit {
        async fn record_assessment(&self, _: &str, _: &DamageReport) -> Result<()> {
            Err(ClaimError::Upstream("audit table missing".to_string()))
        }
        async fn record_payout(&self, _: &str, _: &Policy, _: i64, _: &str) -> Result<()> {
            Err(ClaimError::Upstream("audit table missing".to_string()))
        }
    }

    fn orchestrator(
        vision: Arc<dyn VisionClient>,
        parts: Vec<PartPrice>,
        policies: Vec<Policy>,
        policy_store_fails: bool,
    ) -> ClaimOrchestrator {
        ClaimOrchestrator::new(
            vision,
            Arc::new(StaticParts(parts)),
            Arc::new(PolicyTable {
                policies,
                fail: policy_store_fails,
            }),
            Arc::new(InstantPayout),
            Arc::new(NullAudit),
        )
    }

    #[tokio::test]
    async fn full_pipeline_happy_path() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![bumper_part()],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();

        let analyzed = orch.analyze(&session.id, sample_image()).await.unwrap();
        assert_eq!(analyzed.stage, ClaimStage::Analyzed);
        // Bumper matched: 40_000 + 10_000, not the Moderate base of 150_000.
        assert_eq!(analyzed.estimate, Some(50_000));
        assert_eq!(analyzed.matched_parts.len(), 1);

        let verified = orch.verify(&session.id, "  lag-123-abc ").await.unwrap();
        assert_eq!(verified.stage, ClaimStage::Verified);
        assert_eq!(
            verified.policy.as_ref().map(|p| p.owner_name.as_str()),
            Some("Adaeze Okafor")
        );

        let disbursed = orch.disburse(&session.id).await.unwrap();
        assert_eq!(disbursed.stage, ClaimStage::Disbursed);
        let receipt = disbursed.receipt.unwrap();
        assert_eq!(receipt.amount, 50_000);
        assert_eq!(receipt.currency, "NGN");
    }

    #[tokio::test]
    async fn empty_candidate_parts_fall_back_to_severity_base() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();
        let analyzed = orch.analyze(&session.id, sample_image()).await.unwrap();
        assert_eq!(analyzed.estimate, Some(150_000));
    }

    #[tokio::test]
    async fn year_outside_part_range_excludes_candidate() {
        let mut report = sample_report();
        report.vehicle_info.year = Some("2021".to_string());
        let orch = orchestrator(
            Arc::new(StaticVision(report)),
            vec![bumper_part()],
            vec![],
            false,
        );
        let session = orch.create_session();
        let analyzed = orch.analyze(&session.id, sample_image()).await.unwrap();
        assert!(analyzed.matched_parts.is_empty());
        assert_eq!(analyzed.estimate, Some(150_000));
    }

    #[tokio::test]
    async fn disburse_before_verify_is_rejected() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![bumper_part()],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();
        orch.analyze(&session.id, sample_image()).await.unwrap();

        let err = orch.disburse(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            ClaimError::InvalidTransition {
                from: ClaimStage::Analyzed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn verify_before_analyze_is_rejected() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();
        let err = orch.verify(&session.id, "LAG-123-ABC").await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn failed_analysis_stays_in_upload_with_error_recorded() {
        let orch = orchestrator(Arc::new(FailingVision), vec![], vec![], false);
        let session = orch.create_session();

        let err = orch.analyze(&session.id, sample_image()).await.unwrap_err();
        assert!(matches!(err, ClaimError::Upstream(_)));

        let current = orch.session(&session.id).unwrap();
        assert_eq!(current.stage, ClaimStage::Upload);
        assert!(current.last_error.is_some());

        // The stage is retryable after the failure.
        assert!(matches!(
            orch.analyze(&session.id, sample_image()).await.unwrap_err(),
            ClaimError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn policy_not_found_is_distinct_from_store_error() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![],
            vec![],
            false,
        );
        let session = orch.create_session();
        orch.analyze(&session.id, sample_image()).await.unwrap();
        let err = orch.verify(&session.id, "PHC-789-QW").await.unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));
        assert_eq!(orch.session(&session.id).unwrap().stage, ClaimStage::Analyzed);

        let failing = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![],
            vec![sample_policy()],
            true,
        );
        let session = failing.create_session();
        failing.analyze(&session.id, sample_image()).await.unwrap();
        let err = failing.verify(&session.id, "LAG-123-ABC").await.unwrap_err();
        assert!(matches!(err, ClaimError::Upstream(_)));
        assert_eq!(
            failing.session(&session.id).unwrap().stage,
            ClaimStage::Analyzed
        );
    }

    #[tokio::test]
    async fn empty_plate_is_a_validation_error() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();
        orch.analyze(&session.id, sample_image()).await.unwrap();
        let err = orch.verify(&session.id, "   ").await.unwrap_err();
        assert!(matches!(err, ClaimError::Validation(_)));
    }

    #[tokio::test]
    async fn second_submit_while_in_flight_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let vision = Arc::new(GatedVision {
            entered: entered.clone(),
            release: release.clone(),
            report: sample_report(),
        });
        let orch = Arc::new(orchestrator(vision, vec![bumper_part()], vec![], false));
        let session = orch.create_session();

        let task = {
            let orch = Arc::clone(&orch);
            let id = session.id.clone();
            tokio::spawn(async move { orch.analyze(&id, sample_image()).await })
        };
        entered.notified().await;

        let err = orch.analyze(&session.id, sample_image()).await.unwrap_err();
        assert!(matches!(err, ClaimError::SessionBusy));

        release.notify_one();
        let first = task.await.unwrap().unwrap();
        assert_eq!(first.stage, ClaimStage::Analyzed);
    }

    #[tokio::test]
    async fn reset_discards_in_flight_result_on_arrival() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let vision = Arc::new(GatedVision {
            entered: entered.clone(),
            release: release.clone(),
            report: sample_report(),
        });
        let orch = Arc::new(orchestrator(vision, vec![bumper_part()], vec![], false));
        let session = orch.create_session();

        let task = {
            let orch = Arc::clone(&orch);
            let id = session.id.clone();
            tokio::spawn(async move { orch.analyze(&id, sample_image()).await })
        };
        entered.notified().await;

        let reset = orch.reset(&session.id).unwrap();
        assert_eq!(reset.stage, ClaimStage::Upload);

        release.notify_one();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ClaimError::SessionReset));

        let current = orch.session(&session.id).unwrap();
        assert_eq!(current.stage, ClaimStage::Upload);
        assert!(current.report.is_none());
        assert!(current.estimate.is_none());
    }

    #[tokio::test]
    async fn audit_failure_does_not_block_transitions() {
        let orch = ClaimOrchestrator::new(
            Arc::new(StaticVision(sample_report())),
            Arc::new(StaticParts(vec![bumper_part()])),
            Arc::new(PolicyTable {
                policies: vec![sample_policy()],
                fail: false,
            }),
            Arc::new(InstantPayout),
            Arc::new(FailingAudit),
        );
        let session = orch.create_session();
        let analyzed = orch.analyze(&session.id, sample_image()).await.unwrap();
        assert_eq!(analyzed.stage, ClaimStage::Analyzed);
        orch.verify(&session.id, "LAG-123-ABC").await.unwrap();
        let disbursed = orch.disburse(&session.id).await.unwrap();
        assert_eq!(disbursed.stage, ClaimStage::Disbursed);
    }

    #[tokio::test]
    async fn reset_after_disbursement_starts_a_fresh_claim() {
        let orch = orchestrator(
            Arc::new(StaticVision(sample_report())),
            vec![bumper_part()],
            vec![sample_policy()],
            false,
        );
        let session = orch.create_session();
        orch.analyze(&session.id, sample_image()).await.unwrap();
        orch.verify(&session.id, "LAG-123-ABC").await.unwrap();
        orch.disburse(&session.id).await.unwrap();

        let reset = orch.reset(&session.id).unwrap();
        assert_eq!(reset.stage, ClaimStage::Upload);
        assert!(reset.receipt.is_none());
        assert!(reset.policy.is_none());

        // The session can run the pipeline again from scratch.
        let analyzed = orch.analyze(&session.id, sample_image()).await.unwrap();
        assert_eq!(analyzed.stage, ClaimStage::Analyzed);
    }
}
