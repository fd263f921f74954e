//! Best-effort audit trail in Postgres: one row per completed analysis and
//! one per disbursed payout. The orchestrator spawns these appends and logs
//! failures; they are never surfaced to the user.

use async_trait::async_trait;
use claim_flow::{AuditLog, ClaimError, DamageReport, Policy, Result};
use sqlx::PgPool;

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn record_assessment(&self, session_id: &str, report: &DamageReport) -> Result<()> {
        let damage_summary = serde_json::to_value(&report.damage_summary)
            .map_err(|e| ClaimError::Upstream(format!("audit serialization failed: {e}")))?;
        sqlx::query(
            "INSERT INTO assessments \
                 (session_id, vehicle_make, vehicle_model, vehicle_year, vehicle_plate, \
                  damage_summary, severity, confidence_score, is_consistent) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(session_id)
        .bind(&report.vehicle_info.make)
        .bind(&report.vehicle_info.model)
        .bind(report.vehicle_info.year.as_deref())
        .bind(report.vehicle_info.plate.as_deref())
        .bind(damage_summary)
        .bind(report.severity.as_str())
        .bind(report.confidence_score)
        .bind(report.is_consistent)
        .execute(&self.pool)
        .await
        .map_err(|e| ClaimError::Upstream(format!("assessment audit insert failed: {e}")))?;
        Ok(())
    }

    async fn record_payout(
        &self,
        session_id: &str,
        policy: &Policy,
        amount: i64,
        severity: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO claims (session_id, plate_number, owner_name, amount, severity, status) \
             VALUES ($1, $2, $3, $4, $5, 'disbursed')",
        )
        .bind(session_id)
        .bind(&policy.plate_number)
        .bind(&policy.owner_name)
        .bind(amount)
        .bind(severity)
        .execute(&self.pool)
        .await
        .map_err(|e| ClaimError::Upstream(format!("claim audit insert failed: {e}")))?;
        Ok(())
    }
}
