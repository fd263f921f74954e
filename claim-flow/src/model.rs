use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClaimError, Result};

/// Structured damage report produced by the vision model for one uploaded
/// image. Immutable after creation; owned by the claim session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageReport {
    pub vehicle_info: VehicleInfo,
    pub damage_summary: Vec<String>,
    pub severity: Severity,
    pub confidence_score: f64,
    pub is_consistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub make: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

impl VehicleInfo {
    /// Numeric model year, if the reported year string starts with digits.
    /// The model sometimes appends qualifiers ("2018 est."), which are
    /// ignored.
    pub fn year_number(&self) -> Option<i32> {
        let year = self.year.as_deref()?.trim();
        let digits: String = year.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Moderate,
    Structural,
    Totaled,
}

impl Severity {
    /// Flat fallback estimate in naira, used when no part name matches any
    /// damage description.
    pub fn base_estimate(self) -> i64 {
        match self {
            Severity::Minor => 50_000,
            Severity::Moderate => 150_000,
            Severity::Structural => 450_000,
            Severity::Totaled => 1_200_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "Minor",
            Severity::Moderate => "Moderate",
            Severity::Structural => "Structural",
            Severity::Totaled => "Totaled",
        }
    }
}

/// One row of the parts reference table. Seeded out of band; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartPrice {
    pub make: String,
    pub model: String,
    pub year_start: i32,
    pub year_end: i32,
    pub part_name: String,
    pub price_tokunbo: i64,
    pub price_new: i64,
    pub labor_cost: i64,
}

impl PartPrice {
    pub fn covers_year(&self, year: i32) -> bool {
        self.year_start <= year && year <= self.year_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub plate_number: String,
    pub owner_name: String,
    pub insurance_company: String,
    pub expiry_date: NaiveDate,
    pub status: PolicyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    Active,
    Expired,
}

impl PolicyStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Active" => Some(PolicyStatus::Active),
            "Expired" => Some(PolicyStatus::Expired),
            _ => None,
        }
    }
}

/// Transaction record issued by the payout gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutReceipt {
    pub transaction_id: String,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

/// Disbursement instruction sent to the payout gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub amount: i64,
    pub plate: String,
    pub owner_name: String,
}

/// Uploaded image, split into mime type and base64 payload.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImagePayload {
    /// Accepts either a `data:<mime>;base64,<payload>` URL or a bare base64
    /// string. The mime type defaults to `image/jpeg` when absent.
    pub fn from_request(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClaimError::Validation("image data is required".to_string()));
        }
        if let Some(rest) = raw.strip_prefix("data:") {
            let mime = rest.split(';').next().unwrap_or("");
            let mime_type = if mime.is_empty() {
                "image/jpeg".to_string()
            } else {
                mime.to_string()
            };
            let base64_data = raw
                .split(',')
                .nth(1)
                .filter(|data| !data.is_empty())
                .ok_or_else(|| {
                    ClaimError::Validation("image data URL carries no payload".to_string())
                })?
                .to_string();
            Ok(Self {
                mime_type,
                base64_data,
            })
        } else {
            Ok(Self {
                mime_type: "image/jpeg".to_string(),
                base64_data: raw.to_string(),
            })
        }
    }
}

/// Plates are compared case-insensitively with surrounding whitespace
/// removed. Idempotent.
pub fn normalize_plate(raw: &str) -> String {
    raw.trim().to_uppercase()
}
