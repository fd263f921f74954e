//! Simulated disbursement gateway. Stands in for a real fintech provider:
//! waits a provider-like delay, then fabricates a transaction record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use claim_flow::{ClaimError, PayoutGateway, PayoutReceipt, PayoutRequest, Result};
use rand::{Rng, distr::Alphanumeric};
use tracing::info;

const PROVIDER_DELAY: Duration = Duration::from_secs(2);
const CURRENCY: &str = "NGN";
const DEFAULT_RECIPIENT: &str = "Policy Holder";

pub struct SimulatedPayoutGateway {
    delay: Duration,
}

impl SimulatedPayoutGateway {
    pub fn new() -> Self {
        Self {
            delay: PROVIDER_DELAY,
        }
    }

    #[cfg(test)]
    fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    fn transaction_id() -> String {
        let token: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        format!("TXN-{}", token.to_uppercase())
    }
}

impl Default for SimulatedPayoutGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PayoutGateway for SimulatedPayoutGateway {
    async fn disburse(&self, request: &PayoutRequest) -> Result<PayoutReceipt> {
        if request.amount <= 0 {
            return Err(ClaimError::Validation("amount is required".to_string()));
        }
        if request.plate.trim().is_empty() {
            return Err(ClaimError::Validation("plate number is required".to_string()));
        }

        tokio::time::sleep(self.delay).await;

        let recipient = if request.owner_name.trim().is_empty() {
            DEFAULT_RECIPIENT.to_string()
        } else {
            request.owner_name.clone()
        };

        let receipt = PayoutReceipt {
            transaction_id: Self::transaction_id(),
            reference: format!("REF-{}", Utc::now().timestamp_millis()),
            amount: request.amount,
            currency: CURRENCY.to_string(),
            recipient,
            timestamp: Utc::now(),
        };
        info!(
            transaction_id = %receipt.transaction_id,
            amount = receipt.amount,
            "payout disbursed"
        );
        Ok(receipt)
    }
}
