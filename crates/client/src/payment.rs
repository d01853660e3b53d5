//! Payment readiness checks.
//!
//! The ledger itself lives elsewhere. Uploads only ask two questions of it:
//! does the account hold enough of the fee token, and has the storage
//! operator been approved to draw from it with sufficient allowances.

use async_trait::async_trait;
use depot_core::config::PaymentConfig;
use thiserror::Error;
use tracing::debug;

/// Operator approval as reported by the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Approval {
    pub approved: bool,
    pub rate_allowance: u128,
    pub lockup_allowance: u128,
}

/// Ledger query failure.
#[derive(Debug, Error)]
#[error("payment ledger error: {0}")]
pub struct PaymentError(pub String);

/// Read-only view of the payment ledger.
#[async_trait]
pub trait PaymentGate: Send + Sync {
    /// Available balance of `token`.
    async fn check_balance(&self, token: &str) -> Result<u128, PaymentError>;

    /// Approval of `operator` for `token`.
    async fn check_approval(&self, operator: &str, token: &str) -> Result<Approval, PaymentError>;
}

/// Minimums an account must meet before an upload may start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequirements {
    pub token: String,
    pub operator: String,
    pub min_balance: u128,
    pub min_rate_allowance: u128,
    pub min_lockup_allowance: u128,
}

impl PaymentRequirements {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            token: config.token.clone(),
            operator: config.operator.clone(),
            min_balance: config.min_balance,
            min_rate_allowance: config.min_rate_allowance,
            min_lockup_allowance: config.min_lockup_allowance,
        }
    }
}

/// Check the ledger against the requirements.
///
/// Returns a human-readable reason when the account is not ready.
pub async fn ensure_ready(
    gate: &dyn PaymentGate,
    requirements: &PaymentRequirements,
) -> Result<(), String> {
    let token = requirements.token.as_str();

    let balance = gate
        .check_balance(token)
        .await
        .map_err(|e| e.to_string())?;
    if balance < requirements.min_balance {
        return Err(format!(
            "{token} balance {balance} is below the required {}",
            requirements.min_balance
        ));
    }

    let approval = gate
        .check_approval(&requirements.operator, token)
        .await
        .map_err(|e| e.to_string())?;
    if !approval.approved {
        return Err(format!(
            "operator {} is not approved for {token}",
            requirements.operator
        ));
    }
    if approval.rate_allowance < requirements.min_rate_allowance {
        return Err(format!(
            "rate allowance {} is below the required {}",
            approval.rate_allowance, requirements.min_rate_allowance
        ));
    }
    if approval.lockup_allowance < requirements.min_lockup_allowance {
        return Err(format!(
            "lockup allowance {} is below the required {}",
            approval.lockup_allowance, requirements.min_lockup_allowance
        ));
    }

    debug!(token, balance, operator = %requirements.operator, "payment ready");
    Ok(())
}

/// Gate answering from fixed values, typically taken from configuration.
#[derive(Clone, Debug)]
pub struct StaticPaymentGate {
    balance: u128,
    approval: Approval,
}

impl StaticPaymentGate {
    pub fn new(balance: u128, approval: Approval) -> Self {
        Self { balance, approval }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(
            config.balance,
            Approval {
                approved: config.approved,
                rate_allowance: config.rate_allowance,
                lockup_allowance: config.lockup_allowance,
            },
        )
    }
}

#[async_trait]
impl PaymentGate for StaticPaymentGate {
    async fn check_balance(&self, _token: &str) -> Result<u128, PaymentError> {
        Ok(self.balance)
    }

    async fn check_approval(&self, _operator: &str, _token: &str) -> Result<Approval, PaymentError> {
        Ok(self.approval)
    }
}
