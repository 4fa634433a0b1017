//! Admission checks backed by the quota ledger.

use async_trait::async_trait;
use std::sync::Arc;

use super::QuotaLedger;
use crate::errors::FlowError;
use crate::ports::AdmissionCheck;

/// Admits users with a positive balance and storage headroom.
///
/// Users without an account are refused.
#[derive(Clone)]
pub struct LedgerAdmission {
    ledger: Arc<dyn QuotaLedger>,
}

impl LedgerAdmission {
    /// Creates an admission check over a ledger.
    #[must_use]
    pub fn new(ledger: Arc<dyn QuotaLedger>) -> Self {
        Self { ledger }
    }
}

impl std::fmt::Debug for LedgerAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerAdmission").finish_non_exhaustive()
    }
}

#[async_trait]
impl AdmissionCheck for LedgerAdmission {
    async fn has_quota(&self, user_id: &str) -> Result<bool, FlowError> {
        Ok(self
            .ledger
            .account(user_id)
            .await?
            .is_some_and(|a| a.has_quota()))
    }

    async fn has_storage_headroom(&self, user_id: &str) -> Result<bool, FlowError> {
        Ok(self
            .ledger
            .account(user_id)
            .await?
            .is_some_and(|a| a.has_storage_headroom()))
    }
}
