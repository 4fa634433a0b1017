//! Admission port: decides whether a user may start an analysis.

use async_trait::async_trait;

use crate::errors::FlowError;

/// Quota and storage checks run before an analysis starts.
#[async_trait]
pub trait AdmissionCheck: Send + Sync {
    /// Returns true if the user has quota left.
    async fn has_quota(&self, user_id: &str) -> Result<bool, FlowError>;

    /// Returns true if the user has storage headroom left.
    async fn has_storage_headroom(&self, user_id: &str) -> Result<bool, FlowError>;

    /// Runs both checks and maps a refusal to [`FlowError::AdmissionDenied`].
    async fn admit(&self, user_id: &str) -> Result<(), FlowError> {
        if !self.has_quota(user_id).await? {
            return Err(FlowError::admission_denied(user_id, "quota exhausted"));
        }
        if !self.has_storage_headroom(user_id).await? {
            return Err(FlowError::admission_denied(user_id, "storage capacity reached"));
        }
        Ok(())
    }
}

/// Admission with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct StaticAdmission {
    quota: bool,
    storage: bool,
}

impl StaticAdmission {
    /// Admits everyone.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            quota: true,
            storage: true,
        }
    }

    /// Refuses everyone for lack of quota.
    #[must_use]
    pub fn no_quota() -> Self {
        Self {
            quota: false,
            storage: true,
        }
    }

    /// Refuses everyone for lack of storage.
    #[must_use]
    pub fn no_storage() -> Self {
        Self {
            quota: true,
            storage: false,
        }
    }
}

#[async_trait]
impl AdmissionCheck for StaticAdmission {
    async fn has_quota(&self, _user_id: &str) -> Result<bool, FlowError> {
        Ok(self.quota)
    }

    async fn has_storage_headroom(&self, _user_id: &str) -> Result<bool, FlowError> {
        Ok(self.storage)
    }
}
