//! Function-as-a-Service gateway port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;
use crate::invocation::InvocationPayload;

/// Answer of the gateway to an asynchronous invocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum InvocationAck {
    /// The function was scheduled and will call back.
    Accepted,
    /// The gateway refused the invocation.
    Rejected(String),
}

impl InvocationAck {
    /// Returns true if the invocation was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Invokes remote functions asynchronously.
///
/// An `Err` means the request did not reach a decision (transport failure)
/// and may be retried. An explicit refusal is `Ok(InvocationAck::Rejected)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionGateway: Send + Sync {
    /// Requests an asynchronous invocation of `function_id`.
    async fn invoke_async(
        &self,
        function_id: &str,
        payload: &InvocationPayload,
        callback_url: &str,
    ) -> Result<InvocationAck, FlowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_serialization() {
        let accepted = serde_json::to_value(InvocationAck::Accepted).unwrap();
        assert_eq!(accepted, serde_json::json!({"status": "accepted"}));

        let rejected: InvocationAck =
            serde_json::from_value(serde_json::json!({"status": "rejected", "reason": "quota"}))
                .unwrap();
        assert_eq!(rejected, InvocationAck::Rejected("quota".into()));
        assert!(!rejected.is_accepted());
    }
}
