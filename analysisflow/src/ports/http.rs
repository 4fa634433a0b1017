//! HTTP function gateway.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;

use super::{FunctionGateway, InvocationAck};
use crate::config::GatewayConfig;
use crate::errors::FlowError;
use crate::invocation::InvocationPayload;

/// Header carrying the callback URL of an invocation.
pub const CALLBACK_HEADER: &str = "X-Callback-Url";

/// Gateway posting payloads to `<base>/async-function/<function_id>`.
///
/// 2xx answers accept the invocation and 4xx answers reject it. Everything
/// else is a transport error. Only failures where the function cannot have
/// seen the request (connect errors, 502 and 503) are marked retryable; a
/// timeout or other 5xx may already have started the function.
#[derive(Debug, Clone)]
pub struct HttpFunctionGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpFunctionGateway {
    /// Builds the HTTP client for a gateway configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, FlowError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| FlowError::Config(format!("invalid gateway header '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FlowError::Config(format!("invalid value for header '{key}': {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| FlowError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[async_trait]
impl FunctionGateway for HttpFunctionGateway {
    async fn invoke_async(
        &self,
        function_id: &str,
        payload: &InvocationPayload,
        callback_url: &str,
    ) -> Result<InvocationAck, FlowError> {
        let url = self.config.function_url(function_id);
        let transport = |reason: String, retryable: bool| FlowError::RemoteInvocation {
            function_id: function_id.to_string(),
            reason,
            retryable,
        };

        let response = self
            .client
            .post(&url)
            .header(CALLBACK_HEADER, callback_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport(format!("request to {url} failed: {e}"), e.is_connect()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(function_id, %status, "Invocation accepted");
            return Ok(InvocationAck::Accepted);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        if status.is_client_error() {
            Ok(InvocationAck::Rejected(format!("{status}: {body}")))
        } else {
            let retryable = matches!(
                status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
            );
            Err(transport(format!("{status}: {body}"), retryable))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_with_headers() {
        let gateway =
            HttpFunctionGateway::new(GatewayConfig::new("http://localhost:9").with_header("x-api-key", "k"))
                .unwrap();
        assert_eq!(
            gateway.config().function_url("f1"),
            "http://localhost:9/async-function/f1"
        );
    }

    #[test]
    fn test_rejects_invalid_header() {
        let result = HttpFunctionGateway::new(
            GatewayConfig::new("http://localhost:9").with_header("bad header", "v"),
        );
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_a_retryable_transport_error() {
        let gateway = HttpFunctionGateway::new(GatewayConfig::new("http://127.0.0.1:9")).unwrap();
        let payload = InvocationPayload::empty("a1", "t1", "f1");
        let err = gateway
            .invoke_async("f1", &payload, "http://localhost/cb")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::RemoteInvocation { retryable: true, .. }));
    }
}
