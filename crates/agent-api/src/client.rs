//! HTTP client used by the agent.

use crate::agent_trait::AgentApi;
use crate::error::{AgentApiError, ErrorBody};
use crate::retry::RetryPolicy;
use crate::types::{
    paths, Ack, BmcInfoRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, ReportAddressesRequest,
    WipeCompleteRequest,
};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Agent side of the RPC. Every call is retried per [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl AgentClient {
    /// Create a client for `endpoint`, either `host:port` or a full URL.
    pub fn new(endpoint: &str) -> Result<Self, AgentApiError> {
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{endpoint}")
        };

        Ok(Self {
            client: Client::builder().build()?,
            base_url,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop retrying once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_once<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AgentApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "agent RPC");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();

        if status.is_success() {
            // an unparsable body is final, never retried
            let body = response.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text).map_or(text, |b| b.error);

        if status.is_server_error() {
            Err(AgentApiError::Unavailable {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(AgentApiError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn call<Req, Resp>(&self, path: &'static str, body: &Req) -> Result<Resp, AgentApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.policy
            .run(path, &self.cancel, || self.post_once(path, body))
            .await
    }
}

#[async_trait::async_trait]
impl AgentApi for AgentClient {
    async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AgentApiError> {
        self.call(paths::REGISTER, &req).await
    }

    async fn report_addresses(&self, req: ReportAddressesRequest) -> Result<(), AgentApiError> {
        self.call::<_, Ack>(paths::REPORT_ADDRESSES, &req).await.map(|_| ())
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), AgentApiError> {
        self.call::<_, Ack>(paths::HEARTBEAT, &req).await.map(|_| ())
    }

    async fn report_wipe_complete(&self, req: WipeCompleteRequest) -> Result<(), AgentApiError> {
        self.call::<_, Ack>(paths::REPORT_WIPE_COMPLETE, &req).await.map(|_| ())
    }

    async fn report_bmc_info(&self, req: BmcInfoRequest) -> Result<(), AgentApiError> {
        self.call::<_, Ack>(paths::REPORT_BMC_INFO, &req).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(10),
            total: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint_forms() {
        assert_eq!(AgentClient::new("10.5.0.1:8081").unwrap().base_url(), "http://10.5.0.1:8081");
        assert_eq!(AgentClient::new("http://ctl:8081/").unwrap().base_url(), "http://ctl:8081");
    }

    #[tokio::test]
    async fn test_register() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::REGISTER))
            .and(body_partial_json(serde_json::json!({ "hostname": "node-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "wipe": true,
                "insecureWipe": false,
                "rebootTimeout": 1200.0,
                "setupBmc": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AgentClient::new(&server.uri()).unwrap().with_policy(quick());
        let resp = client
            .register(RegisterRequest {
                hostname: "node-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(resp.wipe);
        assert!(resp.setup_bmc);
        assert!((resp.reboot_timeout - 1200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::HEARTBEAT))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({ "error": "server abc not found" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AgentClient::new(&server.uri()).unwrap().with_policy(quick());
        let err = client
            .heartbeat(HeartbeatRequest { uuid: "abc".to_string() })
            .await
            .unwrap_err();

        match err {
            AgentApiError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "server abc not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::REGISTER))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = AgentClient::new(&server.uri()).unwrap().with_policy(quick());
        let err = client.register(RegisterRequest::default()).await.unwrap_err();

        assert!(matches!(err, AgentApiError::Serialization(_)), "unexpected error: {err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::REPORT_WIPE_COMPLETE))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(paths::REPORT_WIPE_COMPLETE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = AgentClient::new(&server.uri()).unwrap().with_policy(quick());
        client
            .report_wipe_complete(WipeCompleteRequest { uuid: "abc".to_string() })
            .await
            .unwrap();
    }
}
