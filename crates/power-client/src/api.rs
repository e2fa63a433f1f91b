//! Management API client
//!
//! Drives power through a small HTTP API exposed next to virtual machines
//! in test fleets: `POST /poweron`, `/poweroff`, `/reboot`, `/pxeboot` and
//! `GET /status`. Every call first rolls the shared failure dice.

use crate::dice::{FailureDice, FailureOutcome};
use crate::error::PowerError;
use crate::power_trait::PowerClient;
use crds::PxeMode;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PowerStatus {
    #[serde(rename = "PoweredOn")]
    powered_on: bool,
}

/// HTTP management API client.
#[derive(Debug, Clone)]
pub struct ManagementApiClient {
    client: Client,
    endpoint: String,
    dice: Arc<FailureDice>,
}

impl ManagementApiClient {
    /// Create a client for `endpoint` (`host:port`).
    pub fn new(endpoint: impl Into<String>, dice: Arc<FailureDice>) -> Result<Self, PowerError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            dice,
        })
    }

    /// Endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, verb: &str) -> Result<(), PowerError> {
        match self.dice.roll() {
            FailureOutcome::ExplicitFailure => return Err(PowerError::SimulatedFailure),
            FailureOutcome::SilentFailure => {
                debug!(endpoint = %self.endpoint, verb, "dropping management API call");
                return Ok(());
            }
            FailureOutcome::NoFailure => {}
        }

        let url = format!("http://{}/{}", self.endpoint, verb);
        debug!("POST {}", url);

        let response = self.client.post(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(PowerError::Api(response.status().to_string()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl PowerClient for ManagementApiClient {
    async fn power_on(&self) -> Result<(), PowerError> {
        self.post("poweron").await
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        self.post("poweroff").await
    }

    async fn power_cycle(&self) -> Result<(), PowerError> {
        self.post("reboot").await
    }

    async fn is_powered_on(&self) -> Result<bool, PowerError> {
        match self.dice.roll() {
            FailureOutcome::ExplicitFailure => return Err(PowerError::SimulatedFailure),
            FailureOutcome::SilentFailure => return Ok(self.dice.flip()),
            FailureOutcome::NoFailure => {}
        }

        let url = format!("http://{}/status", self.endpoint);
        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(PowerError::Api(response.status().to_string()));
        }

        let status: PowerStatus = serde_json::from_slice(&response.bytes().await?)?;
        Ok(status.powered_on)
    }

    // The API has no notion of firmware flavour.
    async fn set_pxe(&self, _mode: PxeMode) -> Result<(), PowerError> {
        self.post("pxeboot").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer, dice: FailureDice) -> ManagementApiClient {
        ManagementApiClient::new(server.address().to_string(), Arc::new(dice)).unwrap()
    }

    #[tokio::test]
    async fn test_power_verbs_post_to_endpoints() {
        let server = MockServer::start().await;
        for verb in ["poweron", "poweroff", "reboot", "pxeboot"] {
            Mock::given(method("POST"))
                .and(path(format!("/{verb}")))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let c = client(&server, FailureDice::disabled()).await;
        c.power_on().await.unwrap();
        c.power_off().await.unwrap();
        c.power_cycle().await.unwrap();
        c.set_pxe(PxeMode::Uefi).await.unwrap();
        assert!(!c.is_fake());
    }

    #[tokio::test]
    async fn test_status_parses_powered_on() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"PoweredOn": false})))
            .mount(&server)
            .await;

        let c = client(&server, FailureDice::disabled()).await;
        assert!(!c.is_powered_on().await.unwrap());
    }

    #[tokio::test]
    async fn test_non_200_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/poweron"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let c = client(&server, FailureDice::disabled()).await;
        let err = c.power_on().await.unwrap_err();
        assert!(matches!(err, PowerError::Api(_)));
    }

    #[tokio::test]
    async fn test_explicit_failure_skips_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let c = client(&server, FailureDice::new(1.0, 0.0, 1)).await;
        let err = c.power_cycle().await.unwrap_err();
        assert_eq!(err.to_string(), "simulated failure from the power management");
    }

    #[tokio::test]
    async fn test_silent_failure_pretends_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let c = client(&server, FailureDice::new(0.0, 1.0, 1)).await;
        c.power_off().await.unwrap();
        // status is answered without contacting the endpoint
        c.is_powered_on().await.unwrap();
    }
}
