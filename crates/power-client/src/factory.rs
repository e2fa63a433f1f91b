//! Power client selection
//!
//! Picks the management transport for a server from its spec: IPMI when a
//! BMC with credentials is configured, the HTTP management API when an
//! endpoint is set, and the fake client otherwise.

use crate::api::ManagementApiClient;
use crate::dice::FailureDice;
use crate::error::PowerError;
use crate::fake::FakeClient;
use crate::ipmi::{IpmiClient, IpmiTool};
use crate::power_trait::PowerClient;
use crds::{Bmc, PxeMode, SecretKeyRef, ServerSpec};
use std::sync::Arc;
use tracing::debug;

/// Resolved BMC credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.pass.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Looks up a single key of a secret.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, key_ref: &SecretKeyRef) -> Result<String, PowerError>;
}

/// Resolves BMC credentials. Inline values win over secret references; a
/// missing source yields an empty string.
pub async fn resolve_credentials(bmc: &Bmc, resolver: &dyn CredentialResolver) -> Result<Credentials, PowerError> {
    async fn one(
        inline: Option<&String>,
        from: Option<&SecretKeyRef>,
        resolver: &dyn CredentialResolver,
    ) -> Result<String, PowerError> {
        match (inline, from) {
            (Some(value), _) if !value.is_empty() => Ok(value.clone()),
            (_, Some(key_ref)) => resolver.resolve(key_ref).await,
            _ => Ok(String::new()),
        }
    }

    let user = one(
        bmc.user.as_ref(),
        bmc.user_from.as_ref().and_then(|s| s.secret_key_ref.as_ref()),
        resolver,
    )
    .await?;
    let pass = one(
        bmc.pass.as_ref(),
        bmc.pass_from.as_ref().and_then(|s| s.secret_key_ref.as_ref()),
        resolver,
    )
    .await?;

    Ok(Credentials { user, pass })
}

/// Transport picked for a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKind {
    Ipmi {
        interface: String,
        endpoint: String,
        port: u16,
        credentials: Credentials,
    },
    Api {
        endpoint: String,
    },
    Fake,
}

/// Pure selection: `credentials` are the resolved BMC credentials when a
/// BMC is configured.
#[must_use]
pub fn select_client(spec: &ServerSpec, credentials: Option<&Credentials>) -> ClientKind {
    if let Some(bmc) = &spec.bmc {
        return match credentials {
            Some(creds) if creds.is_complete() => ClientKind::Ipmi {
                interface: bmc.interface_or_default().to_string(),
                endpoint: bmc.endpoint.clone(),
                port: bmc.port_or_default(),
                credentials: creds.clone(),
            },
            _ => ClientKind::Fake,
        };
    }

    match &spec.management_api {
        Some(api) if !api.endpoint.is_empty() => ClientKind::Api {
            endpoint: api.endpoint.clone(),
        },
        _ => ClientKind::Fake,
    }
}

/// Concrete client returned by the factory.
#[derive(Debug)]
pub enum ManagementClient {
    Ipmi(IpmiClient<IpmiTool>),
    Api(ManagementApiClient),
    Fake(FakeClient),
}

impl ManagementClient {
    fn as_dyn(&self) -> &dyn PowerClient {
        match self {
            Self::Ipmi(c) => c,
            Self::Api(c) => c,
            Self::Fake(c) => c,
        }
    }

    pub fn build(kind: ClientKind, dice: Arc<FailureDice>) -> Result<Self, PowerError> {
        Ok(match kind {
            ClientKind::Ipmi {
                interface,
                endpoint,
                port,
                credentials,
            } => Self::Ipmi(IpmiClient::new(IpmiTool::remote(
                interface,
                endpoint,
                port,
                credentials.user,
                credentials.pass,
            ))),
            ClientKind::Api { endpoint } => Self::Api(ManagementApiClient::new(endpoint, dice)?),
            ClientKind::Fake => Self::Fake(FakeClient),
        })
    }
}

#[async_trait::async_trait]
impl PowerClient for ManagementClient {
    async fn power_on(&self) -> Result<(), PowerError> {
        self.as_dyn().power_on().await
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        self.as_dyn().power_off().await
    }

    async fn power_cycle(&self) -> Result<(), PowerError> {
        self.as_dyn().power_cycle().await
    }

    async fn is_powered_on(&self) -> Result<bool, PowerError> {
        self.as_dyn().is_powered_on().await
    }

    async fn set_pxe(&self, mode: PxeMode) -> Result<(), PowerError> {
        self.as_dyn().set_pxe(mode).await
    }

    fn is_fake(&self) -> bool {
        self.as_dyn().is_fake()
    }

    async fn close(&self) -> Result<(), PowerError> {
        self.as_dyn().close().await
    }
}

/// Creates power clients for servers.
#[async_trait::async_trait]
pub trait PowerClientFactory: Send + Sync {
    async fn client_for(&self, spec: &ServerSpec) -> Result<Box<dyn PowerClient>, PowerError>;
}

/// Factory resolving credentials through a [`CredentialResolver`].
pub struct DefaultPowerClientFactory<R> {
    resolver: R,
    dice: Arc<FailureDice>,
}

impl<R: CredentialResolver> DefaultPowerClientFactory<R> {
    pub fn new(resolver: R, dice: Arc<FailureDice>) -> Self {
        Self { resolver, dice }
    }
}

#[async_trait::async_trait]
impl<R: CredentialResolver> PowerClientFactory for DefaultPowerClientFactory<R> {
    async fn client_for(&self, spec: &ServerSpec) -> Result<Box<dyn PowerClient>, PowerError> {
        let credentials = match &spec.bmc {
            Some(bmc) => Some(resolve_credentials(bmc, &self.resolver).await?),
            None => None,
        };

        let kind = select_client(spec, credentials.as_ref());
        debug!(
            kind = match &kind {
                ClientKind::Ipmi { .. } => "ipmi",
                ClientKind::Api { .. } => "api",
                ClientKind::Fake => "fake",
            },
            "selected power client"
        );

        Ok(Box::new(ManagementClient::build(kind, self.dice.clone())?))
    }
}
