//! Boot resolution for `/ipxe` chainload requests.
//!
//! Picks what a machine boots from its Server record, its binding and the
//! configured environments. Precedence, first match wins:
//!
//! 1. unknown, unbound or unaccepted server: the agent environment
//! 2. already PXE booted and not `pxeBootAlways`: boot from disk
//! 3. environment referenced by the server
//! 4. environment referenced by the binding's server class
//! 5. the `default` environment

use crate::ipxe::{self, INITRD_ASSET};
use chrono::Utc;
use crds::conditions::{self, Condition};
use crds::{
    BootFromDiskMethod, CONDITION_PXE_BOOTED, ENVIRONMENT_DEFAULT, Environment, EnvironmentSpec, Kernel, Server,
    ServerBinding,
};
use metal_store::{MetalStore, StoreError, update_server_status};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Kernel arguments every Talos based environment starts from.
pub const DEFAULT_KERNEL_ARGS: &[&str] = &[
    "init_on_alloc=1",
    "slab_nomerge",
    "pti=on",
    "consoleblank=0",
    "nvme_core.io_timeout=4294967295",
    "printk.devkmsg=on",
    "ima_template=ima-ng",
    "ima_appraise=fix",
    "ima_hash=sha512",
];

/// Kernel argument carrying the orchestrator endpoint to the agent.
pub const AGENT_ENDPOINT_ARG: &str = "sidero.endpoint";

/// Kernel argument carrying the boot interface MAC to the agent.
pub const AGENT_MAC_ARG: &str = "sidero.mac";

/// Kernel argument pointing Talos at its machine config.
pub const TALOS_CONFIG_ARG: &str = "talos.config";

#[derive(Debug, Error)]
pub enum BootError {
    #[error("environment {0:?} not found")]
    EnvironmentNotFound(String),

    #[error("server class {0:?} not found")]
    ServerClassNotFound(String),

    #[error("environment {0:?} is not ready")]
    EnvironmentNotReady(String),

    #[error("lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// What a machine is told to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootAction {
    /// Boot the kernel and initrd of an environment.
    Environment { name: String, script: String },

    /// Fall through to the local disk.
    BootFromDisk(BootFromDiskMethod),
}

/// Kernel command line with `key=value` parameters addressable by key.
///
/// Repeated keys (`console=tty0 console=ttyS0`) form one parameter that is
/// replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelArgs {
    params: Vec<(String, Vec<Option<String>>)>,
}

impl KernelArgs {
    #[must_use]
    pub fn parse(cmdline: &str) -> Self {
        let mut args = Self::default();
        for token in cmdline.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v.to_string())),
                None => (token, None),
            };
            match args.params.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push(value),
                None => args.params.push((key.to_string(), vec![value])),
            }
        }
        args
    }

    /// Replaces every value of `key`, appending it if absent.
    pub fn set(&mut self, key: &str, values: Vec<Option<String>>) {
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = values,
            None => self.params.push((key.to_string(), values)),
        }
    }

    /// Overrides parameters with those of `other`.
    pub fn merge(&mut self, other: &Self) {
        for (key, values) in &other.params {
            self.set(key, values.clone());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[Option<String>]> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice())
    }

    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.params
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| match value {
                    Some(v) => format!("{key}={v}"),
                    None => key.clone(),
                })
            })
            .collect()
    }
}

/// Settings shared by every resolution.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// Address machines reach this server on
    pub endpoint: String,
    pub port: u16,
    /// Appended to the agent command line, overriding defaults by key
    pub extra_agent_kernel_args: String,
    pub default_boot_from_disk: BootFromDiskMethod,
}

/// Query labels of a chainload request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootLabels(BTreeMap<String, String>);

impl BootLabels {
    /// Keys are lower-cased; `mac` is kept only if it parses.
    pub fn from_query<'a>(query: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut labels = BTreeMap::new();
        for (key, value) in query {
            let key = key.to_ascii_lowercase();
            if labels.contains_key(&key) {
                continue;
            }
            if key == "mac" {
                if let Some(mac) = parse_mac(value) {
                    labels.insert(key, mac);
                }
                continue;
            }
            labels.insert(key, value.to_string());
        }
        Self(labels)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        self.get("uuid").unwrap_or_default()
    }

    #[must_use]
    pub fn mac(&self) -> Option<&str> {
        self.get("mac")
    }

    /// `arm64` if requested, `amd64` otherwise.
    #[must_use]
    pub fn arch(&self) -> &'static str {
        match self.get("arch") {
            Some("arm64") => "arm64",
            _ => "amd64",
        }
    }
}

/// Parses a MAC written with `:`, `-` or `.` separators into `aa:bb:...`.
#[must_use]
pub fn parse_mac(s: &str) -> Option<String> {
    let hex: String = s.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if s.len() != 17 && s.len() != 14 {
        return None;
    }

    let bytes: Vec<String> = hex
        .to_ascii_lowercase()
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect();
    Some(bytes.join(":"))
}

/// Resolves chainload requests against the store.
#[derive(Clone)]
pub struct BootResolver {
    store: Arc<dyn MetalStore>,
    config: BootConfig,
}

impl BootResolver {
    pub fn new(store: Arc<dyn MetalStore>, config: BootConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Resolves and renders the boot action for one request.
    ///
    /// Non-agent environments mark the server PXE booted; failing to do so
    /// is logged and does not fail the request.
    pub async fn resolve(&self, labels: &BootLabels) -> Result<BootAction, BootError> {
        let uuid = labels.uuid();
        let (server, binding) = self.lookup(uuid).await?;

        // unaccepted servers only ever get the agent and are never marked
        let (server, binding) = match (server, binding) {
            (Some(server), Some(binding)) if server.spec.accepted => (server, binding),
            (server, binding) => {
                let env = self.agent_environment(labels.arch(), labels.mac());
                match server {
                    None => info!(%uuid, env = env_name(&env), "unknown server, booting agent"),
                    Some(_) if binding.is_some() => {
                        warn!(%uuid, env = env_name(&env), "server is allocated but not accepted, booting agent");
                    }
                    Some(_) => {}
                }
                return Ok(render(&env));
            }
        };

        if conditions::has(server.conditions(), CONDITION_PXE_BOOTED) && !server.spec.pxe_boot_always {
            let method = self.boot_from_disk_method(&server, &binding).await?;
            info!(%uuid, %method, "server booting from disk");
            return Ok(BootAction::BootFromDisk(method));
        }

        let env = self.server_environment(&server, &binding).await?;
        if !env.is_ready() {
            return Err(BootError::EnvironmentNotReady(env_name(&env).to_string()));
        }

        info!(%uuid, env = env_name(&env), "using environment");
        let action = render(&env);

        if !env_name(&env).starts_with("agent") {
            if let Err(e) = self.mark_pxe_booted(uuid).await {
                warn!(%uuid, error = %e, "error marking server as PXE booted");
            }
        }

        Ok(action)
    }

    async fn lookup(&self, uuid: &str) -> Result<(Option<Server>, Option<ServerBinding>), StoreError> {
        let Some(server) = self.store.get_server(uuid).await? else {
            return Ok((None, None));
        };
        let binding = self.store.get_server_binding(uuid).await?;
        Ok((Some(server), binding))
    }

    /// Server spec, then server class spec, then the configured default.
    async fn boot_from_disk_method(
        &self,
        server: &Server,
        binding: &ServerBinding,
    ) -> Result<BootFromDiskMethod, BootError> {
        if let Some(method) = server.spec.boot_from_disk_method {
            return Ok(method);
        }

        if let Some(class_ref) = &binding.spec.server_class_ref {
            let class = self
                .store
                .get_server_class(&class_ref.name)
                .await?
                .ok_or_else(|| BootError::ServerClassNotFound(class_ref.name.clone()))?;
            if let Some(method) = class.spec.boot_from_disk_method {
                return Ok(method);
            }
        }

        Ok(self.config.default_boot_from_disk)
    }

    async fn server_environment(&self, server: &Server, binding: &ServerBinding) -> Result<Environment, BootError> {
        let mut name = None;

        if let Some(env_ref) = &server.spec.environment_ref {
            name = Some(env_ref.name.clone());
        } else if let Some(class_ref) = &binding.spec.server_class_ref {
            let class = self
                .store
                .get_server_class(&class_ref.name)
                .await?
                .ok_or_else(|| BootError::ServerClassNotFound(class_ref.name.clone()))?;
            name = class.spec.environment_ref.map(|r| r.name);
        }

        let name = name.unwrap_or_else(|| ENVIRONMENT_DEFAULT.to_string());
        let mut env = self
            .store
            .get_environment(&name)
            .await?
            .ok_or(BootError::EnvironmentNotFound(name))?;

        self.append_talos_arguments(&mut env);
        Ok(env)
    }

    /// In-memory environment booting the agent image for `arch`.
    #[must_use]
    pub fn agent_environment(&self, arch: &str, mac: Option<&str>) -> Environment {
        let mut args: Vec<String> = DEFAULT_KERNEL_ARGS.iter().map(ToString::to_string).collect();
        args.extend([
            "console=tty0".to_string(),
            "console=ttyS0".to_string(),
            format!("initrd={INITRD_ASSET}"),
            "ip=dhcp".to_string(),
            "panic=30".to_string(),
        ]);
        args.push(format!(
            "{AGENT_ENDPOINT_ARG}={}:{}",
            self.config.endpoint, self.config.port
        ));
        if let Some(mac) = mac {
            args.push(format!("{AGENT_MAC_ARG}={mac}"));
        }

        let mut cmdline = KernelArgs::parse(&args.join(" "));
        cmdline.merge(&KernelArgs::parse(&self.config.extra_agent_kernel_args));

        Environment::new(
            &format!("agent-{arch}"),
            EnvironmentSpec {
                kernel: Kernel {
                    args: cmdline.to_args(),
                    ..Kernel::default()
                },
                ..EnvironmentSpec::default()
            },
        )
    }

    fn append_talos_arguments(&self, env: &mut Environment) {
        let prefix = format!("{TALOS_CONFIG_ARG}=");
        if env.spec.kernel.args.iter().any(|a| a.starts_with(&prefix)) {
            return;
        }
        env.spec.kernel.args.push(format!(
            "{prefix}http://{}:{}/configdata?uuid=",
            self.config.endpoint, self.config.port
        ));
    }

    async fn mark_pxe_booted(&self, uuid: &str) -> Result<(), StoreError> {
        update_server_status(self.store.as_ref(), uuid, |server| {
            if conditions::is_true(server.conditions(), CONDITION_PXE_BOOTED) {
                return false;
            }
            conditions::set(
                &mut server.status_mut().conditions,
                Condition::true_(CONDITION_PXE_BOOTED, Utc::now()),
            );
            true
        })
        .await?;
        Ok(())
    }
}

fn env_name(env: &Environment) -> &str {
    env.metadata.name.as_deref().unwrap_or_default()
}

fn render(env: &Environment) -> BootAction {
    let name = env_name(env).to_string();
    let script = ipxe::render_environment_script(&name, &env.spec.kernel.args);
    BootAction::Environment { name, script }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{AssetCondition, EnvironmentStatus, ResourceReference, ServerBindingSpec, ServerClass, ServerClassSpec, ServerSpec};
    use metal_store::MemoryStore;

    const UUID: &str = "4c4c4544-0039-3010-8048-b7c04f384432";

    fn config() -> BootConfig {
        BootConfig {
            endpoint: "10.5.0.1".to_string(),
            port: 8081,
            extra_agent_kernel_args: String::new(),
            default_boot_from_disk: BootFromDiskMethod::IpxeExit,
        }
    }

    fn resolver(store: &Arc<MemoryStore>) -> BootResolver {
        BootResolver::new(store.clone(), config())
    }

    fn labels(uuid: &str) -> BootLabels {
        BootLabels::from_query([("uuid", uuid), ("arch", "x86_64")])
    }

    fn ready_env(name: &str, args: &[&str]) -> Environment {
        let mut env = Environment::new(
            name,
            EnvironmentSpec {
                kernel: Kernel {
                    url: format!("https://assets/{name}/vmlinuz"),
                    args: args.iter().map(ToString::to_string).collect(),
                    ..Kernel::default()
                },
                ..EnvironmentSpec::default()
            },
        );
        env.status = Some(EnvironmentStatus {
            conditions: vec![AssetCondition {
                url: format!("https://assets/{name}/vmlinuz"),
                status: "True".to_string(),
                type_: "Ready".to_string(),
                ..AssetCondition::default()
            }],
        });
        env
    }

    fn accepted() -> ServerSpec {
        ServerSpec {
            accepted: true,
            ..ServerSpec::default()
        }
    }

    fn bound_store(spec: ServerSpec, class: Option<&str>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_server(Server::new(UUID, spec));
        store.insert_binding(ServerBinding::new(
            UUID,
            ServerBindingSpec {
                server_class_ref: class.map(ResourceReference::named),
                ..ServerBindingSpec::default()
            },
        ));
        store.insert_environment(ready_env(ENVIRONMENT_DEFAULT, &["console=ttyS1"]));
        store
    }

    async fn mark_booted(store: &MemoryStore) {
        update_server_status(store, UUID, |s| {
            conditions::set(
                &mut s.status_mut().conditions,
                Condition::true_(CONDITION_PXE_BOOTED, Utc::now()),
            );
            true
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_kernel_args_override_by_key() {
        let mut args = KernelArgs::parse("console=tty0 console=ttyS0 ip=dhcp panic=30 slab_nomerge");
        args.merge(&KernelArgs::parse("console=ttyS1,115200 panic=0 talos.platform=metal"));

        assert_eq!(
            args.to_args(),
            vec!["console=ttyS1,115200", "ip=dhcp", "panic=0", "slab_nomerge", "talos.platform=metal"]
        );
        assert_eq!(args.get("ip"), Some([Some("dhcp".to_string())].as_slice()));
    }

    #[test]
    fn test_labels() {
        let labels = BootLabels::from_query([
            ("UUID", "abc"),
            ("mac", "52-54-00-12-34-AB"),
            ("arch", "arm64"),
            ("hostname", "node1"),
        ]);
        assert_eq!(labels.uuid(), "abc");
        assert_eq!(labels.mac(), Some("52:54:00:12:34:ab"));
        assert_eq!(labels.arch(), "arm64");
        assert_eq!(labels.get("hostname"), Some("node1"));

        let labels = BootLabels::from_query([("mac", "not-a-mac"), ("arch", "i386")]);
        assert_eq!(labels.mac(), None);
        assert_eq!(labels.arch(), "amd64");
    }

    #[tokio::test]
    async fn test_unknown_server_boots_agent() {
        let store = Arc::new(MemoryStore::new());
        let labels = BootLabels::from_query([("uuid", UUID), ("mac", "52:54:00:12:34:56"), ("arch", "arm64")]);

        let action = resolver(&store).resolve(&labels).await.unwrap();
        let BootAction::Environment { name, script } = action else {
            panic!("expected environment, got {action:?}");
        };
        assert_eq!(name, "agent-arm64");
        assert!(script.contains("kernel /env/agent-arm64/vmlinuz init_on_alloc=1"));
        assert!(script.contains("sidero.endpoint=10.5.0.1:8081"));
        assert!(script.contains("sidero.mac=52:54:00:12:34:56"));
        assert!(script.contains("initrd /env/agent-arm64/initramfs.xz"));
        assert!(!script.contains("talos.config"));
    }

    #[tokio::test]
    async fn test_unbound_server_boots_agent_and_stays_unmarked() {
        let store = Arc::new(MemoryStore::new());
        store.insert_server(Server::new(UUID, ServerSpec::default()));

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == "agent-amd64"));

        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(!conditions::has(server.conditions(), CONDITION_PXE_BOOTED));
    }

    #[tokio::test]
    async fn test_unaccepted_bound_server_boots_agent_and_stays_unmarked() {
        let store = bound_store(ServerSpec::default(), None);

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == "agent-amd64"));

        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(!conditions::has(server.conditions(), CONDITION_PXE_BOOTED));

        // accepting it switches to the real environment and marks it
        metal_store::update_server(store.as_ref(), UUID, |s| {
            s.spec.accepted = true;
            true
        })
        .await
        .unwrap();

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == ENVIRONMENT_DEFAULT));
        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(conditions::is_true(server.conditions(), CONDITION_PXE_BOOTED));
    }

    #[tokio::test]
    async fn test_unaccepted_pxe_booted_server_still_gets_agent() {
        let store = bound_store(ServerSpec::default(), None);
        mark_booted(&store).await;

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == "agent-amd64"));
    }

    #[tokio::test]
    async fn test_extra_agent_args_override_defaults() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = config();
        cfg.extra_agent_kernel_args = "console=ttyS1,115200n8 panic=0".to_string();
        let resolver = BootResolver::new(store, cfg);

        let env = resolver.agent_environment("amd64", None);
        let args = &env.spec.kernel.args;
        assert!(args.contains(&"console=ttyS1,115200n8".to_string()));
        assert!(!args.contains(&"console=tty0".to_string()));
        assert!(args.contains(&"panic=0".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("sidero.mac=")));
    }

    #[tokio::test]
    async fn test_bound_server_uses_default_env_and_is_marked() {
        let store = bound_store(accepted(), None);

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        let BootAction::Environment { name, script } = action else {
            panic!("expected environment");
        };
        assert_eq!(name, ENVIRONMENT_DEFAULT);
        assert!(script.contains("console=ttyS1 talos.config=http://10.5.0.1:8081/configdata?uuid="));

        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(conditions::is_true(server.conditions(), CONDITION_PXE_BOOTED));
    }

    #[tokio::test]
    async fn test_existing_talos_config_is_kept() {
        let store = bound_store(accepted(), None);
        store.insert_environment(ready_env(ENVIRONMENT_DEFAULT, &["talos.config=http://elsewhere/cfg"]));

        let BootAction::Environment { script, .. } = resolver(&store).resolve(&labels(UUID)).await.unwrap() else {
            panic!("expected environment");
        };
        assert_eq!(script.matches("talos.config=").count(), 1);
        assert!(script.contains("talos.config=http://elsewhere/cfg"));
    }

    #[tokio::test]
    async fn test_pxe_booted_server_boots_from_disk() {
        let store = bound_store(accepted(), None);
        mark_booted(&store).await;

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert_eq!(action, BootAction::BootFromDisk(BootFromDiskMethod::IpxeExit));
    }

    #[tokio::test]
    async fn test_pxe_boot_always_renders_environment() {
        let store = bound_store(
            ServerSpec {
                pxe_boot_always: true,
                ..accepted()
            },
            None,
        );
        mark_booted(&store).await;

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == ENVIRONMENT_DEFAULT));
    }

    #[tokio::test]
    async fn test_boot_from_disk_method_precedence() {
        let store = bound_store(accepted(), Some("workers"));
        store.insert_server_class(ServerClass::new(
            "workers",
            ServerClassSpec {
                boot_from_disk_method: Some(BootFromDiskMethod::Http404),
                ..ServerClassSpec::default()
            },
        ));
        mark_booted(&store).await;

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert_eq!(action, BootAction::BootFromDisk(BootFromDiskMethod::Http404));

        metal_store::update_server(store.as_ref(), UUID, |s| {
            s.spec.boot_from_disk_method = Some(BootFromDiskMethod::IpxeSanboot);
            true
        })
        .await
        .unwrap();

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert_eq!(action, BootAction::BootFromDisk(BootFromDiskMethod::IpxeSanboot));
    }

    #[tokio::test]
    async fn test_environment_precedence() {
        let store = bound_store(accepted(), Some("workers"));
        store.insert_environment(ready_env("class-env", &[]));
        store.insert_environment(ready_env("server-env", &[]));
        store.insert_server_class(ServerClass::new(
            "workers",
            ServerClassSpec {
                environment_ref: Some(ResourceReference::named("class-env")),
                ..ServerClassSpec::default()
            },
        ));

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == "class-env"));

        metal_store::update_server(store.as_ref(), UUID, |s| {
            s.spec.pxe_boot_always = true;
            s.spec.environment_ref = Some(ResourceReference::named("server-env"));
            true
        })
        .await
        .unwrap();

        let action = resolver(&store).resolve(&labels(UUID)).await.unwrap();
        assert!(matches!(action, BootAction::Environment { ref name, .. } if name == "server-env"));
    }

    #[tokio::test]
    async fn test_missing_and_unready_environments() {
        let store = bound_store(
            ServerSpec {
                environment_ref: Some(ResourceReference::named("missing")),
                ..accepted()
            },
            None,
        );
        let err = resolver(&store).resolve(&labels(UUID)).await.unwrap_err();
        assert!(matches!(err, BootError::EnvironmentNotFound(ref n) if n == "missing"));

        let mut pending = ready_env("pending", &[]);
        pending.status = None;
        store.insert_environment(pending);
        metal_store::update_server(store.as_ref(), UUID, |s| {
            s.spec.environment_ref = Some(ResourceReference::named("pending"));
            true
        })
        .await
        .unwrap();

        let err = resolver(&store).resolve(&labels(UUID)).await.unwrap_err();
        assert!(matches!(err, BootError::EnvironmentNotReady(ref n) if n == "pending"));

        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(!conditions::has(server.conditions(), CONDITION_PXE_BOOTED));
    }
}
