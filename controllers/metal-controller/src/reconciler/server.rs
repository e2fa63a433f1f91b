//! Server lifecycle reconciliation.
//!
//! Each reconcile reads the live power state, works out which lifecycle
//! phase the server is in from `accepted`, `inUse` and `isClean`, and issues
//! at most one short sequence of power actions:
//!
//! | phase        | power on        | power off          |
//! |--------------|-----------------|--------------------|
//! | idle         | power off       | nothing            |
//! | provisioning | nothing         | set PXE, power on  |
//! | wiping       | set PXE, cycle  | set PXE, power on  |
//!
//! A wiping server is only power cycled once per reboot timeout window. The
//! window is tracked with the `PowerCycle` condition, which the agent keeps
//! fresh through heartbeats while the wipe runs.
//!
//! Power management failures are recorded as warning events and requeued
//! after [`DEFAULT_REQUEUE_AFTER`]; they never reach the error policy.

use super::{Reconciler, Settings};
use crate::error::ControllerError;
use crate::events::{ServerEvent, REASON_SERVER_ALLOCATION, REASON_SERVER_MANAGEMENT};
use chrono::{DateTime, Utc};
use crds::{
    conditions, Condition, PowerState, PxeMode, Server, ServerStatus, CONDITION_POWER_CYCLE, CONDITION_PXE_BOOTED,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use metal_store::update_server_status;
use power_client::{PowerClient, PowerError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue delay after a power management failure.
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(20);

/// Lifecycle phase derived from `(accepted, inUse, isClean)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not accepted; the controller leaves the server alone
    Unmanaged,
    /// In use and clean at once, which should never happen
    Inconsistent,
    /// Clean and free, parked powered off
    Idle,
    /// Allocated and booting into its environment
    Provisioning,
    /// Free but dirty, must boot the agent to wipe
    Wiping,
}

impl Phase {
    #[must_use]
    pub fn of(accepted: bool, in_use: bool, is_clean: bool) -> Self {
        match (accepted, in_use, is_clean) {
            (false, _, _) => Self::Unmanaged,
            (true, true, true) => Self::Inconsistent,
            (true, false, true) => Self::Idle,
            (true, true, false) => Self::Provisioning,
            (true, false, false) => Self::Wiping,
        }
    }
}

/// A single power management call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetPxe,
    PowerOn,
    PowerOff,
    PowerCycle,
}

impl Step {
    fn failure_note(self, e: &PowerError) -> String {
        match self {
            Self::SetPxe => format!("Failed to set to PXE boot once: {e}."),
            Self::PowerOn => format!("Failed to power on: {e}."),
            Self::PowerOff => format!("Failed to power off: {e}."),
            Self::PowerCycle => format!("Failed to power cycle: {e}."),
        }
    }
}

/// What a reconcile should do once the power state is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub ready: bool,
    pub requeue: Option<Duration>,
    /// Event recorded when every step succeeded on a real client
    pub note: Option<&'static str>,
    /// Start a new power cycle window
    pub mark_power_cycled: bool,
}

impl Plan {
    fn idle(ready: bool, requeue: Option<Duration>) -> Self {
        Self {
            steps: Vec::new(),
            ready,
            requeue,
            note: None,
            mark_power_cycled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Act(Plan),
    /// The branch needs the power state and it could not be read
    PowerUnknown,
}

/// Decides the actions for a phase. `powered_on` is `None` when the power
/// state could not be read; `awaiting_wipe` is true while the current power
/// cycle window is still open.
#[must_use]
pub fn decide(phase: Phase, powered_on: Option<bool>, awaiting_wipe: bool, settings: &Settings) -> Decision {
    let wipe_check = settings.reboot_timeout / 3;

    match phase {
        Phase::Unmanaged | Phase::Inconsistent => Decision::Act(Plan::idle(false, None)),
        Phase::Idle => match powered_on {
            None => Decision::PowerUnknown,
            Some(true) => Decision::Act(Plan {
                steps: vec![Step::PowerOff],
                note: Some("Server powered off."),
                ..Plan::idle(true, None)
            }),
            Some(false) => Decision::Act(Plan::idle(true, None)),
        },
        Phase::Provisioning => match powered_on {
            None => Decision::PowerUnknown,
            // power state is re-checked periodically, BMCs are known to lie about it
            Some(true) => Decision::Act(Plan::idle(true, Some(settings.power_check_period))),
            Some(false) => Decision::Act(Plan {
                steps: vec![Step::SetPxe, Step::PowerOn],
                note: Some("Server powered on and set PXE boot once into the environment."),
                ..Plan::idle(true, Some(settings.power_check_period))
            }),
        },
        Phase::Wiping if awaiting_wipe => Decision::Act(Plan::idle(false, Some(wipe_check))),
        Phase::Wiping => match powered_on {
            None => Decision::PowerUnknown,
            Some(true) => Decision::Act(Plan {
                steps: vec![Step::SetPxe, Step::PowerCycle],
                note: Some("Server power cycled and set to PXE boot once."),
                mark_power_cycled: true,
                ..Plan::idle(false, Some(wipe_check))
            }),
            Some(false) => Decision::Act(Plan {
                steps: vec![Step::SetPxe, Step::PowerOn],
                note: Some("Server powered on and set to PXE boot once."),
                mark_power_cycled: true,
                ..Plan::idle(false, Some(wipe_check))
            }),
        },
    }
}

/// True while a power cycle issued for the current wipe is younger than
/// `reboot_timeout`.
#[must_use]
pub fn awaiting_wipe(conds: &[Condition], now: DateTime<Utc>, reboot_timeout: Duration) -> bool {
    if !conditions::is_false(conds, CONDITION_POWER_CYCLE) {
        return false;
    }
    conditions::find(conds, CONDITION_POWER_CYCLE).is_some_and(|c| {
        (now - c.last_transition_time).to_std().unwrap_or_default() < reboot_timeout
    })
}

/// Status fields owned by the server reconciler. Applied onto the freshest
/// stored status so concurrent agent updates are not lost.
#[derive(Debug, Clone)]
struct StatusUpdate {
    power: PowerState,
    in_use: bool,
    mark_dirty: bool,
    ready: bool,
    power_cycled_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    fn apply(&self, status: &mut ServerStatus) -> bool {
        let before = status.clone();

        status.power = Some(self.power);
        status.in_use = self.in_use;
        status.ready = self.ready;
        if self.mark_dirty {
            status.is_clean = false;
        }
        if !self.in_use {
            conditions::delete(&mut status.conditions, CONDITION_PXE_BOOTED);
        }
        if let Some(at) = self.power_cycled_at {
            conditions::delete(&mut status.conditions, CONDITION_POWER_CYCLE);
            conditions::set(
                &mut status.conditions,
                Condition::false_(
                    CONDITION_POWER_CYCLE,
                    "InProgress",
                    &format!("Server power cycled for wiping at {}.", at.to_rfc3339()),
                    at,
                ),
            );
        }

        *status != before
    }
}

impl Reconciler {
    /// Reconciles the power lifecycle of one server.
    pub async fn reconcile_server(&self, name: &str) -> Result<Action, ControllerError> {
        // read through the store, the watch cache may lag behind agent updates
        let Some(server) = self.store.get_server(name).await? else {
            debug!(server = name, "server is gone");
            return Ok(Action::await_change());
        };

        let client = match self.power.client_for(&server.spec).await {
            Ok(client) => client,
            Err(e) => {
                error!(server = name, error = %e, "failed to create management client");
                self.events
                    .record(
                        &server,
                        ServerEvent::warning(
                            REASON_SERVER_MANAGEMENT,
                            format!("Failed to initialize management client: {e}."),
                        ),
                    )
                    .await;
                return Ok(Action::requeue(DEFAULT_REQUEUE_AFTER));
            }
        };

        let result = self.drive(&server, client.as_ref()).await;

        if let Err(e) = client.close().await {
            debug!(server = name, error = %e, "failed to close management client");
        }

        result
    }

    async fn drive(&self, server: &Server, client: &dyn PowerClient) -> Result<Action, ControllerError> {
        let name = server.name_any();
        let status = server.status_or_default();

        let power = client.is_powered_on().await;
        let power_state = match &power {
            Ok(true) => PowerState::On,
            Ok(false) => PowerState::Off,
            Err(_) => PowerState::Unknown,
        };

        let allocated = self.store.get_server_binding(&name).await?.is_some();
        if !allocated && status.in_use {
            self.events
                .record(
                    server,
                    ServerEvent::normal(REASON_SERVER_ALLOCATION, "Server marked as unallocated."),
                )
                .await;
        }

        let accepted = server.spec.accepted;
        // an unmanaged server may have been used behind our back
        let mark_dirty = allocated || !accepted;
        let is_clean = status.is_clean && !mark_dirty;
        let phase = Phase::of(accepted, allocated, is_clean);

        let awaiting = phase == Phase::Wiping
            && awaiting_wipe(&status.conditions, Utc::now(), self.settings.reboot_timeout);
        let pxe_mode = server.spec.pxe_mode.unwrap_or(self.settings.pxe_mode);

        let mut power_cycled_at = None;
        let (ready, requeue) = match decide(phase, power.as_ref().ok().copied(), awaiting, &self.settings) {
            Decision::PowerUnknown => {
                let e = power.as_ref().err().map(ToString::to_string).unwrap_or_default();
                error!(server = %name, error = %e, "failed to check power state");
                self.events
                    .record(
                        server,
                        ServerEvent::warning(
                            REASON_SERVER_MANAGEMENT,
                            format!("Failed to determine power status: {e}."),
                        ),
                    )
                    .await;
                (false, Some(DEFAULT_REQUEUE_AFTER))
            }
            Decision::Act(plan) => {
                if phase == Phase::Inconsistent {
                    error!(server = %name, "server is in an impossible state: in use and clean");
                }
                if awaiting {
                    debug!(server = %name, "power cycle window still open, waiting for the agent");
                }

                if self.run_steps(server, client, &plan.steps, pxe_mode).await {
                    if !client.is_fake() {
                        if let Some(note) = plan.note {
                            info!(server = %name, "{note}");
                            self.events
                                .record(server, ServerEvent::normal(REASON_SERVER_MANAGEMENT, note))
                                .await;
                        }
                        if plan.mark_power_cycled {
                            power_cycled_at = Some(Utc::now());
                        }
                    }
                    (plan.ready, plan.requeue)
                } else {
                    (false, Some(DEFAULT_REQUEUE_AFTER))
                }
            }
        };

        let update = StatusUpdate {
            power: power_state,
            in_use: allocated,
            mark_dirty,
            ready,
            power_cycled_at,
        };
        update_server_status(self.store.as_ref(), &name, |s| update.apply(s.status_mut())).await?;

        Ok(requeue.map_or_else(Action::await_change, Action::requeue))
    }

    /// Runs `steps` in order. Stops at the first failure, which is logged
    /// and recorded; returns whether every step succeeded.
    async fn run_steps(&self, server: &Server, client: &dyn PowerClient, steps: &[Step], pxe_mode: PxeMode) -> bool {
        for &step in steps {
            let result = match step {
                Step::SetPxe => client.set_pxe(pxe_mode).await,
                Step::PowerOn => client.power_on().await,
                Step::PowerOff => client.power_off().await,
                Step::PowerCycle => client.power_cycle().await,
            };

            if let Err(e) = result {
                warn!(server = %server.name_any(), ?step, error = %e, "power management call failed");
                self.events
                    .record(server, ServerEvent::warning(REASON_SERVER_MANAGEMENT, step.failure_note(&e)))
                    .await;
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_server::{AgentService, AgentServiceConfig};
    use crate::events::mock::MockEventRecorder;
    use crate::events::Severity;
    use crate::reconciler::test_support;
    use agent_api::{AgentApi, HeartbeatRequest};
    use crds::{ServerBinding, ServerBindingSpec, ServerSpec};
    use metal_store::{MemoryStore, MetalStore};
    use power_client::{MockPowerClient, MockPowerClientFactory, PowerAction};
    use std::sync::Arc;

    const NAME: &str = "4c4c4544-0032-3010-8051-b4c04f4e3232";

    struct Fixture {
        store: MemoryStore,
        client: MockPowerClient,
        events: MockEventRecorder,
        reconciler: Reconciler,
    }

    impl Fixture {
        fn new(client: MockPowerClient) -> Self {
            let store = MemoryStore::new();
            let events = MockEventRecorder::new();
            let reconciler = test_support::reconciler(&store, &MockPowerClientFactory::new(client.clone()), &events);
            Self {
                store,
                client,
                events,
                reconciler,
            }
        }

        fn server(&self, accepted: bool, status: ServerStatus) {
            let mut server = Server::new(
                NAME,
                ServerSpec {
                    accepted,
                    ..ServerSpec::default()
                },
            );
            server.status = Some(status);
            self.store.insert_server(server);
        }

        fn bind(&self) {
            self.store
                .insert_binding(ServerBinding::new(NAME, ServerBindingSpec::default()));
        }

        async fn reconcile(&self) -> Action {
            self.reconciler.reconcile_server(NAME).await.unwrap()
        }

        async fn status(&self) -> ServerStatus {
            self.store.get_server(NAME).await.unwrap().unwrap().status_or_default()
        }

        fn notes(&self) -> Vec<String> {
            self.events.events().into_iter().map(|e| e.note).collect()
        }
    }

    fn clean() -> ServerStatus {
        ServerStatus {
            is_clean: true,
            ..ServerStatus::default()
        }
    }

    #[test]
    fn test_phase_table() {
        assert_eq!(Phase::of(false, true, false), Phase::Unmanaged);
        assert_eq!(Phase::of(true, true, true), Phase::Inconsistent);
        assert_eq!(Phase::of(true, false, true), Phase::Idle);
        assert_eq!(Phase::of(true, true, false), Phase::Provisioning);
        assert_eq!(Phase::of(true, false, false), Phase::Wiping);
    }

    #[test]
    fn test_unknown_power_never_guesses() {
        let settings = test_support::settings();
        for phase in [Phase::Idle, Phase::Provisioning, Phase::Wiping] {
            assert_eq!(decide(phase, None, false, &settings), Decision::PowerUnknown);
        }
        // the wait window does not need the power state
        assert!(matches!(
            decide(Phase::Wiping, None, true, &settings),
            Decision::Act(Plan { ref steps, ready: false, .. }) if steps.is_empty()
        ));
        assert!(matches!(decide(Phase::Unmanaged, None, false, &settings), Decision::Act(_)));
    }

    #[test]
    fn test_awaiting_wipe_window() {
        let now = Utc::now();
        let timeout = Duration::from_secs(1200);
        let cycled = |age: i64| {
            vec![Condition::false_(
                CONDITION_POWER_CYCLE,
                "InProgress",
                "Server wipe in progress.",
                now - chrono::Duration::seconds(age),
            )]
        };

        assert!(awaiting_wipe(&cycled(60), now, timeout));
        assert!(!awaiting_wipe(&cycled(1300), now, timeout));
        assert!(!awaiting_wipe(&[], now, timeout));
        assert!(!awaiting_wipe(&[Condition::true_(CONDITION_POWER_CYCLE, now)], now, timeout));
    }

    #[tokio::test]
    async fn test_unaccepted_server_is_left_alone() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        fx.server(false, clean());

        let action = fx.reconcile().await;

        assert_eq!(action, Action::await_change());
        assert!(fx.client.power_actions().is_empty());
        assert_eq!(fx.client.actions(), vec![PowerAction::Close]);
        let status = fx.status().await;
        assert!(!status.ready);
        assert!(!status.is_clean);
        assert_eq!(status.power, Some(PowerState::On));
    }

    #[tokio::test]
    async fn test_idle_server_is_powered_off() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        fx.server(true, clean());

        let action = fx.reconcile().await;

        assert_eq!(action, Action::await_change());
        assert_eq!(fx.client.power_actions(), vec![PowerAction::PowerOff]);
        assert!(fx.status().await.ready);
        assert_eq!(fx.notes(), vec!["Server powered off.".to_string()]);
    }

    #[tokio::test]
    async fn test_steady_idle_server_is_not_rewritten() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.server(true, clean());

        fx.reconcile().await;
        let first = fx.store.get_server(NAME).await.unwrap().unwrap();
        fx.reconcile().await;
        let second = fx.store.get_server(NAME).await.unwrap().unwrap();

        assert!(fx.client.power_actions().is_empty());
        assert_eq!(first.status_or_default().power, Some(PowerState::Off));
        assert_eq!(first.resource_version(), second.resource_version());
    }

    #[tokio::test]
    async fn test_allocated_server_is_pxe_booted() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.server(true, clean());
        fx.bind();

        let action = fx.reconcile().await;

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(
            fx.client.power_actions(),
            vec![PowerAction::SetPxe(PxeMode::Uefi), PowerAction::PowerOn]
        );
        let status = fx.status().await;
        assert!(status.in_use);
        assert!(!status.is_clean);
        assert!(status.ready);
    }

    #[tokio::test]
    async fn test_running_allocated_server_is_only_rechecked() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        fx.server(true, ServerStatus::default());
        fx.bind();

        let action = fx.reconcile().await;

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert!(fx.client.power_actions().is_empty());
    }

    #[tokio::test]
    async fn test_server_pxe_mode_overrides_default() {
        let fx = Fixture::new(MockPowerClient::new());
        let mut server = Server::new(
            NAME,
            ServerSpec {
                accepted: true,
                pxe_mode: Some(PxeMode::Bios),
                ..ServerSpec::default()
            },
        );
        server.status = Some(ServerStatus::default());
        fx.store.insert_server(server);
        fx.bind();

        fx.reconcile().await;

        assert_eq!(fx.client.power_actions()[0], PowerAction::SetPxe(PxeMode::Bios));
    }

    #[tokio::test]
    async fn test_dirty_server_is_power_cycled_once_per_window() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        fx.server(true, ServerStatus::default());

        let action = fx.reconcile().await;

        assert_eq!(action, Action::requeue(Duration::from_secs(400)));
        assert_eq!(
            fx.client.power_actions(),
            vec![PowerAction::SetPxe(PxeMode::Uefi), PowerAction::PowerCycle]
        );
        let status = fx.status().await;
        assert!(!status.ready);
        let cond = conditions::find(&status.conditions, CONDITION_POWER_CYCLE).unwrap();
        assert!(conditions::is_false(&status.conditions, CONDITION_POWER_CYCLE));
        assert_eq!(cond.reason.as_deref(), Some("InProgress"));
        assert_eq!(fx.notes(), vec!["Server power cycled and set to PXE boot once.".to_string()]);

        // second reconcile inside the window does nothing
        let action = fx.reconcile().await;
        assert_eq!(action, Action::requeue(Duration::from_secs(400)));
        assert_eq!(fx.client.power_actions().len(), 2);
    }

    #[tokio::test]
    async fn test_powered_off_dirty_server_is_powered_on() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.server(true, ServerStatus::default());

        fx.reconcile().await;

        assert_eq!(
            fx.client.power_actions(),
            vec![PowerAction::SetPxe(PxeMode::Uefi), PowerAction::PowerOn]
        );
        assert_eq!(fx.notes(), vec!["Server powered on and set to PXE boot once.".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_window_is_retried() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        let stale = Utc::now() - chrono::Duration::seconds(1300);
        fx.server(
            true,
            ServerStatus {
                conditions: vec![Condition::false_(
                    CONDITION_POWER_CYCLE,
                    "InProgress",
                    "Server wipe in progress.",
                    stale,
                )],
                ..ServerStatus::default()
            },
        );

        fx.reconcile().await;

        assert_eq!(fx.client.power_actions().len(), 2);
        let status = fx.status().await;
        let cond = conditions::find(&status.conditions, CONDITION_POWER_CYCLE).unwrap();
        assert!(cond.last_transition_time > stale);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_window_open() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        let stale = Utc::now() - chrono::Duration::seconds(1300);
        fx.server(
            true,
            ServerStatus {
                conditions: vec![Condition::false_(
                    CONDITION_POWER_CYCLE,
                    "InProgress",
                    "Server wipe in progress.",
                    stale,
                )],
                ..ServerStatus::default()
            },
        );
        let agent = AgentService::new(
            Arc::new(fx.store.clone()),
            Arc::new(fx.events.clone()),
            AgentServiceConfig {
                auto_accept: false,
                insecure_wipe: true,
                auto_bmc_setup: false,
                reboot_timeout: Duration::from_secs(1200),
                secret_namespace: "default".to_string(),
            },
        );

        agent.heartbeat(HeartbeatRequest { uuid: NAME.to_string() }).await.unwrap();
        fx.reconcile().await;

        assert!(fx.client.power_actions().is_empty());
    }

    #[tokio::test]
    async fn test_fake_client_does_not_open_a_window() {
        let fx = Fixture::new(MockPowerClient::fake());
        fx.client.set_powered_on(true);
        fx.server(true, ServerStatus::default());

        fx.reconcile().await;

        assert_eq!(fx.client.power_actions().len(), 2);
        assert!(fx.events.events().is_empty());
        assert!(!conditions::has(&fx.status().await.conditions, CONDITION_POWER_CYCLE));
    }

    #[tokio::test]
    async fn test_unreadable_power_state_requeues() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.fail_status();
        fx.server(true, clean());

        let action = fx.reconcile().await;

        assert_eq!(action, Action::requeue(DEFAULT_REQUEUE_AFTER));
        assert!(fx.client.power_actions().is_empty());
        let status = fx.status().await;
        assert_eq!(status.power, Some(PowerState::Unknown));
        assert!(!status.ready);
        let warnings = fx.events.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].note.starts_with("Failed to determine power status"));
    }

    #[tokio::test]
    async fn test_failed_power_on_requeues() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.fail_on(PowerAction::PowerOn);
        fx.server(true, ServerStatus::default());
        fx.bind();

        let action = fx.reconcile().await;

        assert_eq!(action, Action::requeue(DEFAULT_REQUEUE_AFTER));
        assert!(!fx.status().await.ready);
        let events = fx.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert!(events[0].note.starts_with("Failed to power on"));
        assert_eq!(fx.client.actions().last(), Some(&PowerAction::Close));
    }

    #[tokio::test]
    async fn test_failed_set_pxe_stops_the_sequence() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        fx.client.fail_on(PowerAction::SetPxe(PxeMode::Uefi));
        fx.server(true, ServerStatus::default());

        fx.reconcile().await;

        assert_eq!(fx.client.power_actions(), vec![PowerAction::SetPxe(PxeMode::Uefi)]);
        assert!(!conditions::has(&fx.status().await.conditions, CONDITION_POWER_CYCLE));
    }

    #[tokio::test]
    async fn test_released_server_drops_pxe_booted() {
        let fx = Fixture::new(MockPowerClient::new());
        fx.client.set_powered_on(true);
        let now = Utc::now();
        fx.server(
            true,
            ServerStatus {
                in_use: true,
                conditions: vec![Condition::true_(CONDITION_PXE_BOOTED, now)],
                ..ServerStatus::default()
            },
        );

        fx.reconcile().await;

        let status = fx.status().await;
        assert!(!status.in_use);
        assert!(!conditions::has(&status.conditions, CONDITION_PXE_BOOTED));
        let events = fx.events.events();
        assert_eq!(events[0].reason, REASON_SERVER_ALLOCATION);
        assert_eq!(events[0].note, "Server marked as unallocated.");
        // released dirty server goes on to be wiped
        assert_eq!(fx.client.power_actions().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_server_is_ignored() {
        let fx = Fixture::new(MockPowerClient::new());
        assert_eq!(fx.reconcile().await, Action::await_change());
        assert!(fx.client.actions().is_empty());
    }
}
