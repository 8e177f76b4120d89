//! `Orchestrator` - the root object that wires and sequences every component.
//!
//! Construction builds the closure hub, waiting room, session registry,
//! matchmaker and transport in dependency order, subscribes the two
//! participant holders to the hub, and registers all five with the lifecycle
//! hub. `start` brings them up in that order; `end` tears them down in
//! reverse.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::closure::{ClosureHub, ClosureSubscription};
use crate::config::Config;
use crate::errors::ServerError;
use crate::lifecycle::LifecycleHub;
use crate::matchmaker::Matchmaker;
use crate::registry::SessionRegistry;
use crate::session::{GreetingRules, RulesFactory};
use crate::shutdown;
use crate::transport::WebSocketTransport;
use crate::waiting_room::WaitingRoom;

/// Owns every core component for the life of the process.
pub struct Orchestrator {
    config: Config,
    lifecycle: LifecycleHub,
    closure_hub: Arc<ClosureHub>,
    waiting_room: Arc<WaitingRoom>,
    registry: Arc<SessionRegistry>,
    matchmaker: Arc<Matchmaker>,
    transport: Arc<WebSocketTransport>,
    _subscriptions: Vec<ClosureSubscription>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build the server with the placeholder game and no `/metrics` endpoint.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rules = GreetingRules::factory(config.session_turns);
        Self::build(config, rules, None)
    }

    /// Build the server with a specific rules engine and optional metrics handle.
    #[must_use]
    pub fn build(config: Config, rules: RulesFactory, metrics: Option<PrometheusHandle>) -> Self {
        let lifecycle = LifecycleHub::new();

        let closure_hub = ClosureHub::new();
        lifecycle.register(closure_hub.clone());

        let waiting_room = WaitingRoom::new();
        lifecycle.register(waiting_room.clone());

        let registry = SessionRegistry::new(
            Arc::clone(&waiting_room),
            rules,
            config.session_check_interval,
            config.shutdown_timeout,
        );
        lifecycle.register(registry.clone());

        let matchmaker = Matchmaker::new(
            Arc::clone(&waiting_room),
            Arc::clone(&registry),
            config.players_per_session,
            config.matchmaker_poll_interval,
            config.shutdown_timeout,
        );
        lifecycle.register(matchmaker.clone());

        let transport = WebSocketTransport::with_metrics(
            config.bind_address,
            config.max_connections,
            Arc::clone(&closure_hub),
            Arc::clone(&waiting_room),
            config.shutdown_timeout,
            metrics,
        );
        lifecycle.register(transport.clone());

        let subscriptions = vec![
            closure_hub.subscribe(waiting_room.clone()),
            closure_hub.subscribe(matchmaker.clone()),
        ];

        Self {
            config,
            lifecycle,
            closure_hub,
            waiting_room,
            registry,
            matchmaker,
            transport,
            _subscriptions: subscriptions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start every component in registration order.
    ///
    /// On failure the components already started are ended again and the
    /// error is returned.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!(
            target: "table.orchestrator",
            bind_address = %self.config.bind_address,
            players_per_session = self.config.players_per_session,
            "Starting components"
        );

        if let Err(e) = self.lifecycle.start_all().await {
            error!(target: "table.orchestrator", error = %e, "Startup failed, unwinding");
            self.lifecycle.end_all().await;
            return Err(e);
        }
        Ok(())
    }

    /// Block until a quit command, a termination signal or the shutdown trigger.
    ///
    /// End of standard input alone does not release the wait.
    pub async fn wait(&self) {
        tokio::select! {
            () = shutdown::quit_command() => {}
            () = shutdown::shutdown_signal() => {}
            () = self.shutdown.cancelled() => {
                info!(target: "table.orchestrator", "Shutdown triggered");
            }
        }
    }

    /// End every component in reverse registration order.
    pub async fn end(&self) {
        info!(target: "table.orchestrator", "Stopping components");
        self.lifecycle.end_all().await;
        info!(target: "table.orchestrator", "All components stopped");
    }

    /// Token that releases [`Orchestrator::wait`] when cancelled.
    #[must_use]
    pub fn shutdown_trigger(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Address the transport bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn closure_hub(&self) -> &Arc<ClosureHub> {
        &self.closure_hub
    }

    #[must_use]
    pub fn waiting_room(&self) -> &Arc<WaitingRoom> {
        &self.waiting_room
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleHub {
        &self.lifecycle
    }
}
