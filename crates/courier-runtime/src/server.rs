//! The server loop.
//!
//! A [`Server`] hosts one [`Application`] on one [`Transport`]. For every
//! received stanza it builds an environ, runs the application inside an
//! application context and executes the commands the response yields:
//!
//! ```text
//! transport ──stanza──▶ setup_environ ──▶ Application::call ──▶ Response
//!     ▲                                                           │
//!     └──────────── capability.execute(command) ◀── command ──────┘
//!                                │
//!                                └── ack fed back into the response
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_runtime::{LoopbackTransport, Server, ServerConfig};
//!
//! let transport = Arc::new(LoopbackTransport::new());
//! let server = Server::new(app, transport.clone(), ServerConfig {
//!     jid: Some("bot@example.com".into()),
//!     ..Default::default()
//! })?;
//! server.serve_forever().await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::signal;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use courier_core::{Command, Environ, EventKind, Jid, Response};
use courier_framework::{AppContext, Application, ContextStack, Notification};

use crate::capability::{Capability, CapabilityRegistry, STD, Standard};
use crate::config::ServerConfig;
use crate::error::{CapabilityError, ServerError, ServerResult};
use crate::stanza::Stanza;
use crate::transport::Transport;

#[derive(Default)]
struct Registered {
    order: Vec<Arc<dyn Capability>>,
    commands: HashMap<String, Arc<dyn Capability>>,
}

/// Hosts an application on a transport.
pub struct Server {
    app: Application,
    app_ctx: Arc<AppContext>,
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    base_environ: Environ,
    registry: RwLock<CapabilityRegistry>,
    registered: RwLock<Registered>,
}

impl Server {
    /// Creates a server for `app` on `transport`.
    ///
    /// The registry starts with the `std` capability, every capability
    /// linked into the binary and every capability the transport offers.
    pub fn new(
        app: Application,
        transport: Arc<dyn Transport>,
        config: ServerConfig,
    ) -> ServerResult<Self> {
        let app_jid = config
            .jid
            .as_deref()
            .map(str::parse::<Jid>)
            .transpose()?;

        let mut registry = CapabilityRegistry::collect_all();
        for capability in transport.capabilities() {
            registry.insert(capability);
        }
        registry.insert(Arc::new(Standard::new(transport.clone())));

        Ok(Self {
            app_ctx: app.app_context(),
            app,
            transport,
            config,
            base_environ: Self::create_environ(app_jid),
            registry: RwLock::new(registry),
            registered: RwLock::new(Registered::default()),
        })
    }

    /// The base environ every request starts from.
    pub fn create_environ(app_jid: Option<Jid>) -> Environ {
        Environ {
            app_jid,
            ..Environ::default()
        }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The application's own JID.
    pub fn jid(&self) -> Option<&Jid> {
        self.base_environ.app_jid.as_ref()
    }

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------

    /// Makes `capability` available for [`register_capability`].
    ///
    /// [`register_capability`]: Self::register_capability
    pub fn provide_capability(&self, capability: Arc<dyn Capability>) {
        self.registry.write().insert(capability);
    }

    /// Registers the capability called `name`. Registering twice is a no-op.
    pub fn register_capability(&self, name: &str) -> Result<(), CapabilityError> {
        if self.is_registered(name) {
            return Ok(());
        }
        let capability = self.registry.read().lookup(name)?;
        self.register(capability);
        Ok(())
    }

    /// Registers a capability object. Ignored when one with the same name is
    /// already registered.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        let mut registered = self.registered.write();
        if registered.order.iter().any(|c| c.name() == capability.name()) {
            return;
        }
        info!(capability = capability.name(), "Initializing capability");
        for command in capability.commands() {
            registered
                .commands
                .insert((*command).to_owned(), capability.clone());
        }
        registered.order.push(capability);
    }

    /// Registers every capability in the registry, `std` first.
    pub fn register_capabilities(&self) -> Result<(), CapabilityError> {
        self.register_capability(STD)?;
        let known: Vec<_> = self.registry.read().iter().cloned().collect();
        for capability in known {
            self.register(capability);
        }
        Ok(())
    }

    /// Fails with the first capability the application requires but the
    /// server did not register.
    pub fn check_app_requirements(&self) -> Result<(), CapabilityError> {
        match self
            .app
            .required_capabilities()
            .into_iter()
            .find(|name| !self.is_registered(name))
        {
            Some(missing) => Err(CapabilityError::NotFound(missing)),
            None => Ok(()),
        }
    }

    /// `true` when a capability called `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.read().order.iter().any(|c| c.name() == name)
    }

    /// Names of the registered capabilities, in registration order.
    pub fn capabilities(&self) -> Vec<String> {
        self.registered
            .read()
            .order
            .iter()
            .map(|c| c.name().to_owned())
            .collect()
    }

    /// Registers the capabilities and checks the application's requirements.
    /// Called once the transport is connected.
    pub fn start(&self) -> Result<(), CapabilityError> {
        self.register_capabilities()?;
        self.check_app_requirements()
    }

    // -------------------------------------------------------------------------
    // Handling
    // -------------------------------------------------------------------------

    /// Builds the environ for `stanza`.
    pub fn setup_environ(&self, stanza: &Stanza) -> Environ {
        let mut environ = self.base_environ.clone();
        environ.event = stanza.kind;
        environ.timestamp = Some(SystemTime::now());

        let capabilities = self.registered.read().order.clone();
        for capability in capabilities {
            capability.update_environ(&mut environ, stanza);
        }
        environ
    }

    /// Handles one stanza.
    ///
    /// Stanzas sent by the application itself and messages without a body
    /// are dropped.
    pub async fn handle(&self, stanza: Stanza) -> anyhow::Result<()> {
        let environ = self.setup_environ(&stanza);

        if self.config.skip_own_stanzas && environ.app_jid == environ.jid {
            trace!(jid = ?environ.jid, "Skipping own stanza");
            return Ok(());
        }
        if self.config.skip_empty_messages
            && environ.event == Some(EventKind::Message)
            && environ.body.as_deref().is_none_or(str::is_empty)
        {
            trace!(jid = ?environ.jid, "Skipping empty message");
            return Ok(());
        }

        debug!(environ = ?environ, "Handling stanza");
        self.run_app(environ).await
    }

    /// Runs the application for `environ` inside the server's application
    /// context and executes its response and notifications.
    ///
    /// The request context stays pushed until both are dispatched; its
    /// teardown hooks see the dispatch error, if any.
    pub async fn run_app(&self, environ: Environ) -> anyhow::Result<()> {
        let stack = ContextStack::new();
        let app_guard = self.app_ctx.enter(&stack);

        let result = async {
            let mut reply = self.app.call(&stack, environ.clone()).await?;
            let dispatched = async {
                self.dispatch_app_response(&environ, reply.response_mut()).await?;
                self.dispatch_notifications(reply.take_notifications()).await
            }
            .await;
            reply.close(dispatched.as_ref().err());
            dispatched
        }
        .await;

        app_guard.close(result.as_ref().err());
        result
    }

    /// Executes the commands of `response`, feeding each acknowledgement
    /// back before pulling the next command.
    pub async fn dispatch_app_response(
        &self,
        environ: &Environ,
        response: &mut Response,
    ) -> anyhow::Result<()> {
        let mut ack = Value::Null;
        while let Some(Command { name, payload }) = response.send(ack).await? {
            let capability = self
                .registered
                .read()
                .commands
                .get(&name)
                .cloned()
                .ok_or_else(|| ServerError::UnknownCommand(name.clone()))?;
            let Value::Object(payload) = payload else {
                return Err(ServerError::invalid_payload(name, payload).into());
            };
            trace!(command = %name, capability = capability.name(), "Executing command");
            ack = capability.execute(&name, environ, &payload).await?;
        }
        Ok(())
    }

    /// Dispatches every notification as its own response, addressed to the
    /// notified JID.
    pub async fn dispatch_notifications(
        &self,
        notifications: Vec<Notification>,
    ) -> anyhow::Result<()> {
        for Notification { jid, mut response } in notifications {
            let environ = Environ {
                jid: Some(jid),
                ..Environ::default()
            };
            self.dispatch_app_response(&environ, &mut response).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Serving
    // -------------------------------------------------------------------------

    /// Serves until the transport closes or the process is asked to stop.
    pub async fn serve_forever(&self) -> ServerResult<()> {
        self.serve_until(wait_for_shutdown()).await
    }

    /// Connects, starts, then handles stanzas until the transport closes or
    /// `shutdown` completes. A failing stanza is logged and does not stop
    /// the loop.
    pub async fn serve_until<F>(&self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let jid = self.jid().cloned().ok_or(ServerError::MissingJid)?;
        self.transport
            .connect(&jid, self.config.password.as_deref())
            .await
            .map_err(|e| ServerError::transport(format!("{e:#}")))?;
        self.start()?;
        info!(
            jid = %jid,
            transport = self.transport.name(),
            capabilities = ?self.capabilities(),
            "Server started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                received = self.transport.recv() => match received {
                    Ok(Some(stanza)) => {
                        let span = info_span!("stanza", from = ?stanza.from, kind = ?stanza.kind);
                        if let Err(err) = self.handle(stanza).instrument(span).await {
                            error!(error = %format!("{err:#}"), "Failed to handle stanza");
                        }
                    }
                    Ok(None) => {
                        info!("Transport closed");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "Transport receive failed");
                        break;
                    }
                },
                () = &mut shutdown => break,
            }
        }

        self.transport
            .disconnect()
            .await
            .map_err(|e| ServerError::transport(format!("{e:#}")))?;
        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            futures::future::pending::<()>().await;
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("app", &self.app.name())
            .field("transport", &self.transport.name())
            .field("jid", &self.jid())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
