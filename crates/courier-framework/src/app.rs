//! The application object.
//!
//! An [`Application`] owns the route map, the handler table, the lifecycle
//! hooks and the typed error handlers. [`Application::call`] runs one
//! complete dispatch cycle for an inbound environ and hands back a
//! [`Reply`] that keeps the request context pushed while its response is
//! pulled:
//!
//! ```text
//! push RequestContext ─► before_request hooks ─► handler
//!        │                       │ short-circuit    │
//!        │                       └──────┬───────────┘
//!        │                   errors ─► handle_user_exception
//!        │                              │
//!        │                 save session ─► after_request hooks (group, global)
//!        │                              │
//!        │                        Reply: pull commands, feed acks
//!        ▼
//! Reply::close ─► pop RequestContext ─► teardown_request hooks ─► teardown_appcontext hooks
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Application, ContextStack};
//!
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! let app = Application::new("pinger");
//! app.route("ping", ping)?;
//!
//! let stack = ContextStack::new();
//! let reply = app.call(&stack, environ).await?;
//! let commands = reply.collect().await?;
//! ```

use std::any::{TypeId, type_name};
use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{Instrument, debug, debug_span, error, warn};

use courier_core::{
    BuildError, Command, Environ, EventKind, IntoResponse, IntoResponseResult, NotFound, Params,
    Query, Response, RouteMap, Rule,
};

use crate::config::AppConfig;
use crate::ctx::{AppContext, ContextStack, Notification, RequestContext, RequestContextGuard};
use crate::error::AppError;
use crate::handler::{BoxedHandler, Handler, endpoint_name_of, into_handler};
use crate::request::Request;
use crate::scope::RequestScope;
use crate::session::{NullSessionInterface, SessionInterface};

/// Reply sent when a handler fails outside debug mode and no error handler
/// is registered.
pub const APOLOGY: &str = "Some application error happened. Probably that's my bug :)";

// =============================================================================
// Hooks
// =============================================================================

type BeforeHook =
    Arc<dyn Fn(RequestScope) -> BoxFuture<'static, anyhow::Result<Option<Response>>> + Send + Sync>;
type AfterHook = Arc<dyn Fn(Response) -> anyhow::Result<Response> + Send + Sync>;
type TeardownHook = Arc<dyn Fn(Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync>;
type DefaultsHook = Arc<dyn Fn(&str, &mut Params) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_request: Vec<BeforeHook>,
    after_request: Vec<AfterHook>,
    after_request_by_group: HashMap<String, Vec<AfterHook>>,
    teardown_request: Vec<TeardownHook>,
    teardown_appcontext: Vec<TeardownHook>,
    route_defaults: Vec<DefaultsHook>,
    route_defaults_by_namespace: HashMap<String, Vec<DefaultsHook>>,
}

struct ErrorHandler {
    type_id: TypeId,
    type_name: &'static str,
    matches_outer: fn(&anyhow::Error) -> bool,
    matches_chain: fn(&anyhow::Error) -> bool,
    call: Box<dyn Fn(&anyhow::Error) -> Option<anyhow::Result<Response>> + Send + Sync>,
}

fn matches_outer<E: StdError + Send + Sync + 'static>(err: &anyhow::Error) -> bool {
    err.downcast_ref::<E>().is_some()
}

fn matches_chain<E: StdError + Send + Sync + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<E>())
}

// =============================================================================
// Application
// =============================================================================

/// What one dispatch cycle produced.
///
/// The request context stays pushed until the reply is closed, so commands
/// pulled from a suspending handler still see the request, its session and
/// its globals. Dropping the reply closes it without an error.
pub struct Reply {
    response: Response,
    guard: RequestContextGuard,
}

impl Reply {
    /// The response to the sender.
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// The request context the reply keeps alive.
    pub fn context(&self) -> &Arc<RequestContext> {
        self.guard.context()
    }

    /// Takes the replies queued for other recipients so far.
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.guard.context().take_notifications()
    }

    /// Pops the request context, passing `exc` to the teardown hooks.
    pub fn close(self, exc: Option<&anyhow::Error>) {
        self.guard.close(exc);
    }

    /// Drains the response, acknowledging every command with `null`, then
    /// closes the reply with the error that stopped it, if any.
    pub async fn collect(mut self) -> anyhow::Result<Vec<Command>> {
        let mut commands = Vec::new();
        let result = loop {
            match self.response.next().await {
                Ok(Some(command)) => commands.push(command),
                Ok(None) => break Ok(commands),
                Err(err) => break Err(err),
            }
        };
        self.close(result.as_ref().err());
        result
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("response", &self.response)
            .field("context", self.guard.context())
            .finish()
    }
}

struct AppInner {
    name: String,
    config: RwLock<AppConfig>,
    route_map: RouteMap,
    view_functions: RwLock<HashMap<String, BoxedHandler>>,
    hooks: RwLock<Hooks>,
    error_handlers: RwLock<Vec<Arc<ErrorHandler>>>,
    session_interface: RwLock<Arc<dyn SessionInterface>>,
    required_capabilities: RwLock<BTreeSet<String>>,
}

/// A chat application: routes, handlers, hooks and error handlers.
///
/// Cloning yields another handle to the same application.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    /// Creates an application with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, AppConfig::default())
    }

    /// Creates an application with the given configuration.
    pub fn with_config(name: impl Into<String>, config: AppConfig) -> Self {
        Self::with_route_map(name, config, RouteMap::new())
    }

    /// Creates an application around a prepared route map, for example one
    /// with custom converters registered.
    pub fn with_route_map(name: impl Into<String>, config: AppConfig, route_map: RouteMap) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: name.into(),
                config: RwLock::new(config),
                route_map,
                view_functions: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Hooks::default()),
                error_handlers: RwLock::new(Vec::new()),
                session_interface: RwLock::new(Arc::new(NullSessionInterface)),
                required_capabilities: RwLock::new(BTreeSet::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if both handles refer to the same application.
    pub fn ptr_eq(&self, other: &Application) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> AppConfig {
        self.inner.config.read().clone()
    }

    /// Replaces the configuration.
    pub fn set_config(&self, config: AppConfig) {
        *self.inner.config.write() = config;
    }

    /// The route map.
    pub fn route_map(&self) -> &RouteMap {
        &self.inner.route_map
    }

    /// The session store in use.
    pub fn session_interface(&self) -> Arc<dyn SessionInterface> {
        self.inner.session_interface.read().clone()
    }

    /// Replaces the session store.
    pub fn set_session_interface(&self, interface: Arc<dyn SessionInterface>) {
        *self.inner.session_interface.write() = interface;
    }

    // -------------------------------------------------------------------------
    // Routes
    // -------------------------------------------------------------------------

    /// Routes message events whose body matches `pattern` to `handler`.
    ///
    /// The endpoint is the handler's function name.
    pub fn route<H, T>(&self, pattern: impl Into<String>, handler: H) -> Result<Arc<Rule>, AppError>
    where
        H: Handler<T>,
        T: 'static,
    {
        self.add_route(Rule::new(pattern).event_type(EventKind::Message), handler)
    }

    /// Routes presence events to `handler`.
    pub fn route_presence<H, T>(&self, handler: H) -> Result<Arc<Rule>, AppError>
    where
        H: Handler<T>,
        T: 'static,
    {
        self.add_route(Rule::new("").event_type(EventKind::Presence), handler)
    }

    /// Registers `rule` and stores `handler` under its endpoint.
    ///
    /// A rule without an endpoint takes the handler's function name;
    /// closures need an explicit endpoint.
    pub fn add_route<H, T>(&self, mut rule: Rule, handler: H) -> Result<Arc<Rule>, AppError>
    where
        H: Handler<T>,
        T: 'static,
    {
        if rule.endpoint_name().is_empty() {
            let name = endpoint_name_of::<H>()
                .ok_or_else(|| AppError::EndpointRequired(type_name::<H>().to_owned()))?;
            rule.set_endpoint(name);
        }
        let rule = self.add_rule(rule)?;
        self.inner
            .view_functions
            .write()
            .insert(rule.endpoint_name().to_owned(), into_handler(handler));
        Ok(rule)
    }

    /// Registers a rule without a handler. Such rules only take part in
    /// reverse routing; a message matching one fails with
    /// [`AppError::MissingHandler`].
    pub fn add_rule(&self, rule: Rule) -> Result<Arc<Rule>, AppError> {
        if rule.endpoint_name().is_empty() {
            return Err(AppError::EndpointRequired(rule.pattern().to_owned()));
        }
        let rule = self.inner.route_map.add(rule)?;
        debug!(app = %self.name(), rule = %rule, "route registered");
        Ok(rule)
    }

    /// The handler registered for `endpoint`.
    pub fn view_function(&self, endpoint: &str) -> Option<BoxedHandler> {
        self.inner.view_functions.read().get(endpoint).cloned()
    }

    /// Declares a server capability the application cannot run without.
    pub fn require_capability(&self, name: impl Into<String>) {
        self.inner.required_capabilities.write().insert(name.into());
    }

    /// Capabilities declared with [`require_capability`](Self::require_capability).
    pub fn required_capabilities(&self) -> BTreeSet<String> {
        self.inner.required_capabilities.read().clone()
    }

    // -------------------------------------------------------------------------
    // Hook registration
    // -------------------------------------------------------------------------

    /// Runs `hook` before every dispatch. A hook answering `Some` response
    /// skips the handler and the remaining hooks.
    pub fn before_request<F, Fut>(&self, hook: F)
    where
        F: Fn(RequestScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Response>>> + Send + 'static,
    {
        self.inner
            .hooks
            .write()
            .before_request
            .push(Arc::new(move |scope| Box::pin(hook(scope))));
    }

    /// Runs `hook` on every response. Hooks run in reverse registration
    /// order, after the group hooks.
    pub fn after_request<F>(&self, hook: F)
    where
        F: Fn(Response) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        self.inner.hooks.write().after_request.push(Arc::new(hook));
    }

    /// Runs `hook` on responses of endpoints in `group`.
    pub fn after_request_for<F>(&self, group: impl Into<String>, hook: F)
    where
        F: Fn(Response) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .write()
            .after_request_by_group
            .entry(group.into())
            .or_default()
            .push(Arc::new(hook));
    }

    /// Runs `hook` when the last level of a request context is popped.
    pub fn teardown_request<F>(&self, hook: F)
    where
        F: Fn(Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.hooks.write().teardown_request.push(Arc::new(hook));
    }

    /// Runs `hook` when the last level of an application context is popped.
    pub fn teardown_appcontext<F>(&self, hook: F)
    where
        F: Fn(Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.hooks.write().teardown_appcontext.push(Arc::new(hook));
    }

    /// Runs `hook` on the values of every reverse-routing request.
    pub fn route_defaults<F>(&self, hook: F)
    where
        F: Fn(&str, &mut Params) + Send + Sync + 'static,
    {
        self.inner.hooks.write().route_defaults.push(Arc::new(hook));
    }

    /// Runs `hook` when reverse-routing endpoints of `namespace`, the part
    /// of the endpoint before its first `.`.
    pub fn route_defaults_for<F>(&self, namespace: impl Into<String>, hook: F)
    where
        F: Fn(&str, &mut Params) + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .write()
            .route_defaults_by_namespace
            .entry(namespace.into())
            .or_default()
            .push(Arc::new(hook));
    }

    /// Handles errors of type `E` raised by hooks and handlers.
    ///
    /// Registering a second handler for the same type replaces the first.
    pub fn on_error<E, F, R>(&self, handler: F)
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: IntoResponseResult,
    {
        let entry = ErrorHandler {
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            matches_outer: matches_outer::<E>,
            matches_chain: matches_chain::<E>,
            call: Box::new(move |err| {
                let found = err
                    .downcast_ref::<E>()
                    .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<E>()))?;
                Some(handler(found).into_response_result())
            }),
        };
        let mut handlers = self.inner.error_handlers.write();
        handlers.retain(|existing| existing.type_id != entry.type_id);
        handlers.push(Arc::new(entry));
    }

    // -------------------------------------------------------------------------
    // Contexts
    // -------------------------------------------------------------------------

    /// Creates an application context. It is not pushed yet.
    pub fn app_context(&self) -> Arc<AppContext> {
        AppContext::new(self.clone())
    }

    /// Creates a request context for `environ` and routes it. It is not
    /// pushed yet.
    pub fn request_context(&self, environ: Environ) -> Arc<RequestContext> {
        RequestContext::new(self.clone(), environ)
    }

    /// Runs the request-teardown hooks in reverse registration order.
    pub fn do_teardown_request(&self, exc: Option<&anyhow::Error>) {
        let hooks = self.inner.hooks.read().teardown_request.clone();
        run_teardown(&hooks, exc, "request");
    }

    /// Runs the app-teardown hooks in reverse registration order.
    pub fn do_teardown_appcontext(&self, exc: Option<&anyhow::Error>) {
        let hooks = self.inner.hooks.read().teardown_appcontext.clone();
        run_teardown(&hooks, exc, "appcontext");
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Runs one complete dispatch cycle for `environ` on `stack`.
    ///
    /// On success the request context is handed over to the returned
    /// [`Reply`]; on failure it is popped here and the teardown hooks see
    /// the error.
    pub async fn call(&self, stack: &ContextStack, environ: Environ) -> anyhow::Result<Reply> {
        let ctx = self.request_context(environ);
        let guard = ctx.enter(stack).await;
        let scope = RequestScope::new(ctx.clone(), stack.clone());

        let span = debug_span!(
            "dispatch",
            app = %self.name(),
            endpoint = ctx.request().endpoint().unwrap_or("-"),
        );
        let result = self.full_dispatch_request(&scope).instrument(span).await;

        match result {
            Ok(response) => Ok(Reply { response, guard }),
            Err(err) => {
                guard.close(Some(&err));
                Err(err)
            }
        }
    }

    /// Runs the hooks and the handler for the request in `scope` and turns
    /// the outcome into a response.
    pub async fn full_dispatch_request(&self, scope: &RequestScope) -> anyhow::Result<Response> {
        let result = match self.preprocess_request(scope).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => self.dispatch_request(scope).await,
            Err(err) => Err(err),
        };
        let response = match result {
            Ok(response) => response,
            Err(err) => self.handle_user_exception(err)?,
        };
        self.process_response(scope, response).await
    }

    /// Runs the before-request hooks in registration order.
    pub async fn preprocess_request(
        &self,
        scope: &RequestScope,
    ) -> anyhow::Result<Option<Response>> {
        let hooks = self.inner.hooks.read().before_request.clone();
        for hook in hooks {
            if let Some(response) = hook(scope.clone()).await? {
                debug!(app = %self.name(), "request answered by before_request hook");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Invokes the handler of the matched endpoint. A stored routing
    /// failure is returned as [`NotFound`].
    pub async fn dispatch_request(&self, scope: &RequestScope) -> anyhow::Result<Response> {
        let handler = {
            let request = scope.request();
            if let Some(err) = request.routing_error() {
                return Err(err.into());
            }
            let endpoint = request.endpoint().ok_or(NotFound)?;
            self.view_function(endpoint)
                .ok_or_else(|| AppError::MissingHandler(endpoint.to_owned()))?
        };
        handler(scope.clone()).await
    }

    /// Saves the session and runs the after-request hooks: the hooks of the
    /// request's group first, then the global ones, each list in reverse
    /// registration order.
    pub async fn process_response(
        &self,
        scope: &RequestScope,
        response: Response,
    ) -> anyhow::Result<Response> {
        let session = scope.session().clone();
        let interface = self.session_interface();
        if !interface.is_null_session(&session) {
            interface.save_session(self, &session, &response).await?;
        }

        let hooks: Vec<AfterHook> = {
            let hooks = self.inner.hooks.read();
            let group = scope
                .request()
                .group()
                .and_then(|group| hooks.after_request_by_group.get(group))
                .into_iter()
                .flatten();
            group
                .rev()
                .chain(hooks.after_request.iter().rev())
                .cloned()
                .collect()
        };
        let mut response = response;
        for hook in hooks {
            response = hook(response)?;
        }
        Ok(response)
    }

    /// Turns a hook or handler error into a response.
    ///
    /// A registered error handler for the error's type wins. Unrouted
    /// requests without a handler get an empty response. Anything else is
    /// logged and, without a handler, returned in debug mode or answered
    /// with [`APOLOGY`].
    pub fn handle_user_exception(&self, err: anyhow::Error) -> anyhow::Result<Response> {
        let handler = self.find_error_handler(&err);

        if err.is::<NotFound>() {
            return match handler {
                Some(handler) => invoke_error_handler(&handler, err),
                None => {
                    debug!(app = %self.name(), "no route matched");
                    Ok(Response::empty())
                }
            };
        }

        error!(app = %self.name(), error = ?err, "unhandled application error");

        match handler {
            Some(handler) => invoke_error_handler(&handler, err),
            None if self.config().debug => Err(err),
            None => Ok(APOLOGY.into_response()),
        }
    }

    /// Most recent registration first; the outermost error is tried before
    /// its causes.
    fn find_error_handler(&self, err: &anyhow::Error) -> Option<Arc<ErrorHandler>> {
        let handlers = self.inner.error_handlers.read();
        handlers
            .iter()
            .rev()
            .find(|handler| (handler.matches_outer)(err))
            .or_else(|| {
                handlers
                    .iter()
                    .rev()
                    .find(|handler| (handler.matches_chain)(err))
            })
            .cloned()
    }

    // -------------------------------------------------------------------------
    // Reverse routing
    // -------------------------------------------------------------------------

    /// Runs the route-default hooks for `endpoint`: the global ones, then
    /// those of its namespace.
    pub fn inject_route_defaults(&self, endpoint: &str, values: &mut Params) {
        let hooks: Vec<DefaultsHook> = {
            let hooks = self.inner.hooks.read();
            let namespaced = endpoint
                .split_once('.')
                .and_then(|(namespace, _)| hooks.route_defaults_by_namespace.get(namespace))
                .into_iter()
                .flatten();
            hooks.route_defaults.iter().chain(namespaced).cloned().collect()
        };
        for hook in hooks {
            hook(endpoint, values);
        }
    }

    /// Builds the message text that reaches `endpoint` with `values`.
    ///
    /// An endpoint starting with `.` is resolved against the group of
    /// `request`'s endpoint.
    pub fn message_for(
        &self,
        request: &Request,
        endpoint: &str,
        mut values: Params,
    ) -> Result<String, BuildError> {
        let endpoint = match endpoint.strip_prefix('.') {
            Some(local) => match request.group() {
                Some(group) => format!("{group}.{local}"),
                None => local.to_owned(),
            },
            None => endpoint.to_owned(),
        };
        self.inject_route_defaults(&endpoint, &mut values);
        self.inner
            .route_map
            .bind(Query::default())
            .build(&endpoint, &values)
    }
}

fn invoke_error_handler(handler: &ErrorHandler, err: anyhow::Error) -> anyhow::Result<Response> {
    debug!(error_type = handler.type_name, "error handler invoked");
    match (handler.call)(&err) {
        Some(result) => result,
        None => Err(err),
    }
}

fn run_teardown(hooks: &[TeardownHook], exc: Option<&anyhow::Error>, kind: &'static str) {
    for hook in hooks.iter().rev() {
        if let Err(err) = hook(exc) {
            warn!(kind, error = %err, "teardown hook failed");
        }
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("routes", &self.inner.route_map.len())
            .field("config", &*self.inner.config.read())
            .finish_non_exhaustive()
    }
}
