//! Application and request contexts.
//!
//! Each execution unit (one task serving one inbound event) owns a
//! [`ContextStack`]: an application-context stack and a request-context
//! stack, both strictly LIFO. Nothing here is global; the stack is handed
//! to whoever needs it.
//!
//! - [`AppContext`]: scratch space ([`Globals`]) for one application
//!   activation. It is reference counted so it can be pushed re-entrantly,
//!   and runs the app-teardown hooks when the count drops to zero.
//! - [`RequestContext`]: one inbound event, its routing result and its
//!   session. Pushing it creates an implicit app context when the stack has
//!   none for the same application; popping the last level runs the
//!   request-teardown hooks and then pops that implicit context.
//!
//! Popping a context that is not on top of its stack is a programming error
//! and panics.
//!
//! # Example
//!
//! ```rust,ignore
//! let stack = ContextStack::new();
//! let ctx = app.request_context(environ);
//! let guard = ctx.enter(&stack).await;
//! // ... dispatch ...
//! guard.close(None);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::Mutex;
use tracing::{error, trace};

use courier_core::{Environ, IntoResponse, Jid, Response};

use crate::app::Application;
use crate::request::Request;
use crate::session::Session;

// =============================================================================
// Globals
// =============================================================================

/// Type-keyed scratch space of an application context.
#[derive(Default)]
pub struct Globals {
    values: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Globals {
    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.values.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the stored value of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.values
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the stored value of type `T`.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<T> {
        let value = self.values.lock().remove(&TypeId::of::<T>())?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.lock().contains_key(&TypeId::of::<T>())
    }

    /// Runs `f` on the value of type `T`, inserting `T::default()` first if
    /// needed.
    pub fn with<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync + Default,
    {
        let mut values = self.values.lock();
        let entry = values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match entry.downcast_mut::<T>() {
            Some(value) => f(value),
            None => unreachable!("globals entry stored under the wrong type id"),
        }
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Globals")
            .field("len", &self.values.lock().len())
            .finish()
    }
}

// =============================================================================
// ContextStack
// =============================================================================

#[derive(Default)]
struct Stacks {
    app: Vec<Arc<AppContext>>,
    request: Vec<Arc<RequestContext>>,
}

/// The app and request context stacks of one execution unit.
///
/// Cloning yields a handle to the same stacks.
#[derive(Clone, Default)]
pub struct ContextStack {
    inner: Arc<Mutex<Stacks>>,
}

impl ContextStack {
    /// Creates a pair of empty stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost application context.
    pub fn top_app(&self) -> Option<Arc<AppContext>> {
        self.inner.lock().app.last().cloned()
    }

    /// The innermost request context.
    pub fn top_request(&self) -> Option<Arc<RequestContext>> {
        self.inner.lock().request.last().cloned()
    }

    /// Number of application contexts on the stack.
    pub fn app_depth(&self) -> usize {
        self.inner.lock().app.len()
    }

    /// Number of request contexts on the stack.
    pub fn request_depth(&self) -> usize {
        self.inner.lock().request.len()
    }

    fn push_app(&self, ctx: Arc<AppContext>) {
        self.inner.lock().app.push(ctx);
    }

    fn pop_app(&self, expected: &Arc<AppContext>) {
        let popped = self.inner.lock().app.pop();
        match popped {
            Some(ctx) if Arc::ptr_eq(&ctx, expected) => {}
            Some(_) => panic!("popped wrong app context"),
            None => panic!("popped app context from an empty stack"),
        }
    }

    fn push_request(&self, ctx: Arc<RequestContext>) {
        self.inner.lock().request.push(ctx);
    }

    fn pop_request(&self, expected: &Arc<RequestContext>) {
        let popped = self.inner.lock().request.pop();
        match popped {
            Some(ctx) if Arc::ptr_eq(&ctx, expected) => {}
            Some(_) => panic!("popped wrong request context"),
            None => panic!("popped request context from an empty stack"),
        }
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stacks = self.inner.lock();
        f.debug_struct("ContextStack")
            .field("app", &stacks.app.len())
            .field("request", &stacks.request.len())
            .finish()
    }
}

// =============================================================================
// AppContext
// =============================================================================

/// One activation of an application.
pub struct AppContext {
    app: Application,
    refcnt: AtomicIsize,
    globals: Globals,
}

impl AppContext {
    /// Creates an application context. It is not pushed yet.
    pub fn new(app: Application) -> Arc<Self> {
        Arc::new(Self {
            app,
            refcnt: AtomicIsize::new(0),
            globals: Globals::default(),
        })
    }

    /// The application.
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Scratch space of this activation.
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Current nesting level.
    pub fn refcount(&self) -> isize {
        self.refcnt.load(Ordering::SeqCst)
    }

    /// Binds the context to `stack`.
    pub fn push(self: &Arc<Self>, stack: &ContextStack) {
        self.refcnt.fetch_add(1, Ordering::SeqCst);
        stack.push_app(self.clone());
        trace!(app = %self.app.name(), "app context pushed");
    }

    /// Unbinds the context. The last pop runs the app-teardown hooks with
    /// `exc`.
    ///
    /// # Panics
    ///
    /// Panics if this context is not on top of the app stack.
    pub fn pop(self: &Arc<Self>, stack: &ContextStack, exc: Option<&anyhow::Error>) {
        let remaining = self.refcnt.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            self.app.do_teardown_appcontext(exc);
        }
        stack.pop_app(self);
        trace!(app = %self.app.name(), "app context popped");
    }

    /// Pushes the context and returns a guard that pops it.
    pub fn enter(self: &Arc<Self>, stack: &ContextStack) -> AppContextGuard {
        self.push(stack);
        AppContextGuard {
            ctx: self.clone(),
            stack: stack.clone(),
            closed: false,
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("app", &self.app.name())
            .field("refcnt", &self.refcount())
            .finish_non_exhaustive()
    }
}

/// Pops an [`AppContext`] when closed or dropped.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct AppContextGuard {
    ctx: Arc<AppContext>,
    stack: ContextStack,
    closed: bool,
}

impl AppContextGuard {
    /// The guarded context.
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Pops the context, passing `exc` to the teardown hooks.
    pub fn close(mut self, exc: Option<&anyhow::Error>) {
        self.closed = true;
        self.ctx.pop(&self.stack, exc);
    }
}

impl Drop for AppContextGuard {
    fn drop(&mut self) {
        if !self.closed {
            self.ctx.pop(&self.stack, None);
        }
    }
}

// =============================================================================
// RequestContext
// =============================================================================

/// A reply queued for someone other than the sender.
#[derive(Debug)]
pub struct Notification {
    /// Recipient.
    pub jid: Jid,
    /// What to send.
    pub response: Response,
}

/// One inbound event being dispatched.
pub struct RequestContext {
    app: Application,
    request: Request,
    session: Mutex<Option<Session>>,
    implicit_app_ctx: Mutex<Vec<Option<Arc<AppContext>>>>,
    notifications: Mutex<Vec<Notification>>,
}

impl RequestContext {
    /// Creates a request context and routes `environ` right away.
    pub fn new(app: Application, environ: Environ) -> Arc<Self> {
        let mut request = Request::new(environ);
        let result = app.route_map().bind_to_environ(request.environ()).match_rule();
        request.set_match(result);
        Arc::new(Self {
            app,
            request,
            session: Mutex::new(None),
            implicit_app_ctx: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        })
    }

    /// The application.
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// The wrapped request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Nesting level of this context.
    pub fn depth(&self) -> usize {
        self.implicit_app_ctx.lock().len()
    }

    pub(crate) fn session_slot(&self) -> &Mutex<Option<Session>> {
        &self.session
    }

    /// Queues a reply to `jid`.
    pub fn notify(&self, jid: Jid, response: impl IntoResponse) {
        self.notifications.lock().push(Notification {
            jid,
            response: response.into_response(),
        });
    }

    /// Takes the queued notifications.
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    /// Binds the context to `stack`.
    ///
    /// Creates an implicit app context when the stack has none for this
    /// application. The session is opened on the first push; a store error
    /// or a missing session falls back to the null session.
    pub async fn push(self: &Arc<Self>, stack: &ContextStack) {
        let implicit = match stack.top_app() {
            Some(top) if top.app().ptr_eq(&self.app) => None,
            _ => {
                let app_ctx = AppContext::new(self.app.clone());
                app_ctx.push(stack);
                Some(app_ctx)
            }
        };
        self.implicit_app_ctx.lock().push(implicit);
        stack.push_request(self.clone());

        if self.session.lock().is_some() {
            return;
        }
        let interface = self.app.session_interface();
        let session = match interface.open_session(&self.app, &self.request).await {
            Ok(Some(session)) => session,
            Ok(None) => interface.make_null_session(&self.app),
            Err(err) => {
                error!(error = %err, "failed to open session");
                interface.make_null_session(&self.app)
            }
        };
        *self.session.lock() = Some(session);
    }

    /// Unbinds the context.
    ///
    /// The last level runs the request-teardown hooks. An implicit app
    /// context created by the matching push is popped afterwards with the
    /// same `exc`.
    ///
    /// # Panics
    ///
    /// Panics if this context is not on top of the request stack.
    pub fn pop(self: &Arc<Self>, stack: &ContextStack, exc: Option<&anyhow::Error>) {
        let (app_ctx, last) = {
            let mut implicit = self.implicit_app_ctx.lock();
            let app_ctx = implicit.pop().flatten();
            (app_ctx, implicit.is_empty())
        };
        if last {
            self.app.do_teardown_request(exc);
        }
        stack.pop_request(self);
        if let Some(app_ctx) = app_ctx {
            app_ctx.pop(stack, exc);
        }
    }

    /// Pushes the context and returns a guard that pops it.
    pub async fn enter(self: &Arc<Self>, stack: &ContextStack) -> RequestContextGuard {
        self.push(stack).await;
        RequestContextGuard {
            ctx: self.clone(),
            stack: stack.clone(),
            closed: false,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("app", &self.app.name())
            .field("request", &self.request)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

/// Pops a [`RequestContext`] when closed or dropped.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct RequestContextGuard {
    ctx: Arc<RequestContext>,
    stack: ContextStack,
    closed: bool,
}

impl RequestContextGuard {
    /// The guarded context.
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    /// Pops the context, passing `exc` to the teardown hooks.
    pub fn close(mut self, exc: Option<&anyhow::Error>) {
        self.closed = true;
        self.ctx.pop(&self.stack, exc);
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        if !self.closed {
            self.ctx.pop(&self.stack, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn environ() -> Environ {
        Environ::message("alice@example.com/home".parse().unwrap(), "ping")
    }

    #[test]
    fn test_globals() {
        let globals = Globals::default();
        assert!(!globals.contains::<u32>());
        globals.insert(5u32);
        assert_eq!(globals.get::<u32>(), Some(5));
        globals.with(|n: &mut u32| *n += 1);
        assert_eq!(globals.remove::<u32>(), Some(6));
        assert_eq!(globals.with(|v: &mut Vec<String>| v.len()), 0);
    }

    #[tokio::test]
    async fn test_implicit_app_context() {
        let app = Application::new("ctx");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        app.teardown_appcontext(move |exc| {
            seen.lock().push(exc.map(ToString::to_string));
            Ok(())
        });

        let stack = ContextStack::new();
        let ctx = app.request_context(environ());
        ctx.push(&stack).await;
        assert_eq!(stack.app_depth(), 1);
        assert_eq!(stack.request_depth(), 1);
        assert!(ctx.session_slot().lock().as_ref().is_some_and(Session::is_null));

        ctx.pop(&stack, None);
        assert_eq!(stack.app_depth(), 0);
        assert_eq!(stack.request_depth(), 0);
        assert_eq!(*errors.lock(), vec![None]);
    }

    #[tokio::test]
    async fn test_reuses_matching_app_context() {
        let app = Application::new("ctx");
        let stack = ContextStack::new();
        let app_ctx = app.app_context();
        let app_guard = app_ctx.enter(&stack);

        let ctx = app.request_context(environ());
        let guard = ctx.enter(&stack).await;
        assert_eq!(stack.app_depth(), 1);
        guard.close(None);
        assert_eq!(stack.app_depth(), 1);
        app_guard.close(None);
        assert_eq!(stack.app_depth(), 0);
    }

    #[tokio::test]
    async fn test_other_app_gets_own_context() {
        let first = Application::new("first");
        let second = Application::new("second");
        let stack = ContextStack::new();
        let _outer = first.app_context().enter(&stack);

        let ctx = second.request_context(environ());
        let guard = ctx.enter(&stack).await;
        assert_eq!(stack.app_depth(), 2);
        assert!(stack.top_app().unwrap().app().ptr_eq(&second));
        drop(guard);
        assert_eq!(stack.app_depth(), 1);
    }

    #[tokio::test]
    async fn test_request_teardown_runs_on_last_level() {
        let app = Application::new("ctx");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        app.teardown_request(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let stack = ContextStack::new();
        let ctx = app.request_context(environ());
        ctx.push(&stack).await;
        ctx.push(&stack).await;
        assert_eq!(ctx.depth(), 2);
        assert_eq!(stack.app_depth(), 1);

        ctx.pop(&stack, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        ctx.pop(&stack, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stack.app_depth(), 0);
    }

    #[tokio::test]
    async fn test_teardown_receives_error() {
        let app = Application::new("ctx");
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        app.teardown_request(move |exc| {
            *slot.lock() = exc.map(ToString::to_string);
            Ok(())
        });

        let stack = ContextStack::new();
        let guard = app.request_context(environ()).enter(&stack).await;
        guard.close(Some(&anyhow::anyhow!("handler failed")));
        assert_eq!(seen.lock().as_deref(), Some("handler failed"));
    }

    #[test]
    fn test_app_refcount() {
        let app = Application::new("ctx");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        app.teardown_appcontext(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let stack = ContextStack::new();
        let ctx = app.app_context();
        ctx.push(&stack);
        ctx.push(&stack);
        assert_eq!(ctx.refcount(), 2);
        ctx.pop(&stack, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        ctx.pop(&stack, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "popped wrong app context")]
    fn test_pop_wrong_context_panics() {
        let app = Application::new("ctx");
        let stack = ContextStack::new();
        let first = app.app_context();
        let second = app.app_context();
        first.push(&stack);
        second.push(&stack);
        first.pop(&stack, None);
    }
}
