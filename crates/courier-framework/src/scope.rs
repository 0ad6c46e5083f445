//! The handle a handler gets on the request being dispatched.

use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, MutexGuard};

use courier_core::{BuildError, IntoResponse, Jid, Params};

use crate::app::Application;
use crate::ctx::{AppContext, ContextStack, Globals, RequestContext};
use crate::request::Request;
use crate::session::Session;

/// The active request context together with the stack it lives on.
///
/// Cheap to clone; every clone refers to the same context.
#[derive(Clone)]
pub struct RequestScope {
    ctx: Arc<RequestContext>,
    stack: ContextStack,
}

impl RequestScope {
    pub(crate) fn new(ctx: Arc<RequestContext>, stack: ContextStack) -> Self {
        Self { ctx, stack }
    }

    /// The application dispatching the request.
    pub fn app(&self) -> &Application {
        self.ctx.app()
    }

    /// The request context.
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    /// The context stack of the current execution unit.
    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    /// The request being dispatched.
    pub fn request(&self) -> &Request {
        self.ctx.request()
    }

    /// Parameters captured by the matched rule.
    pub fn params(&self) -> &Params {
        self.ctx.request().view_args()
    }

    /// The sender's session.
    ///
    /// The guard must not be held across an `.await`.
    pub fn session(&self) -> MappedMutexGuard<'_, Session> {
        MutexGuard::map(self.ctx.session_slot().lock(), |slot| {
            slot.get_or_insert_with(Session::null)
        })
    }

    /// The innermost application context.
    pub fn app_context(&self) -> Option<Arc<AppContext>> {
        self.stack.top_app()
    }

    /// Runs `f` on the scratch space of the innermost application context.
    pub fn with_globals<R>(&self, f: impl FnOnce(&Globals) -> R) -> Option<R> {
        self.app_context().map(|ctx| f(ctx.globals()))
    }

    /// Queues a reply to someone other than the sender.
    pub fn notify(&self, jid: Jid, response: impl IntoResponse) {
        self.ctx.notify(jid, response);
    }

    /// Builds the message text that reaches `endpoint` with `values`.
    ///
    /// An endpoint starting with `.` is looked up in the group of the
    /// current request's endpoint.
    pub fn message_for(&self, endpoint: &str, values: Params) -> Result<String, BuildError> {
        self.app().message_for(self.request(), endpoint, values)
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("ctx", &self.ctx)
            .field("stack", &self.stack)
            .finish()
    }
}
