//! # Courier Framework
//!
//! The application layer of Courier.
//!
//! This layer provides:
//! - [`Application`]: routes, hooks, typed error handlers and the dispatch
//!   cycle
//! - the context stack ([`ContextStack`], [`AppContext`], [`RequestContext`])
//! - an Axum-style [`Handler`] trait with [`FromContext`] extractors
//! - pluggable per-sender sessions ([`SessionInterface`])
//!
//! The framework knows nothing about transports; `courier-runtime` feeds it
//! environs and executes the commands it answers with.

pub mod app;
pub mod config;
pub mod ctx;
pub mod error;
pub mod extract;
pub mod handler;
pub mod request;
pub mod scope;
pub mod session;

pub use app::{APOLOGY, Application, Reply};
pub use config::AppConfig;
pub use ctx::{
    AppContext, AppContextGuard, ContextStack, Globals, Notification, RequestContext,
    RequestContextGuard,
};
pub use error::{AppError, ExtractError, ExtractResult, SessionError};
pub use extract::{Args, Body, FromContext};
pub use handler::{BoxedHandler, Handler, into_handler};
pub use request::Request;
pub use scope::RequestScope;
pub use session::{
    KeyValueBackend, KeyValueSessionInterface, MemoryBackend, MemorySessionInterface,
    NullSessionInterface, Session, SessionInterface,
};
