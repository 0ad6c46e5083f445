//! Error types for the Courier framework.

use thiserror::Error;

/// Errors that can occur while extracting handler arguments.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The request has no matched route, so it carries no parameters.
    #[error("the request did not match a route")]
    Unrouted,

    /// A route parameter is missing.
    #[error("missing route parameter '{0}'")]
    MissingParam(String),

    /// Route parameters could not be deserialized into the requested type.
    #[error("invalid route parameters: {0}")]
    InvalidParams(String),

    /// The inbound event has no sender.
    #[error("the inbound event has no sender")]
    MissingSender,

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised while registering routes and handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// No endpoint name was given and none could be derived from the handler.
    #[error("an explicit endpoint is required for '{0}'")]
    EndpointRequired(String),

    /// The rule could not be compiled or registered.
    #[error(transparent)]
    Routing(#[from] courier_core::RoutingError),

    /// A rule matched but no handler is registered for its endpoint.
    #[error("no handler registered for endpoint '{0}'")]
    MissingHandler(String),
}

/// Errors raised by session objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session store is unavailable and this request runs with a null
    /// session, which does not accept changes.
    #[error("the session is unavailable; changes are not accepted")]
    NullSession,
}
