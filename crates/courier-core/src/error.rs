//! Unified error types for the Courier core.
//!
//! Routing produces two kinds of failure: the "soft" ones returned while
//! resolving an event ([`NotFound`], [`BuildError`]) and configuration
//! errors raised while a rule is being compiled ([`RoutingError`]).
//! Framework-level errors (like extraction failures) are defined in
//! `courier-framework`.

use thiserror::Error;

use crate::routing::Params;

// =============================================================================
// Routing Errors
// =============================================================================

/// No rule of a route map matched the incoming event.
///
/// The application treats this condition specially: unless a handler is
/// registered for it, it turns into an empty response instead of a
/// user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no route matched the incoming event")]
pub struct NotFound;

/// Reverse routing could not produce a message for an endpoint.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("could not build a message for endpoint '{endpoint}'")]
pub struct BuildError {
    /// The endpoint that was requested.
    pub endpoint: String,
    /// The values that were supplied (null entries already removed).
    pub values: Params,
}

impl BuildError {
    /// Creates a build error for the given endpoint and values.
    pub fn new(endpoint: impl Into<String>, values: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            values,
        }
    }
}

/// A converter rejected a value.
///
/// Never leaves the routing layer: a rejected capture means "this rule does
/// not match" and a rejected build value means "try the next rule".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value rejected by converter")]
pub struct ValidationError;

/// Errors raised while compiling or registering rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    /// The rule pattern could not be parsed.
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// The offending pattern.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A placeholder refers to a converter that is not registered.
    #[error("unknown converter '{0}'")]
    UnknownConverter(String),

    /// A converter was given arguments it does not accept.
    #[error("invalid arguments for converter '{converter}': {reason}")]
    InvalidConverterArgs {
        /// The converter name.
        converter: String,
        /// What is wrong with the arguments.
        reason: String,
    },

    /// The rule is already bound to a route map.
    #[error("rule {rule} is already bound to a route map")]
    AlreadyBound {
        /// Display form of the rule.
        rule: String,
    },

    /// The sender filter is not a valid regular expression.
    #[error("invalid sender pattern '{pattern}': {reason}")]
    InvalidSenderPattern {
        /// The pattern as given.
        pattern: String,
        /// The regex compiler's message.
        reason: String,
    },

    /// The compiled rule regex was rejected.
    #[error("rule '{rule}' compiles to an invalid pattern: {reason}")]
    InvalidPattern {
        /// The rule pattern.
        rule: String,
        /// The regex compiler's message.
        reason: String,
    },
}

impl RoutingError {
    /// Creates an invalid-rule error.
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-converter-arguments error.
    pub fn invalid_args(converter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConverterArgs {
            converter: converter.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for rule compilation and registration.
pub type RoutingResult<T> = Result<T, RoutingError>;

// =============================================================================
// JID Errors
// =============================================================================

/// A JID string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidError {
    /// The domain part is missing.
    #[error("JID '{0}' has no domain part")]
    MissingDomain(String),

    /// The node part is present but empty (`@domain`).
    #[error("JID '{0}' has an empty node part")]
    EmptyNode(String),

    /// The resource part is present but empty (`domain/`).
    #[error("JID '{0}' has an empty resource part")]
    EmptyResource(String),
}
