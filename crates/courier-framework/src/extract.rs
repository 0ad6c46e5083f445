//! Extractor system for the Courier framework.
//!
//! Handler arguments are produced by [`FromContext`]. Built-in extractors:
//!
//! | type             | yields                                          |
//! |------------------|-------------------------------------------------|
//! | [`RequestScope`] | the whole scope                                 |
//! | [`Request`]      | a copy of the request                           |
//! | [`Environ`]      | a copy of the inbound environ                   |
//! | [`Params`]       | the captured route parameters                   |
//! | [`Args<T>`]      | the route parameters deserialized into `T`      |
//! | [`Jid`]          | the sender                                      |
//! | [`Body`]         | the message body                                |
//! | [`Application`]  | the application                                 |
//! | `Option<T>`      | `T`, or `None` when `T` cannot be extracted     |
//!
//! A failed extraction makes the handler fail with an [`ExtractError`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use courier_core::{Environ, Jid, Params};

use crate::app::Application;
use crate::error::{ExtractError, ExtractResult};
use crate::request::Request;
use crate::scope::RequestScope;

/// A type that can be extracted from a [`RequestScope`].
pub trait FromContext: Sized {
    /// Attempts to extract this type from the given scope.
    fn from_context(scope: &RequestScope) -> ExtractResult<Self>;
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        Ok(T::from_context(scope).ok())
    }
}

impl FromContext for RequestScope {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        Ok(scope.clone())
    }
}

impl FromContext for Request {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        Ok(scope.request().clone())
    }
}

impl FromContext for Environ {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        Ok(scope.request().environ().clone())
    }
}

impl FromContext for Application {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        Ok(scope.app().clone())
    }
}

impl FromContext for Params {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        if scope.request().rule().is_none() {
            return Err(ExtractError::Unrouted);
        }
        Ok(scope.params().clone())
    }
}

impl FromContext for Jid {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        scope.request().jid().cloned().ok_or(ExtractError::MissingSender)
    }
}

/// Route parameters deserialized into `T`.
///
/// ```rust,ignore
/// #[derive(Deserialize)]
/// struct Ping {
///     user: String,
///     n: u32,
/// }
///
/// async fn ping(Args(args): Args<Ping>) -> String {
///     format!("pong {} x{}", args.user, args.n)
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Args<T>(pub T);

impl<T> std::ops::Deref for Args<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: DeserializeOwned> FromContext for Args<T> {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        let params = Params::from_context(scope)?;
        serde_json::from_value(Value::Object(params))
            .map(Args)
            .map_err(|err| ExtractError::InvalidParams(err.to_string()))
    }
}

/// The message body. Fails for events without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body(pub String);

impl FromContext for Body {
    fn from_context(scope: &RequestScope) -> ExtractResult<Self> {
        scope
            .request()
            .body()
            .map(|body| Body(body.to_owned()))
            .ok_or_else(|| ExtractError::MissingParam("body".to_owned()))
    }
}
