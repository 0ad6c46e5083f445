//! Handler system for the Courier framework.
//!
//! Handlers are plain async functions. Every argument is pulled out of the
//! [`RequestScope`] through [`FromContext`], and the return value is turned
//! into a [`Response`] through [`IntoResponseResult`]. The [`Handler`] trait
//! is implemented for functions with 0 to 16 arguments, the way Axum does it.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Args, Jid, RequestScope};
//!
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! #[derive(serde::Deserialize)]
//! struct Weather {
//!     city: String,
//! }
//!
//! async fn weather(Args(args): Args<Weather>, sender: Jid) -> String {
//!     format!("{sender}: sunny in {}", args.city)
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use courier_core::{IntoResponseResult, Response};

use crate::extract::FromContext;
use crate::scope::RequestScope;

// ============================================================================
// Handler Trait
// ============================================================================

/// An endpoint function.
///
/// Implemented for async functions whose arguments implement
/// [`FromContext`] and whose output implements [`IntoResponseResult`]. A
/// failed extraction is reported as the handler's error.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Runs the handler for the request in `scope`.
    async fn call(self, scope: RequestScope) -> anyhow::Result<Response>;
}

// ============================================================================
// BoxedHandler
// ============================================================================

/// A type-erased handler stored in the application's view table.
pub type BoxedHandler =
    Arc<dyn Fn(RequestScope) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync>;

/// Erases the argument tuple of a handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(move |scope| f.clone().call(scope))
}

/// Derives an endpoint name from a handler's type: the last path segment of
/// a named function. Closures have no usable name.
pub(crate) fn endpoint_name_of<F>() -> Option<String> {
    let mut depth = 0usize;
    let path: String = std::any::type_name::<F>()
        .chars()
        .filter(|c| match c {
            '<' => {
                depth += 1;
                false
            }
            '>' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0,
        })
        .collect();
    let name = path.rsplit("::").next()?;
    if name.is_empty() || name.starts_with('{') {
        return None;
    }
    Some(name.to_owned())
}

// ============================================================================
// Handler implementations for functions
// ============================================================================

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoResponseResult + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, scope: RequestScope) -> anyhow::Result<Response> {
                $(
                    let $ty = $ty::from_context(&scope)?;
                )*

                (self)($($ty,)*).await.into_response_result()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15
);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15, T16
);

#[cfg(test)]
mod tests {
    use super::*;

    async fn ping() -> &'static str {
        "pong"
    }

    #[test]
    fn test_endpoint_name_of_function() {
        fn name_of<F>(_: &F) -> Option<String> {
            endpoint_name_of::<F>()
        }
        assert_eq!(name_of(&ping).as_deref(), Some("ping"));
        let closure = || async { "pong" };
        assert_eq!(name_of(&closure), None);
    }
}
