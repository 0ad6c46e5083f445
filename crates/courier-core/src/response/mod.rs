//! The pull-based response stream.
//!
//! A [`Response`] wraps whatever a handler returned into a sequence of
//! [`Command`]s that the hosting server pulls one at a time. After each
//! command is executed the server feeds the result back with
//! [`Response::send`]; a generator-backed response receives it as the value
//! of its pending [`Co::yield_`].
//!
//! Responses can be chained: once the current source is drained, pulling
//! continues with the next queued one. A drained response stays drained.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::response::{Command, Response};
//! use serde_json::json;
//!
//! let mut response = Response::generator(|co| async move {
//!     let ack = co.yield_(("presence", json!({"type": "away"}))).await?;
//!     if ack.as_bool() == Some(true) {
//!         co.yield_("went away").await?;
//!     }
//!     Ok(())
//! });
//!
//! while let Some(command) = response.send(ack).await? {
//!     ack = transport.execute(&command).await?;
//! }
//! ```

mod command;
mod generator;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use serde_json::Value;

pub use command::{Command, IQ, MESSAGE, PRESENCE};
pub use generator::Co;

use generator::{Generator, Resume};

/// Value fed back to a response after a command was executed.
pub type Ack = Value;

enum Source {
    Items(std::vec::IntoIter<Command>),
    Generator(Generator),
}

impl Source {
    async fn resume(&mut self, ack: Ack) -> anyhow::Result<Option<Command>> {
        match self {
            Source::Items(items) => Ok(items.next()),
            Source::Generator(generator) => generator.resume(Resume::Ack(ack)).await,
        }
    }

    fn close(&mut self) {
        match self {
            Source::Items(items) => *items = Vec::new().into_iter(),
            Source::Generator(generator) => generator.finish(),
        }
    }

    fn is_drained(&self) -> bool {
        match self {
            Source::Items(items) => items.as_slice().is_empty(),
            Source::Generator(generator) => generator.is_finished(),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Items(items) => f.debug_tuple("Items").field(&items.as_slice()).finish(),
            Source::Generator(generator) => f
                .debug_struct("Generator")
                .field("started", &generator.is_started())
                .field("finished", &generator.is_finished())
                .finish(),
        }
    }
}

/// A resumable sequence of outbound commands.
#[derive(Debug)]
pub struct Response {
    current: Source,
    queue: VecDeque<Source>,
}

impl Response {
    /// An empty response.
    pub fn empty() -> Self {
        Self::from_commands(Vec::<Command>::new())
    }

    /// A response over a fixed list of commands.
    pub fn from_commands<I, C>(commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Command>,
    {
        let commands: Vec<Command> = commands.into_iter().map(Into::into).collect();
        Self {
            current: Source::Items(commands.into_iter()),
            queue: VecDeque::new(),
        }
    }

    /// A response driven by a suspending generator body.
    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Co) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            current: Source::Generator(Generator::new(body)),
            queue: VecDeque::new(),
        }
    }

    /// Appends `other` to be pulled after everything already queued.
    ///
    /// Chained responses are flattened, so acknowledgements still reach a
    /// chained generator.
    pub fn push(&mut self, other: impl IntoResponse) {
        let other = other.into_response();
        self.queue.push_back(other.current);
        self.queue.extend(other.queue);
    }

    /// Builder form of [`push`](Self::push).
    pub fn chain(mut self, other: impl IntoResponse) -> Self {
        self.push(other);
        self
    }

    /// Pulls the next command without an acknowledgement.
    pub async fn next(&mut self) -> anyhow::Result<Option<Command>> {
        self.send(Value::Null).await
    }

    /// Resumes the stream with `ack` and returns the next command.
    ///
    /// `Ok(None)` means the stream is drained; it stays drained. An error
    /// raised by a generator ends that generator; the next call continues
    /// with the queued sources.
    pub async fn send(&mut self, ack: Ack) -> anyhow::Result<Option<Command>> {
        let mut ack = ack;
        loop {
            if let Some(command) = self.current.resume(ack).await? {
                return Ok(Some(command));
            }
            match self.queue.pop_front() {
                Some(next) => {
                    self.current = next;
                    ack = Value::Null;
                }
                None => return Ok(None),
            }
        }
    }

    /// Injects `error` into the current source.
    ///
    /// A suspended generator receives it from its pending yield; whatever it
    /// yields next is returned, and `Ok(None)` means it finished. A fixed
    /// list, an unstarted generator or a finished one cannot handle it: the
    /// source ends and the error is returned.
    pub async fn throw(&mut self, error: anyhow::Error) -> anyhow::Result<Option<Command>> {
        match &mut self.current {
            Source::Generator(generator)
                if generator.is_started() && !generator.is_finished() =>
            {
                generator.resume(Resume::Throw(error)).await
            }
            source => {
                source.close();
                Err(error)
            }
        }
    }

    /// Ends the stream, dropping queued sources.
    pub fn close(&mut self) {
        self.current.close();
        self.queue.clear();
    }

    /// `true` when nothing is left to pull.
    pub fn is_drained(&self) -> bool {
        self.current.is_drained() && self.queue.iter().all(Source::is_drained)
    }

    /// Drains the stream, acknowledging every command with `null`.
    pub async fn collect(mut self) -> anyhow::Result<Vec<Command>> {
        let mut out = Vec::new();
        while let Some(command) = self.next().await? {
            out.push(command);
        }
        Ok(out)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Types a handler may return.
pub trait IntoResponse {
    /// Wraps `self` into a response stream.
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        Response::empty()
    }
}

impl IntoResponse for &str {
    fn into_response(self) -> Response {
        Response::from_commands([self])
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::from_commands([self])
    }
}

impl IntoResponse for Command {
    fn into_response(self) -> Response {
        Response::from_commands([self])
    }
}

/// A `(name, payload)` pair is one command, never two.
impl<N: Into<String>> IntoResponse for (N, Value) {
    fn into_response(self) -> Response {
        Response::from_commands([Command::from(self)])
    }
}

impl<T: Into<Command>> IntoResponse for Vec<T> {
    fn into_response(self) -> Response {
        Response::from_commands(self)
    }
}

impl<T: IntoResponse> IntoResponse for Option<T> {
    fn into_response(self) -> Response {
        self.map_or_else(Response::empty, IntoResponse::into_response)
    }
}

macro_rules! impl_into_response_display {
    ($($ty:ty),*) => {
        $(
            impl IntoResponse for $ty {
                fn into_response(self) -> Response {
                    Response::from_commands([self.to_string()])
                }
            }
        )*
    };
}

impl_into_response_display!(bool, i32, i64, u32, u64, usize, f64);

/// JSON values: `null` is empty, strings and scalars are messages, an object
/// is a message payload and an array holds one command per element.
impl IntoResponse for Value {
    fn into_response(self) -> Response {
        match self {
            Value::Null => Response::empty(),
            Value::String(body) => Response::from_commands([body]),
            Value::Object(payload) => Response::from_commands([Command::new(MESSAGE, payload)]),
            Value::Array(items) => Response::from_commands(items.into_iter().map(json_command)),
            scalar => Response::from_commands([scalar.to_string()]),
        }
    }
}

fn json_command(item: Value) -> Command {
    match item {
        Value::String(body) => Command::message(body),
        Value::Array(pair) if pair.len() == 2 && pair[0].is_string() => {
            let mut pair = pair.into_iter();
            let name = pair.next().and_then(|n| n.as_str().map(str::to_owned));
            let payload = pair.next().unwrap_or(Value::Null);
            Command::new(name.unwrap_or_else(|| MESSAGE.to_owned()), payload)
        }
        Value::Object(payload) => Command::new(MESSAGE, payload),
        other => Command::message(other.to_string()),
    }
}

/// Handler return values that may fail.
pub trait IntoResponseResult {
    /// Converts `self` into a response or an application error.
    fn into_response_result(self) -> anyhow::Result<Response>;
}

impl<T: IntoResponse> IntoResponseResult for T {
    fn into_response_result(self) -> anyhow::Result<Response> {
        Ok(self.into_response())
    }
}

impl<T, E> IntoResponseResult for Result<T, E>
where
    T: IntoResponse,
    E: Into<anyhow::Error>,
{
    fn into_response_result(self) -> anyhow::Result<Response> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}
