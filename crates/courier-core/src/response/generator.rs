//! Suspending command producers.
//!
//! A generator body is an async closure that receives a [`Co`] handle.
//! Each [`Co::yield_`] hands one command to whoever drives the response and
//! suspends until the driver resumes it with an acknowledgement, or with an
//! error injected through [`Response::throw`](super::Response::throw).

use std::future::{Future, poll_fn};
use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::command::Command;
use super::Ack;

pub(crate) enum Resume {
    Ack(Ack),
    Throw(anyhow::Error),
}

#[derive(Default)]
struct Slot {
    outgoing: Option<Command>,
    incoming: Option<Resume>,
}

/// Handle a generator body uses to hand out commands.
pub struct Co {
    slot: Arc<Mutex<Slot>>,
}

impl Co {
    /// Yields `command` and waits for the driver's acknowledgement.
    ///
    /// Returns the injected error when the driver throws into the
    /// generator instead.
    pub async fn yield_(&self, command: impl Into<Command>) -> anyhow::Result<Ack> {
        let mut command = Some(command.into());
        poll_fn(|_| {
            let mut slot = self.slot.lock();
            if let Some(command) = command.take() {
                slot.outgoing = Some(command);
                return Poll::Pending;
            }
            match slot.incoming.take() {
                Some(Resume::Ack(ack)) => Poll::Ready(Ok(ack)),
                Some(Resume::Throw(err)) => Poll::Ready(Err(err)),
                None => Poll::Pending,
            }
        })
        .await
    }
}

/// A started-or-not generator body plus its exchange slot.
pub(crate) struct Generator {
    future: Mutex<Option<BoxFuture<'static, anyhow::Result<()>>>>,
    slot: Arc<Mutex<Slot>>,
    started: bool,
}

impl Generator {
    pub(crate) fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Co) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let co = Co { slot: slot.clone() };
        Self {
            future: Mutex::new(Some(Box::pin(body(co)))),
            slot,
            started: false,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.future.lock().is_none()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn finish(&mut self) {
        self.future.lock().take();
    }

    /// Runs the body until its next yield or its end.
    ///
    /// The resume value is discarded on the first run, since no yield is
    /// waiting for it yet.
    pub(crate) async fn resume(&mut self, input: Resume) -> anyhow::Result<Option<Command>> {
        if self.is_finished() {
            return Ok(None);
        }
        if self.started {
            self.slot.lock().incoming = Some(input);
        }
        self.started = true;

        let slot = &self.slot;
        let future = &self.future;
        poll_fn(|cx| {
            let mut guard = future.lock();
            let Some(body) = guard.as_mut() else {
                return Poll::Ready(Ok(None));
            };
            match body.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    *guard = None;
                    Poll::Ready(result.map(|()| None))
                }
                Poll::Pending => match slot.lock().outgoing.take() {
                    Some(command) => Poll::Ready(Ok(Some(command))),
                    None => Poll::Pending,
                },
            }
        })
        .await
    }
}
