//! Transports: where stanzas come from and where commands go.
//!
//! A [`Transport`] is the server's only link to the network. It receives
//! stanzas one at a time and sends stanza commands on behalf of the `std`
//! capability. Two implementations ship with the runtime:
//!
//! - [`LoopbackTransport`]: an in-memory transport for tests and embedding.
//!   Stanzas are injected by hand, sent commands are recorded and answered
//!   with scripted acknowledgements.
//! - [`ConsoleTransport`]: reads message bodies from stdin and prints
//!   outbound commands to stdout.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info};

use courier_core::{Ack, Jid};

use crate::capability::Capability;
use crate::stanza::Stanza;

/// The network side of a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name, for logs.
    fn name(&self) -> &str;

    /// Stream protocol in use (`tls`, `ssl`), once connected.
    fn protocol(&self) -> Option<String> {
        None
    }

    /// Signs in as `jid`.
    async fn connect(&self, jid: &Jid, password: Option<&str>) -> anyhow::Result<()>;

    /// Waits for the next stanza. `Ok(None)` means the stream ended.
    async fn recv(&self) -> anyhow::Result<Option<Stanza>>;

    /// Sends a `message`, `presence` or `iq` stanza and returns the
    /// acknowledgement for the response that issued it.
    async fn send(
        &self,
        command: &str,
        to: Option<&Jid>,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack>;

    /// Extra capabilities this transport provides besides `std`.
    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        Vec::new()
    }

    /// Ends the session.
    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// =============================================================================
// LoopbackTransport
// =============================================================================

/// A command recorded by [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub name: String,
    pub to: Option<Jid>,
    pub payload: Map<String, Value>,
}

impl SentCommand {
    /// The `body` entry of the payload, if any.
    pub fn body(&self) -> Option<&str> {
        self.payload.get("body").and_then(Value::as_str)
    }
}

/// In-memory transport.
///
/// Every sent command is acknowledged with the next scripted ack, or with
/// `true` once the script is exhausted.
pub struct LoopbackTransport {
    inbox_tx: Mutex<Option<mpsc::UnboundedSender<Stanza>>>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Stanza>>,
    sent: Mutex<Vec<SentCommand>>,
    acks: Mutex<VecDeque<Ack>>,
    connected_as: Mutex<Option<Jid>>,
    capabilities: Mutex<Vec<Arc<dyn Capability>>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inbox_tx: Mutex::new(Some(tx)),
            inbox_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            acks: Mutex::new(VecDeque::new()),
            connected_as: Mutex::new(None),
            capabilities: Mutex::new(Vec::new()),
        }
    }

    /// Queues a stanza for [`recv`](Transport::recv). Ignored after
    /// [`close`](Self::close).
    pub fn inject(&self, stanza: Stanza) {
        if let Some(tx) = self.inbox_tx.lock().as_ref() {
            let _ = tx.send(stanza);
        }
    }

    /// Ends the inbound stream once the queued stanzas are drained.
    pub fn close(&self) {
        self.inbox_tx.lock().take();
    }

    /// Scripts the acknowledgement for the next unanswered command.
    pub fn push_ack(&self, ack: impl Into<Ack>) {
        self.acks.lock().push_back(ack.into());
    }

    /// Offers an extra capability to the server.
    pub fn provide(&self, capability: Arc<dyn Capability>) {
        self.capabilities.lock().push(capability);
    }

    /// Commands sent so far.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    /// Removes and returns the commands sent so far.
    pub fn take_sent(&self) -> Vec<SentCommand> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// The JID passed to [`connect`](Transport::connect).
    pub fn connected_as(&self) -> Option<Jid> {
        self.connected_as.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&self, jid: &Jid, _password: Option<&str>) -> anyhow::Result<()> {
        *self.connected_as.lock() = Some(jid.clone());
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<Stanza>> {
        Ok(self.inbox_rx.lock().await.recv().await)
    }

    async fn send(
        &self,
        command: &str,
        to: Option<&Jid>,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        self.sent.lock().push(SentCommand {
            name: command.to_owned(),
            to: to.cloned(),
            payload: payload.clone(),
        });
        Ok(self.acks.lock().pop_front().unwrap_or(Value::Bool(true)))
    }

    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        self.capabilities.lock().clone()
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.connected_as.lock().take();
        Ok(())
    }
}

// =============================================================================
// ConsoleTransport
// =============================================================================

/// A transport for trying an application from a terminal.
///
/// Each stdin line is a `chat` message from [`user`](Self::user); outbound
/// commands are printed to stdout.
pub struct ConsoleTransport {
    user: Jid,
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleTransport {
    /// Messages appear to come from `user`.
    pub fn new(user: Jid) -> Self {
        Self {
            user,
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// The simulated sender.
    pub fn user(&self) -> &Jid {
        &self.user
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&self, jid: &Jid, _password: Option<&str>) -> anyhow::Result<()> {
        info!(jid = %jid, user = %self.user, "Console session started");
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<Stanza>> {
        let line = self.lines.lock().await.next_line().await?;
        Ok(line.map(|body| {
            debug!(body = %body, "Console input");
            Stanza::message(self.user.clone(), body.trim_end())
        }))
    }

    async fn send(
        &self,
        command: &str,
        to: Option<&Jid>,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        let to = to.map_or_else(|| "-".to_owned(), Jid::to_string);
        let line = match payload.get("body").and_then(Value::as_str) {
            Some(body) if command == "message" => format!("[{to}] {body}\n"),
            _ => format!("[{to}] {command} {}\n", Value::Object(payload.clone())),
        };
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(Value::Bool(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_loopback_inbox_and_close() {
        let transport = LoopbackTransport::new();
        let alice: Jid = "alice@example.com".parse().unwrap();
        transport.inject(Stanza::message(alice.clone(), "one"));
        transport.close();
        transport.inject(Stanza::message(alice, "dropped"));

        let first = transport.recv().await.unwrap().unwrap();
        assert_eq!(first.body.as_deref(), Some("one"));
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loopback_records_and_acks() {
        let transport = LoopbackTransport::new();
        let bob: Jid = "bob@example.com".parse().unwrap();
        transport.push_ack(json!(false));

        let mut payload = Map::new();
        payload.insert("body".into(), json!("hi"));
        let first = transport.send("message", Some(&bob), &payload).await.unwrap();
        let second = transport.send("presence", None, &Map::new()).await.unwrap();
        assert_eq!(first, json!(false));
        assert_eq!(second, json!(true));

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body(), Some("hi"));
        assert_eq!(sent[0].to.as_ref(), Some(&bob));
        assert_eq!(sent[1].name, "presence");
        assert!(transport.sent().is_empty());
    }
}
