//! End-to-end tests: stanzas in through a loopback transport, commands out.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use courier_core::{Ack, Environ, Jid, Response};
use courier_framework::{APOLOGY, AppConfig, Application, RequestScope};
use courier_runtime::capability::{DELAY, STD, VERSION};
use courier_runtime::{
    Capability, CapabilityError, LoopbackTransport, Server, ServerConfig, ServerError, Stanza,
};

fn alice() -> Jid {
    "alice@example.com/home".parse().unwrap()
}

fn bot() -> Jid {
    "bot@example.com/courier".parse().unwrap()
}

fn server_for(app: Application) -> (Server, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::new());
    let config = ServerConfig {
        jid: Some(bot().to_string()),
        ..Default::default()
    };
    let server = Server::new(app, transport.clone(), config).unwrap();
    server.start().unwrap();
    (server, transport)
}

fn bodies(transport: &LoopbackTransport) -> Vec<String> {
    transport
        .take_sent()
        .iter()
        .map(|sent| sent.body().unwrap_or_default().to_owned())
        .collect()
}

async fn ping() -> &'static str {
    "pong"
}

async fn where_am_i(environ: Environ) -> String {
    format!(
        "{} {}",
        environ.event.map(|e| e.to_string()).unwrap_or_default(),
        environ.delay.unwrap_or_else(|| "now".into())
    )
}

#[tokio::test]
async fn test_message_round_trip() {
    let app = Application::new("echo");
    app.route("ping", ping).unwrap();
    let (server, transport) = server_for(app);

    server.handle(Stanza::message(alice(), "ping")).await.unwrap();

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].name, "message");
    assert_eq!(sent[0].to, Some(alice()));
    assert_eq!(sent[0].body(), Some("pong"));
}

#[tokio::test]
async fn test_capabilities_registered_once_std_first() {
    let (server, _) = server_for(Application::new("caps"));
    let capabilities = server.capabilities();
    assert_eq!(capabilities[0], STD);
    assert!(capabilities.iter().any(|c| c == VERSION));
    assert!(capabilities.iter().any(|c| c == DELAY));

    server.register_capability(VERSION).unwrap();
    server.start().unwrap();
    assert_eq!(server.capabilities(), capabilities);

    assert_eq!(
        server.register_capability("XEP-0045"),
        Err(CapabilityError::NotFound("XEP-0045".into()))
    );
}

#[tokio::test]
async fn test_own_and_empty_stanzas_are_skipped() {
    let app = Application::new("quiet");
    app.route("ping", ping).unwrap();
    let (server, transport) = server_for(app);

    server.handle(Stanza::message(bot(), "ping")).await.unwrap();
    server.handle(Stanza::message(alice(), "")).await.unwrap();
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_environ_from_capabilities() {
    let app = Application::new("env");
    app.route("where", where_am_i).unwrap();
    let (server, transport) = server_for(app);

    server
        .handle(Stanza::message(alice(), "where").with_delay("2002-09-10T23:08:25Z"))
        .await
        .unwrap();
    server.handle(Stanza::message(alice(), "where")).await.unwrap();
    assert_eq!(
        bodies(&transport),
        vec!["message 2002-09-10T23:08:25Z", "message now"]
    );

    let environ = server.setup_environ(&Stanza::presence(alice()).with_show("away"));
    assert_eq!(environ.app_jid, Some(bot()));
    assert_eq!(environ.jid, Some(alice()));
    assert_eq!(environ.status.as_deref(), Some("away"));
    assert!(environ.timestamp.is_some());
}

#[tokio::test]
async fn test_acks_reach_the_generator() {
    async fn moody() -> Response {
        Response::generator(|co| async move {
            for status in ["chat", "away", "dnd"] {
                let ack: Ack = co.yield_(("presence", json!({"show": status}))).await?;
                if ack != Value::Bool(true) {
                    co.yield_(format!("stuck at {status}")).await?;
                    return Ok(());
                }
            }
            Ok(())
        })
    }

    let app = Application::new("moody");
    app.route("mood", moody).unwrap();
    let (server, transport) = server_for(app);
    transport.push_ack(true);
    transport.push_ack(false);

    server.handle(Stanza::message(alice(), "mood")).await.unwrap();

    let sent = transport.take_sent();
    let names: Vec<_> = sent.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["presence", "presence", "message"]);
    assert_eq!(sent[2].body(), Some("stuck at away"));
}

#[tokio::test]
async fn test_version_command() {
    async fn version() -> Response {
        Response::generator(|co| async move {
            let info = co.yield_(("version", json!({}))).await?;
            co.yield_(format!("running {}", info["name"].as_str().unwrap_or("?")))
                .await?;
            Ok(())
        })
    }

    let app = Application::new("version");
    app.route("version", version).unwrap();
    let (server, transport) = server_for(app);

    server.handle(Stanza::message(alice(), "version")).await.unwrap();
    assert_eq!(bodies(&transport), vec!["running Courier"]);
}

#[tokio::test]
async fn test_unknown_command_and_bad_payload() {
    async fn teleport() -> (&'static str, Value) {
        ("teleport", json!({"to": "mars"}))
    }

    async fn odd() -> (&'static str, Value) {
        ("message", json!(5))
    }

    let app = Application::new("broken");
    app.route("teleport", teleport).unwrap();
    app.route("odd", odd).unwrap();
    let (server, transport) = server_for(app);

    let err = server
        .handle(Stanza::message(alice(), "teleport"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServerError>(),
        Some(ServerError::UnknownCommand(name)) if name == "teleport"
    ));

    let err = server.handle(Stanza::message(alice(), "odd")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServerError>(),
        Some(ServerError::InvalidPayload { command, .. }) if command == "message"
    ));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_teardown_runs_after_commands_are_sent() {
    async fn chatty() -> Response {
        Response::generator(|co| async move {
            co.yield_("one").await?;
            co.yield_("two").await?;
            Ok(())
        })
    }

    async fn teleport() -> (&'static str, Value) {
        ("teleport", json!({}))
    }

    let app = Application::new("chatty");
    app.route("chatty", chatty).unwrap();
    app.route("teleport", teleport).unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let teardowns = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = teardowns.clone();
    let sent_so_far = transport.clone();
    app.teardown_request(move |exc| {
        seen.lock()
            .push((sent_so_far.sent().len(), exc.map(|err| err.to_string())));
        Ok(())
    });
    let config = ServerConfig {
        jid: Some(bot().to_string()),
        ..Default::default()
    };
    let server = Server::new(app, transport.clone(), config).unwrap();
    server.start().unwrap();

    server.handle(Stanza::message(alice(), "chatty")).await.unwrap();
    assert!(server.handle(Stanza::message(alice(), "teleport")).await.is_err());

    assert_eq!(
        *teardowns.lock(),
        vec![
            (2, None),
            (2, Some("unknown command 'teleport'".to_owned())),
        ]
    );
}

#[tokio::test]
async fn test_apology_is_sent_outside_debug_mode() {
    async fn fail() -> anyhow::Result<String> {
        Err(anyhow::anyhow!("boom"))
    }

    let app = Application::with_config(
        "apologetic",
        AppConfig {
            debug: false,
            ..Default::default()
        },
    );
    app.route("fail", fail).unwrap();
    let (server, transport) = server_for(app);

    server.handle(Stanza::message(alice(), "fail")).await.unwrap();
    assert_eq!(bodies(&transport), vec![APOLOGY]);
}

#[tokio::test]
async fn test_notifications_go_to_their_recipient() {
    async fn tell(scope: RequestScope) -> &'static str {
        scope.notify("bob@example.com".parse().unwrap(), "alice says hi");
        "sent"
    }

    let app = Application::new("relay");
    app.route("tell bob", tell).unwrap();
    let (server, transport) = server_for(app);

    server.handle(Stanza::message(alice(), "tell bob")).await.unwrap();

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, Some(alice()));
    assert_eq!(sent[0].body(), Some("sent"));
    assert_eq!(sent[1].to, Some("bob@example.com".parse().unwrap()));
    assert_eq!(sent[1].body(), Some("alice says hi"));
}

struct Muc;

#[async_trait::async_trait]
impl Capability for Muc {
    fn name(&self) -> &str {
        "XEP-0045"
    }

    fn commands(&self) -> &[&'static str] {
        &["join_room"]
    }

    async fn execute(
        &self,
        _command: &str,
        _environ: &Environ,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        Ok(json!({"joined": payload.get("room").cloned().unwrap_or(Value::Null)}))
    }
}

#[tokio::test]
async fn test_required_capabilities() {
    let app = Application::new("muc");
    app.require_capability("XEP-0045");

    let transport = Arc::new(LoopbackTransport::new());
    let server = Server::new(app.clone(), transport.clone(), ServerConfig::default()).unwrap();
    assert_eq!(
        server.start(),
        Err(CapabilityError::NotFound("XEP-0045".into()))
    );

    let transport = Arc::new(LoopbackTransport::new());
    transport.provide(Arc::new(Muc));
    let server = Server::new(app, transport, ServerConfig::default()).unwrap();
    assert!(server.start().is_ok());
    assert!(server.is_registered("XEP-0045"));
}

#[tokio::test]
async fn test_serve_until_transport_closes() {
    let app = Application::new("serve");
    app.route("ping", ping).unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let config = ServerConfig {
        jid: Some(bot().to_string()),
        password: Some("secret".into()),
        ..Default::default()
    };
    let server = Server::new(app, transport.clone(), config).unwrap();

    transport.inject(Stanza::message(alice(), "ping"));
    transport.inject(Stanza::message(alice(), "unknown words"));
    transport.inject(Stanza::message(alice(), "ping"));
    transport.close();

    server
        .serve_until(futures::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(bodies(&transport), vec!["pong", "pong"]);
    assert_eq!(transport.connected_as(), None);
}

#[tokio::test]
async fn test_serve_requires_a_jid() {
    let transport = Arc::new(LoopbackTransport::new());
    let server = Server::new(
        Application::new("anonymous"),
        transport,
        ServerConfig::default(),
    )
    .unwrap();
    let err = server.serve_until(async {}).await.unwrap_err();
    assert!(matches!(err, ServerError::MissingJid));
}

#[test]
fn test_invalid_configured_jid() {
    let config = ServerConfig {
        jid: Some("@example.com".into()),
        ..Default::default()
    };
    let result = Server::new(
        Application::new("bad"),
        Arc::new(LoopbackTransport::new()),
        config,
    );
    assert!(matches!(result, Err(ServerError::InvalidJid(_))));
}
