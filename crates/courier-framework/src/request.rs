//! The request wrapper.

use std::sync::Arc;
use std::time::SystemTime;

use courier_core::{Environ, EventKind, Jid, NotFound, Params, Rule};

/// One inbound event together with its routing result.
#[derive(Debug, Clone)]
pub struct Request {
    environ: Environ,
    rule: Option<Arc<Rule>>,
    view_args: Params,
    routing_error: Option<NotFound>,
}

impl Request {
    /// Wraps an environ. Routing results are filled in by the request
    /// context.
    pub fn new(environ: Environ) -> Self {
        Self {
            environ,
            rule: None,
            view_args: Params::new(),
            routing_error: None,
        }
    }

    pub(crate) fn set_match(&mut self, result: Result<(Arc<Rule>, Params), NotFound>) {
        match result {
            Ok((rule, params)) => {
                self.rule = Some(rule);
                self.view_args = params;
                self.routing_error = None;
            }
            Err(err) => {
                self.rule = None;
                self.view_args = Params::new();
                self.routing_error = Some(err);
            }
        }
    }

    /// The underlying environ.
    pub fn environ(&self) -> &Environ {
        &self.environ
    }

    /// The application's own JID.
    pub fn app_jid(&self) -> Option<&Jid> {
        self.environ.app_jid.as_ref()
    }

    /// Stanza ID.
    pub fn id(&self) -> Option<&str> {
        self.environ.id.as_deref()
    }

    /// Message body, status message and the like.
    pub fn body(&self) -> Option<&str> {
        self.environ.body.as_deref()
    }

    /// Raw stanza XML.
    pub fn xml(&self) -> Option<&str> {
        self.environ.xml.as_deref()
    }

    /// Stanza kind.
    pub fn event(&self) -> Option<EventKind> {
        self.environ.event
    }

    /// Sender JID.
    pub fn jid(&self) -> Option<&Jid> {
        self.environ.jid.as_ref()
    }

    /// Stanza type: `chat`, `groupchat`, `available`, ...
    pub fn stanza_type(&self) -> Option<&str> {
        self.environ.stanza_type.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.environ.status.as_deref()
    }

    pub fn priority(&self) -> Option<i32> {
        self.environ.priority
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.environ.timestamp
    }

    pub fn delay(&self) -> Option<&str> {
        self.environ.delay.as_deref()
    }

    /// Sender name: the room nick in group chats, the node otherwise.
    pub fn username(&self) -> Option<&str> {
        let jid = self.jid()?;
        if self.stanza_type() == Some("groupchat") {
            jid.resource()
        } else {
            jid.user()
        }
    }

    /// The matched rule, if routing succeeded.
    pub fn rule(&self) -> Option<&Arc<Rule>> {
        self.rule.as_ref()
    }

    /// Endpoint of the matched rule.
    pub fn endpoint(&self) -> Option<&str> {
        self.rule.as_ref().map(|rule| rule.endpoint_name())
    }

    /// Handler group of the matched endpoint: everything before its last `.`.
    pub fn group(&self) -> Option<&str> {
        self.endpoint()?.rsplit_once('.').map(|(group, _)| group)
    }

    /// Parameters captured by the matched rule.
    pub fn view_args(&self) -> &Params {
        &self.view_args
    }

    /// The routing failure, if no rule matched.
    pub fn routing_error(&self) -> Option<NotFound> {
        self.routing_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Query, RouteMap};

    fn request(stanza_type: &str, body: &str) -> Request {
        let from: Jid = "room@conference.example.com/alice".parse().unwrap();
        Request::new(Environ::message(from, body).with_stanza_type(stanza_type))
    }

    #[test]
    fn test_username() {
        assert_eq!(request("groupchat", "hi").username(), Some("alice"));
        assert_eq!(request("chat", "hi").username(), Some("room"));
    }

    #[test]
    fn test_endpoint_and_group() {
        let map = RouteMap::new();
        map.add(Rule::new("ping").endpoint("admin.tools.ping")).unwrap();
        let mut req = request("chat", "ping");
        req.set_match(map.bind(Query::message("ping")).match_rule());
        assert_eq!(req.endpoint(), Some("admin.tools.ping"));
        assert_eq!(req.group(), Some("admin.tools"));
        assert!(req.routing_error().is_none());

        req.set_match(Err(NotFound));
        assert_eq!(req.endpoint(), None);
        assert_eq!(req.routing_error(), Some(NotFound));
    }
}
