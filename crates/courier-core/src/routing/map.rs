//! Route maps and their per-event adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::converter::{Converter, ConverterArgs, ConverterRegistry};
use super::order::sort_rules;
use super::rule::Rule;
use super::{Params, Query};
use crate::environ::Environ;
use crate::error::{BuildError, NotFound, RoutingResult};

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct MapState {
    rules: Vec<Arc<Rule>>,
    by_endpoint: HashMap<String, Vec<Arc<Rule>>>,
    dirty: bool,
}

/// The ordered set of rules of an application.
///
/// Rules are kept in insertion order until the next lookup, when the map is
/// re-sorted into match order. Lookups take a read lock; adding a rule takes
/// a write lock.
#[derive(Debug)]
pub struct RouteMap {
    id: u64,
    converters: ConverterRegistry,
    state: RwLock<MapState>,
}

impl RouteMap {
    /// Creates an empty map with the built-in converters.
    pub fn new() -> Self {
        Self::with_converters(ConverterRegistry::new())
    }

    /// Creates an empty map with a custom converter registry.
    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self {
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            converters,
            state: RwLock::new(MapState::default()),
        }
    }

    /// Unique id of this map, recorded in every rule bound to it.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The converters available to rules of this map.
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Registers a converter. Only affects rules added afterwards.
    pub fn register_converter<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConverterArgs) -> RoutingResult<Box<dyn Converter>> + Send + Sync + 'static,
    {
        self.converters.register(name, factory);
    }

    /// Binds `rule` to this map and stores it.
    pub fn add(&self, mut rule: Rule) -> RoutingResult<Arc<Rule>> {
        rule.bind(self.id, &self.converters, false)?;
        let rule = Arc::new(rule);
        debug!(rule = %rule, map = self.id, "rule added");

        let mut state = self.state.write();
        state.rules.push(rule.clone());
        state
            .by_endpoint
            .entry(rule.endpoint_name().to_owned())
            .or_default()
            .push(rule.clone());
        state.dirty = true;
        Ok(rule)
    }

    /// Re-sorts the rules into match order if any were added since the last
    /// sort.
    pub fn update(&self) {
        if !self.state.read().dirty {
            return;
        }
        let mut state = self.state.write();
        if !state.dirty {
            return;
        }
        sort_rules(&mut state.rules);
        for rules in state.by_endpoint.values_mut() {
            sort_rules(rules);
        }
        state.dirty = false;
        trace!(map = self.id, rules = state.rules.len(), "route map sorted");
    }

    /// All rules in match order.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.update();
        self.state.read().rules.clone()
    }

    /// Rules routed to `endpoint`, in match order.
    pub fn rules_for(&self, endpoint: &str) -> Vec<Arc<Rule>> {
        self.update();
        self.state
            .read()
            .by_endpoint
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of rules in the map.
    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    /// Returns `true` if the map holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an adapter for one event.
    pub fn bind(&self, query: Query) -> MapAdapter<'_> {
        MapAdapter { map: self, query }
    }

    /// Creates an adapter from the routable facts of an environ.
    pub fn bind_to_environ(&self, environ: &Environ) -> MapAdapter<'_> {
        self.bind(Query::from_environ(environ))
    }
}

impl Default for RouteMap {
    fn default() -> Self {
        Self::new()
    }
}

/// A route map bound to one event.
#[derive(Debug)]
pub struct MapAdapter<'a> {
    map: &'a RouteMap,
    query: Query,
}

impl MapAdapter<'_> {
    /// The event facts this adapter matches against.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns the first rule in match order that matches, with its
    /// parameters.
    pub fn match_rule(&self) -> Result<(Arc<Rule>, Params), NotFound> {
        self.map.update();
        let state = self.map.state.read();
        for rule in &state.rules {
            if let Some(params) = rule.matches(&self.query) {
                trace!(rule = %rule, "rule matched");
                return Ok((rule.clone(), params));
            }
        }
        Err(NotFound)
    }

    /// Returns the endpoint of the first matching rule, with its parameters.
    pub fn match_endpoint(&self) -> Result<(String, Params), NotFound> {
        let (rule, params) = self.match_rule()?;
        Ok((rule.endpoint_name().to_owned(), params))
    }

    /// Builds message text for `endpoint`.
    ///
    /// Null values are ignored. The first rule of the endpoint that is
    /// suitable for the values and builds successfully wins.
    pub fn build(&self, endpoint: &str, values: &Params) -> Result<String, BuildError> {
        self.map.update();
        let values: Params = values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let state = self.map.state.read();
        let built = state.by_endpoint.get(endpoint).and_then(|rules| {
            rules
                .iter()
                .filter(|rule| rule.suitable_for(&values))
                .find_map(|rule| rule.build(&values))
        });
        built.ok_or_else(|| BuildError::new(endpoint, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environ::EventKind;
    use crate::jid::Jid;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn routed(map: &RouteMap, message: &str) -> Result<(String, Params), NotFound> {
        map.bind(Query::message(message)).match_endpoint()
    }

    #[test]
    fn test_basic_routing() {
        let map = RouteMap::new();
        map.add(Rule::new("ping").endpoint("ping")).unwrap();
        map.add(Rule::new("ping me").endpoint("ping_me")).unwrap();
        map.add(Rule::new("ping <user>").endpoint("ping_user")).unwrap();
        map.add(Rule::new("ping <user> <int:n> times").endpoint("ping_user_n"))
            .unwrap();

        assert_eq!(routed(&map, "ping").unwrap(), ("ping".into(), Params::new()));
        assert_eq!(routed(&map, "ping me").unwrap().0, "ping_me");
        assert_eq!(
            routed(&map, "ping k_bx").unwrap(),
            ("ping_user".into(), params(json!({"user": "k_bx"})))
        );
        assert_eq!(
            routed(&map, "ping k_bx 3 times").unwrap(),
            ("ping_user_n".into(), params(json!({"user": "k_bx", "n": 3})))
        );
        assert_eq!(routed(&map, "pong"), Err(NotFound));
    }

    #[test]
    fn test_build() {
        let map = RouteMap::new();
        map.add(Rule::new("ping <user>").endpoint("ping_user")).unwrap();
        map.add(Rule::new("ping <user> <int:n> times").endpoint("ping_user_n"))
            .unwrap();
        let adapter = map.bind(Query::default());

        assert_eq!(
            adapter.build("ping_user", &params(json!({"user": "k_bx"}))),
            Ok("ping k_bx".to_string())
        );
        assert_eq!(
            adapter.build("ping_user_n", &params(json!({"user": "k_bx", "n": 5}))),
            Ok("ping k_bx 5 times".to_string())
        );
        let err = adapter
            .build("ping_user_n", &params(json!({"user": "k_bx", "n": null})))
            .unwrap_err();
        assert_eq!(err.endpoint, "ping_user_n");
        assert_eq!(err.values, params(json!({"user": "k_bx"})));
        assert!(adapter.build("nope", &Params::new()).is_err());
    }

    #[test]
    fn test_build_skips_unsuitable_rules() {
        let map = RouteMap::new();
        map.add(
            Rule::new("ping some <chicken> and <rabbit>")
                .endpoint("farm")
                .defaults(params(json!({"chicken": "Chicken John"}))),
        )
        .unwrap();
        map.add(Rule::new("ping <chicken> <rabbit>").endpoint("farm")).unwrap();
        let adapter = map.bind(Query::default());

        assert_eq!(
            adapter.build("farm", &params(json!({"rabbit": "Jack"}))),
            Ok("ping some Chicken John and Jack".to_string())
        );
        assert_eq!(
            adapter.build("farm", &params(json!({"rabbit": "Jack", "chicken": "Joe"}))),
            Ok("ping Joe Jack".to_string())
        );
    }

    #[test]
    fn test_converter_rules() {
        let map = RouteMap::new();
        map.add(Rule::new(r#"ping <any(u"k_bx", u"kb"):user>"#).endpoint("any"))
            .unwrap();
        map.add(Rule::new("weather in <string(maxlength=10):city>").endpoint("weather"))
            .unwrap();
        map.add(Rule::new("pi is <float:pi>").endpoint("pi")).unwrap();

        assert_eq!(routed(&map, "ping kb").unwrap().0, "any");
        assert_eq!(routed(&map, "ping someone"), Err(NotFound));
        assert_eq!(
            routed(&map, "weather in New York").unwrap().1,
            params(json!({"city": "New York"}))
        );
        assert_eq!(routed(&map, "weather in Llanfairpwllgwyngyll"), Err(NotFound));
        assert_eq!(routed(&map, "pi is 3.14").unwrap().1, params(json!({"pi": 3.14})));
    }

    #[test]
    fn test_filters_from_environ() {
        let map = RouteMap::new();
        map.add(
            Rule::new("status")
                .endpoint("group_status")
                .stanza_type("groupchat"),
        )
        .unwrap();
        map.add(
            Rule::new("status")
                .endpoint("presence_status")
                .event_type(EventKind::Presence),
        )
        .unwrap();

        let from: Jid = "alice@example.com/home".parse().unwrap();
        let chat = Environ::message(from.clone(), "status").with_stanza_type("chat");
        let group = Environ::message(from.clone(), "status").with_stanza_type("groupchat");
        let mut presence = Environ::presence(from).with_stanza_type("available");
        presence.body = Some("status".into());

        assert_eq!(map.bind_to_environ(&chat).match_endpoint(), Err(NotFound));
        assert_eq!(
            map.bind_to_environ(&group).match_endpoint().unwrap().0,
            "group_status"
        );
        assert_eq!(
            map.bind_to_environ(&presence).match_endpoint().unwrap().0,
            "presence_status"
        );
    }

    #[test]
    fn test_add_bound_rule_fails() {
        let first = RouteMap::new();
        let second = RouteMap::new();
        assert_ne!(first.id(), second.id());

        let mut rule = Rule::new("ping").endpoint("ping");
        rule.bind(first.id(), first.converters(), false).unwrap();
        assert!(second.add(rule).is_err());
        assert!(second.is_empty());
    }

    #[test]
    fn test_unknown_converter() {
        let map = RouteMap::new();
        assert!(map.add(Rule::new("go <path:where>")).is_err());
    }

    #[test]
    fn test_custom_converter() {
        #[derive(Debug)]
        struct Upper;
        impl Converter for Upper {
            fn regex(&self) -> &str {
                "[A-Z]+"
            }
        }

        let mut map = RouteMap::new();
        map.register_converter("upper", |_| Ok(Box::new(Upper)));
        map.add(Rule::new("shout <upper:word>").endpoint("shout")).unwrap();
        assert!(routed(&map, "shout HEY").is_ok());
        assert_eq!(routed(&map, "shout hey"), Err(NotFound));
    }
}
