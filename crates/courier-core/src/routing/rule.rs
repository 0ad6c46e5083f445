//! A single routable pattern.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use regex::Regex;
use tracing::trace;

use super::converter::{Converter, ConverterArgs, ConverterRegistry};
use super::parser::{Token, parse_converter_args, parse_rule};
use super::{Params, Query};
use crate::environ::EventKind;
use crate::error::{RoutingError, RoutingResult};

/// One segment of a bound rule, in pattern order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Placeholder(String),
}

/// State derived when a rule is bound to a route map.
#[derive(Debug)]
struct Compiled {
    map_id: u64,
    trace: Vec<Segment>,
    converters: HashMap<String, Box<dyn Converter>>,
    weights: Vec<u32>,
    regex: Regex,
    sender: Option<Regex>,
}

/// A pattern with optional filters, routed to an endpoint.
///
/// Rules are built unbound and compiled when added to a
/// [`RouteMap`](super::RouteMap); from then on they are immutable.
///
/// # Example
///
/// ```rust,ignore
/// use courier_core::routing::Rule;
///
/// let rule = Rule::new("ping <user> <int:n> times")
///     .endpoint("ping_user_multiple_times")
///     .stanza_type("chat");
/// ```
#[derive(Debug)]
pub struct Rule {
    pattern: String,
    endpoint: String,
    defaults: Option<Params>,
    event: Option<EventKind>,
    from_sender: Option<String>,
    stanza_type: Option<String>,
    strict: bool,
    arguments: BTreeSet<String>,
    greediness: u32,
    compiled: Option<Compiled>,
}

impl Rule {
    /// Creates an unbound, strict rule for `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            endpoint: String::new(),
            defaults: None,
            event: None,
            from_sender: None,
            stanza_type: None,
            strict: true,
            arguments: BTreeSet::new(),
            greediness: 0,
            compiled: None,
        }
    }

    /// Sets the endpoint this rule routes to.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Declares default parameter values, merged into every match.
    pub fn defaults(mut self, defaults: Params) -> Self {
        self.arguments.extend(defaults.keys().cloned());
        self.defaults = Some(defaults);
        self
    }

    /// Only match events of this stanza class.
    pub fn event_type(mut self, event: EventKind) -> Self {
        self.event = Some(event);
        self
    }

    /// Only match senders whose JID matches `pattern` (anchored at the start).
    pub fn from_sender(mut self, pattern: impl Into<String>) -> Self {
        self.from_sender = Some(pattern.into());
        self
    }

    /// Only match stanzas of this type (`chat`, `groupchat`, ...).
    pub fn stanza_type(mut self, stanza_type: impl Into<String>) -> Self {
        self.stanza_type = Some(stanza_type.into());
        self
    }

    /// Whether the whole message must be consumed (default `true`).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Replaces the endpoint of an unregistered rule.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The endpoint name.
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint
    }

    /// The declared defaults, if any.
    pub fn default_values(&self) -> Option<&Params> {
        self.defaults.as_ref()
    }

    /// Default keys plus placeholder names.
    pub fn arguments(&self) -> &BTreeSet<String> {
        &self.arguments
    }

    /// Per-segment match weights; empty until bound.
    pub fn weights(&self) -> &[u32] {
        self.compiled.as_ref().map_or(&[], |c| &c.weights)
    }

    /// Number of greedy converters in the pattern.
    pub fn greediness(&self) -> u32 {
        self.greediness
    }

    /// Whether the rule must consume the whole message.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether the rule is bound to a route map.
    pub fn is_bound(&self) -> bool {
        self.compiled.is_some()
    }

    /// The id of the map this rule is bound to.
    pub fn map_id(&self) -> Option<u64> {
        self.compiled.as_ref().map(|c| c.map_id)
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Compiles the rule for the map identified by `map_id`.
    ///
    /// Fails with [`RoutingError::AlreadyBound`] when the rule is bound and
    /// `rebind` is not set.
    pub fn bind(
        &mut self,
        map_id: u64,
        converters: &ConverterRegistry,
        rebind: bool,
    ) -> RoutingResult<()> {
        if self.compiled.is_some() && !rebind {
            return Err(RoutingError::AlreadyBound {
                rule: self.to_string(),
            });
        }

        let mut trace = Vec::new();
        let mut compiled_converters = HashMap::new();
        let mut weights = Vec::new();
        let mut regex_parts = Vec::new();
        let mut arguments: BTreeSet<String> = self
            .defaults
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        let mut greediness = 0;

        for token in parse_rule(&self.pattern)? {
            match token {
                Token::Static(text) => {
                    regex_parts.push(regex::escape(&text));
                    weights.push(text.chars().count() as u32);
                    trace.push(Segment::Static(text));
                }
                Token::Placeholder {
                    converter,
                    args,
                    variable,
                } => {
                    let args = args
                        .as_deref()
                        .map(parse_converter_args)
                        .unwrap_or_else(ConverterArgs::default);
                    let conv = converters.build(&converter, &args)?;
                    regex_parts.push(format!("(?P<{variable}>{})", conv.regex()));
                    weights.push(conv.weight());
                    if conv.is_greedy() {
                        greediness += 1;
                    }
                    arguments.insert(variable.clone());
                    compiled_converters.insert(variable.clone(), conv);
                    trace.push(Segment::Placeholder(variable));
                }
            }
        }

        let body = regex_parts.concat();
        let source = if self.strict {
            format!("^{body}$")
        } else {
            body
        };
        let regex = Regex::new(&source).map_err(|e| RoutingError::InvalidPattern {
            rule: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        let sender = self
            .from_sender
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    RoutingError::InvalidSenderPattern {
                        pattern: pattern.to_owned(),
                        reason: e.to_string(),
                    }
                })
            })
            .transpose()?;

        self.arguments = arguments;
        self.greediness = greediness;
        self.compiled = Some(Compiled {
            map_id,
            trace,
            converters: compiled_converters,
            weights,
            regex,
            sender,
        });
        trace!(rule = %self, "rule bound");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Matching and building
    // ------------------------------------------------------------------------

    /// Matches the rule against an event.
    ///
    /// Filters only apply when both the rule and the query carry a value.
    /// A converter rejecting a capture is a plain non-match.
    pub fn matches(&self, query: &Query) -> Option<Params> {
        let compiled = self.compiled.as_ref()?;

        if let (Some(expected), Some(actual)) = (self.event, query.event) {
            if expected != actual {
                return None;
            }
        }
        if let (Some(expected), Some(actual)) = (&self.stanza_type, &query.stanza_type) {
            if expected != actual {
                return None;
            }
        }
        if let (Some(sender), Some(actual)) = (&compiled.sender, &query.sender) {
            if !sender.is_match(actual) {
                return None;
            }
        }

        let caps = compiled.regex.captures(&query.message)?;
        let mut result = Params::new();
        for segment in &compiled.trace {
            let Segment::Placeholder(name) = segment else {
                continue;
            };
            let text = caps.name(name)?.as_str();
            let value = compiled.converters.get(name)?.to_value(text).ok()?;
            result.insert(name.clone(), value);
        }
        if let Some(defaults) = &self.defaults {
            for (key, value) in defaults {
                result.insert(key.clone(), value.clone());
            }
        }
        Some(result)
    }

    /// Builds message text from `values`, or `None` if a converter rejects
    /// one of them.
    pub fn build(&self, values: &Params) -> Option<String> {
        let compiled = self.compiled.as_ref()?;
        let mut out = String::new();
        for segment in &compiled.trace {
            match segment {
                Segment::Static(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = values
                        .get(name)
                        .or_else(|| self.defaults.as_ref().and_then(|d| d.get(name)))?;
                    let text = compiled.converters.get(name)?.to_text(value).ok()?;
                    out.push_str(&text);
                }
            }
        }
        Some(out)
    }

    /// Checks whether `values` carries enough data to build this rule.
    pub fn suitable_for(&self, values: &Params) -> bool {
        let defaults = self.defaults.as_ref();
        let required = self
            .arguments
            .iter()
            .filter(|key| !defaults.is_some_and(|d| d.contains_key(*key)));
        for key in required {
            if !values.contains_key(key) {
                return false;
            }
        }

        if self.arguments.iter().all(|key| values.contains_key(key)) {
            if let Some(defaults) = defaults {
                for (key, value) in defaults {
                    if values.get(key) != Some(value) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Match-order comparison: `Less` means `self` is tried before `other`.
    ///
    /// Not a total order. Equal rules compare `Greater` in both directions.
    pub fn match_compare(&self, other: &Rule) -> Ordering {
        let (own, theirs) = (self.weights(), other.weights());
        for (sw, ow) in own.iter().zip(theirs) {
            match sw.cmp(ow) {
                Ordering::Greater => return Ordering::Less,
                Ordering::Less => return Ordering::Greater,
                Ordering::Equal => {}
            }
        }
        match own.len().cmp(&theirs.len()) {
            Ordering::Greater => return Ordering::Less,
            Ordering::Less => return Ordering::Greater,
            Ordering::Equal => {}
        }

        if other.arguments.is_empty() && !self.arguments.is_empty() {
            Ordering::Greater
        } else if !other.arguments.is_empty() && self.arguments.is_empty() {
            Ordering::Less
        } else if other.defaults.is_none() && self.defaults.is_some() {
            Ordering::Greater
        } else if other.defaults.is_some() && self.defaults.is_none() {
            Ordering::Less
        } else if self.greediness > other.greediness {
            Ordering::Less
        } else if self.greediness < other.greediness {
            Ordering::Greater
        } else if self.arguments.len() > other.arguments.len() {
            Ordering::Greater
        } else if self.arguments.len() < other.arguments.len() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(compiled) = &self.compiled else {
            return f.write_str("<Rule (unbound)>");
        };
        f.write_str("<Rule ")?;
        for segment in &compiled.trace {
            match segment {
                Segment::Static(text) => f.write_str(text)?,
                Segment::Placeholder(name) => write!(f, "<{name}>")?,
            }
        }
        write!(f, " -> {}>", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bound(rule: Rule) -> Rule {
        let mut rule = rule;
        rule.bind(1, &ConverterRegistry::new(), false).unwrap();
        rule
    }

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_display() {
        assert_eq!(Rule::new("ping").to_string(), "<Rule (unbound)>");
        let rule = bound(Rule::new("ping <user> <int:n> times").endpoint("ping"));
        assert_eq!(rule.to_string(), "<Rule ping <user> <n> times -> ping>");
    }

    #[test]
    fn test_bind_twice_requires_rebind() {
        let mut rule = bound(Rule::new("ping").endpoint("ping"));
        let err = rule.bind(2, &ConverterRegistry::new(), false).unwrap_err();
        assert!(matches!(err, RoutingError::AlreadyBound { .. }));
        rule.bind(2, &ConverterRegistry::new(), true).unwrap();
        assert_eq!(rule.map_id(), Some(2));
    }

    #[test]
    fn test_weights_and_arguments() {
        let rule = bound(
            Rule::new("ping <user> <int:n> times").defaults(params(json!({"loud": true}))),
        );
        assert_eq!(rule.weights(), &[5, 100, 1, 100, 6]);
        let args: Vec<&str> = rule.arguments().iter().map(String::as_str).collect();
        assert_eq!(args, vec!["loud", "n", "user"]);
    }

    #[test]
    fn test_round_trip() {
        let rule = bound(Rule::new("ping <user> <int:n> times").endpoint("ping"));
        let values = params(json!({"user": "k_bx", "n": 5}));
        let text = rule.build(&values).unwrap();
        assert_eq!(text, "ping k_bx 5 times");
        assert_eq!(rule.matches(&Query::message(&text)), Some(values));
    }

    #[test]
    fn test_bad_conversion_is_no_match() {
        let rule = bound(Rule::new("ping <user> <int(max=10):n> times"));
        assert_eq!(rule.matches(&Query::message("ping abc times")), None);
        assert_eq!(rule.matches(&Query::message("ping k_bx 11 times")), None);
        assert!(rule.matches(&Query::message("ping k_bx 10 times")).is_some());
    }

    #[test]
    fn test_build_rejects_bad_values() {
        let rule = bound(Rule::new("ping <int:n> times"));
        assert_eq!(rule.build(&params(json!({"n": "many"}))), None);
        assert_eq!(rule.build(&Params::new()), None);
    }

    #[test]
    fn test_defaults_merge() {
        let rule = bound(Rule::new("ping").defaults(params(json!({"user": "k_bx"}))));
        assert_eq!(
            rule.matches(&Query::message("ping")),
            Some(params(json!({"user": "k_bx"})))
        );
    }

    #[test]
    fn test_suitable_for() {
        let any = bound(Rule::new(r#"ping <any(u"k_bx", u"kb", u"kost-bebix"):user>"#));
        assert!(any.suitable_for(&params(json!({"user": "kb"}))));
        assert!(!any.suitable_for(&Params::new()));

        let with_defaults = bound(
            Rule::new("ping some <chicken> and <rabbit>")
                .defaults(params(json!({"chicken": "Chicken John"}))),
        );
        assert!(!with_defaults.suitable_for(&Params::new()));
        assert!(with_defaults.suitable_for(&params(json!({"rabbit": "Rabbit Jack"}))));
        assert!(with_defaults.suitable_for(&params(
            json!({"rabbit": "Rabbit Jack", "chicken": "Chicken John"})
        )));
        assert!(!with_defaults.suitable_for(&params(
            json!({"rabbit": "Rabbit Jack", "chicken": "Chicken Joe"})
        )));
    }

    #[test]
    fn test_filters_need_both_sides() {
        let rule = bound(
            Rule::new("ping")
                .event_type(EventKind::Message)
                .stanza_type("chat")
                .from_sender(r".*@xmpp\.ru"),
        );
        assert!(rule.matches(&Query::message("ping")).is_some());
        assert!(
            rule.matches(&Query::message("ping").event(EventKind::Presence))
                .is_none()
        );
        assert!(rule.matches(&Query::message("ping").stanza_type("groupchat")).is_none());
        assert!(rule.matches(&Query::message("ping").sender("foo@xmpp.ru")).is_some());
        assert!(rule.matches(&Query::message("ping").sender("foo@bar")).is_none());
    }

    #[test]
    fn test_sender_filter_anchors_at_start_only() {
        let rule = bound(Rule::new("pong").from_sender("foo@bar"));
        assert!(rule.matches(&Query::message("pong").sender("foo@bar.ru")).is_some());
        assert!(rule.matches(&Query::message("pong").sender("_foo@bar")).is_none());
    }

    #[test]
    fn test_invalid_sender_pattern() {
        let mut rule = Rule::new("ping").from_sender("(unclosed");
        let err = rule.bind(1, &ConverterRegistry::new(), false).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidSenderPattern { .. }));
    }

    #[test]
    fn test_non_strict_allows_trailing_text() {
        let strict = bound(Rule::new("pong <host>"));
        let loose = bound(Rule::new("pong <host>").strict(false));
        assert_eq!(strict.matches(&Query::message("pong foo tail")), None);
        assert_eq!(
            loose.matches(&Query::message("pong foo tail")),
            Some(params(json!({"host": "foo"})))
        );
    }

    #[test]
    fn test_compare_prefers_heavier_prefix() {
        let ping = bound(Rule::new("ping"));
        let ping_me = bound(Rule::new("ping me"));
        assert_eq!(ping_me.match_compare(&ping), Ordering::Less);
        assert_eq!(ping.match_compare(&ping_me), Ordering::Greater);
    }

    #[test]
    fn test_compare_equal_rules_is_asymmetric() {
        let a = bound(Rule::new("ping"));
        let b = bound(Rule::new("ping"));
        assert_eq!(a.match_compare(&b), Ordering::Greater);
        assert_eq!(b.match_compare(&a), Ordering::Greater);
    }

    #[test]
    fn test_compare_tie_breakers() {
        let plain = bound(Rule::new("ping"));
        let with_defaults = bound(Rule::new("ping").defaults(params(json!({"user": "k_bx"}))));
        // Same weights: the rule without arguments is tried first.
        assert_eq!(plain.match_compare(&with_defaults), Ordering::Less);
        assert_eq!(with_defaults.match_compare(&plain), Ordering::Greater);

        let one = bound(Rule::new("x <a>"));
        let one_with_defaults =
            bound(Rule::new("x <a>").defaults(params(json!({"b": 1}))));
        assert_eq!(one.match_compare(&one_with_defaults), Ordering::Less);
    }
}
