//! Rule pattern parsing.
//!
//! Patterns mix literal text with placeholders: `<name>`,
//! `<converter:name>` or `<converter(args):name>`. Converter arguments are
//! comma separated, positional or `key=value`, and may be integers,
//! floats, booleans, bare words or quoted strings (`"x"`, `'x'`, `u"x"`).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Number, Value};

use super::converter::ConverterArgs;
use crate::error::{RoutingError, RoutingResult};

static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<static>[^<]*)<(?:(?P<converter>[a-zA-Z_][a-zA-Z0-9_]*)(?:\((?P<args>.*?)\))?:)?(?P<variable>[a-zA-Z_][a-zA-Z0-9_]*)>",
    )
    .expect("rule grammar is a valid regex")
});

static ARGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:(?P<name>\w+)\s*=\s*)?(?P<value>True|False|\d+.\d+|\d+.|\d+|\w+|[urUR]?(?P<stringval>"[^"]*?"|'[^']*'))\s*,"#,
    )
    .expect("argument grammar is a valid regex")
});

/// One segment of a parsed rule pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text that must appear verbatim.
    Static(String),
    /// A typed placeholder.
    Placeholder {
        /// Converter name (`default` when omitted).
        converter: String,
        /// Raw argument text between the parentheses.
        args: Option<String>,
        /// Variable name the captured value is stored under.
        variable: String,
    },
}

/// Splits a rule pattern into literal and placeholder tokens.
pub fn parse_rule(rule: &str) -> RoutingResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut used = HashSet::new();
    let mut pos = 0;

    while pos < rule.len() {
        let Some(caps) = RULE_RE.captures(&rule[pos..]) else {
            break;
        };
        let literal = caps.name("static").map_or("", |m| m.as_str());
        if !literal.is_empty() {
            tokens.push(Token::Static(literal.to_owned()));
        }
        let variable = caps.name("variable").map_or("", |m| m.as_str()).to_owned();
        if !used.insert(variable.clone()) {
            return Err(RoutingError::invalid_rule(
                rule,
                format!("variable name '{variable}' used twice"),
            ));
        }
        tokens.push(Token::Placeholder {
            converter: caps
                .name("converter")
                .map_or("default", |m| m.as_str())
                .to_owned(),
            args: caps
                .name("args")
                .map(|m| m.as_str().to_owned())
                .filter(|a| !a.is_empty()),
            variable,
        });
        pos += caps.get(0).map_or(0, |m| m.end());
    }

    if pos < rule.len() {
        let remaining = &rule[pos..];
        if remaining.contains('<') || remaining.contains('>') {
            return Err(RoutingError::invalid_rule(rule, "malformed placeholder"));
        }
        tokens.push(Token::Static(remaining.to_owned()));
    }

    Ok(tokens)
}

/// Parses the argument text of a converter placeholder.
pub fn parse_converter_args(text: &str) -> ConverterArgs {
    let mut args = ConverterArgs::default();
    let source = format!("{text},");
    for caps in ARGS_RE.captures_iter(&source) {
        let raw = caps
            .name("stringval")
            .or_else(|| caps.name("value"))
            .map_or("", |m| m.as_str());
        let value = literal_value(raw);
        match caps.name("name") {
            Some(name) => {
                args.named.insert(name.as_str().to_owned(), value);
            }
            None => args.positional.push(value),
        }
    }
    args
}

fn literal_value(raw: &str) -> Value {
    match raw {
        "None" => return Value::Null,
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    let quoted = raw.len() >= 2
        && (raw.starts_with('"') && raw.ends_with('"') || raw.starts_with('\'') && raw.ends_with('\''));
    if quoted {
        Value::String(raw[1..raw.len() - 1].to_owned())
    } else {
        Value::String(raw.to_owned())
    }
}
