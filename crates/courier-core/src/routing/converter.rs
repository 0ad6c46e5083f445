//! Placeholder converters.
//!
//! A converter contributes the regex fragment a placeholder matches, a
//! weight used for rule ordering, and the two conversions between captured
//! text and typed values. Conversions reject with [`ValidationError`],
//! which the routing layer treats as "no match" or "no build".

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::error::{RoutingError, RoutingResult, ValidationError};

/// Weight carried by every built-in converter.
pub const DEFAULT_WEIGHT: u32 = 100;

/// A text <-> value transformer bound to a placeholder.
pub trait Converter: Send + Sync + fmt::Debug {
    /// The regex fragment matched by this placeholder.
    fn regex(&self) -> &str;

    /// Match-order weight; higher sorts earlier.
    fn weight(&self) -> u32 {
        DEFAULT_WEIGHT
    }

    /// Whether this converter counts towards a rule's greediness.
    fn is_greedy(&self) -> bool {
        false
    }

    /// Converts captured text into a parameter value.
    fn to_value(&self, text: &str) -> Result<Value, ValidationError> {
        Ok(Value::String(text.to_owned()))
    }

    /// Converts a parameter value into message text.
    fn to_text(&self, value: &Value) -> Result<String, ValidationError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Null => Err(ValidationError),
            other => Ok(other.to_string()),
        }
    }
}

// =============================================================================
// Converter arguments
// =============================================================================

/// Arguments given to a converter in a rule, e.g. `string(minlength=2)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterArgs {
    /// Positional arguments in order.
    pub positional: Vec<Value>,
    /// Keyword arguments.
    pub named: Map<String, Value>,
}

impl ConverterArgs {
    /// Looks up a keyword argument, accepting a trailing-underscore alias.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named
            .get(name)
            .or_else(|| self.named.get(&format!("{name}_")))
    }

    fn usize_arg(&self, converter: &str, name: &str) -> RoutingResult<Option<usize>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| RoutingError::invalid_args(converter, format!("{name} must be a non-negative integer"))),
            Some(other) => Err(RoutingError::invalid_args(
                converter,
                format!("{name} must be an integer, got {other}"),
            )),
        }
    }

    fn number_arg(&self, converter: &str, name: &str) -> RoutingResult<Option<f64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(RoutingError::invalid_args(
                converter,
                format!("{name} must be a number, got {other}"),
            )),
        }
    }

    fn reject_unknown(&self, converter: &str, known: &[&str]) -> RoutingResult<()> {
        for key in self.named.keys() {
            let base = key.strip_suffix('_').unwrap_or(key);
            if !known.contains(&base) {
                return Err(RoutingError::invalid_args(
                    converter,
                    format!("unexpected argument '{key}'"),
                ));
            }
        }
        Ok(())
    }
}

/// Builds a converter from the arguments written in a rule.
pub type ConverterFactory =
    Arc<dyn Fn(&ConverterArgs) -> RoutingResult<Box<dyn Converter>> + Send + Sync>;

// =============================================================================
// Built-in converters
// =============================================================================

fn length_quantifier(
    converter: &str,
    args: &ConverterArgs,
) -> RoutingResult<String> {
    args.reject_unknown(converter, &["minlength", "maxlength", "length"])?;
    let positional = |idx: usize| args.positional.get(idx).and_then(Value::as_u64);
    if let Some(length) = args.usize_arg(converter, "length")? {
        return Ok(format!("{{{length}}}"));
    }
    let min = args
        .usize_arg(converter, "minlength")?
        .or(positional(0).map(|n| n as usize))
        .unwrap_or(1);
    let max = args
        .usize_arg(converter, "maxlength")?
        .or(positional(1).map(|n| n as usize));
    Ok(match max {
        Some(max) => format!("{{{min},{max}}}"),
        None => format!("{{{min},}}"),
    })
}

/// Matches a run of non-whitespace characters. The default converter.
#[derive(Debug, Clone)]
pub struct WordConverter {
    regex: String,
}

impl WordConverter {
    /// Creates the converter from rule arguments.
    pub fn from_args(args: &ConverterArgs) -> RoutingResult<Self> {
        Ok(Self {
            regex: format!(r"\S{}", length_quantifier("default", args)?),
        })
    }
}

impl Converter for WordConverter {
    fn regex(&self) -> &str {
        &self.regex
    }
}

/// Matches any text, including whitespace.
#[derive(Debug, Clone)]
pub struct StringConverter {
    regex: String,
}

impl StringConverter {
    /// Creates the converter from rule arguments.
    pub fn from_args(args: &ConverterArgs) -> RoutingResult<Self> {
        Ok(Self {
            regex: format!(".{}", length_quantifier("string", args)?),
        })
    }
}

impl Converter for StringConverter {
    fn regex(&self) -> &str {
        &self.regex
    }
}

/// Matches one of a fixed list of items.
#[derive(Debug, Clone)]
pub struct AnyConverter {
    items: Vec<String>,
    regex: String,
}

impl AnyConverter {
    /// Creates the converter from rule arguments.
    pub fn from_args(args: &ConverterArgs) -> RoutingResult<Self> {
        if !args.named.is_empty() {
            return Err(RoutingError::invalid_args("any", "only positional items are accepted"));
        }
        if args.positional.is_empty() {
            return Err(RoutingError::invalid_args("any", "at least one item is required"));
        }
        let items: Vec<String> = args
            .positional
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let alternatives: Vec<String> = items.iter().map(|item| regex::escape(item)).collect();
        Ok(Self {
            regex: format!("(?:{})", alternatives.join("|")),
            items,
        })
    }

    /// The accepted items.
    pub fn items(&self) -> &[String] {
        &self.items
    }
}

impl Converter for AnyConverter {
    fn regex(&self) -> &str {
        &self.regex
    }

    fn to_text(&self, value: &Value) -> Result<String, ValidationError> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => return Err(ValidationError),
            other => other.to_string(),
        };
        if self.items.contains(&text) {
            Ok(text)
        } else {
            Err(ValidationError)
        }
    }
}

/// Matches an unsigned integer.
#[derive(Debug, Clone)]
pub struct IntConverter {
    fixed_digits: usize,
    min: Option<i64>,
    max: Option<i64>,
}

impl IntConverter {
    /// Creates the converter from rule arguments.
    pub fn from_args(args: &ConverterArgs) -> RoutingResult<Self> {
        args.reject_unknown("int", &["fixed_digits", "min", "max"])?;
        let bound = |name| -> RoutingResult<Option<i64>> {
            Ok(args.number_arg("int", name)?.map(|n| n as i64))
        };
        Ok(Self {
            fixed_digits: args
                .usize_arg("int", "fixed_digits")?
                .or(args.positional.first().and_then(Value::as_u64).map(|n| n as usize))
                .unwrap_or(0),
            min: bound("min")?,
            max: bound("max")?,
        })
    }

    fn in_range(&self, value: i64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

impl Converter for IntConverter {
    fn regex(&self) -> &str {
        r"\d+"
    }

    fn to_value(&self, text: &str) -> Result<Value, ValidationError> {
        if self.fixed_digits != 0 && text.chars().count() != self.fixed_digits {
            return Err(ValidationError);
        }
        let value: i64 = text.parse().map_err(|_| ValidationError)?;
        if !self.in_range(value) {
            return Err(ValidationError);
        }
        Ok(Value::from(value))
    }

    fn to_text(&self, value: &Value) -> Result<String, ValidationError> {
        let value = match value {
            Value::Number(n) => n.as_i64().ok_or(ValidationError)?,
            Value::String(s) => s.parse().map_err(|_| ValidationError)?,
            _ => return Err(ValidationError),
        };
        if value < 0 || !self.in_range(value) {
            return Err(ValidationError);
        }
        Ok(format!("{value:0width$}", width = self.fixed_digits))
    }
}

/// Matches an unsigned decimal number with a fractional part.
#[derive(Debug, Clone)]
pub struct FloatConverter {
    min: Option<f64>,
    max: Option<f64>,
}

impl FloatConverter {
    /// Creates the converter from rule arguments.
    pub fn from_args(args: &ConverterArgs) -> RoutingResult<Self> {
        args.reject_unknown("float", &["min", "max"])?;
        Ok(Self {
            min: args.number_arg("float", "min")?,
            max: args.number_arg("float", "max")?,
        })
    }

    fn in_range(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

impl Converter for FloatConverter {
    fn regex(&self) -> &str {
        r"\d+\.\d+"
    }

    fn to_value(&self, text: &str) -> Result<Value, ValidationError> {
        let value: f64 = text.parse().map_err(|_| ValidationError)?;
        if !self.in_range(value) {
            return Err(ValidationError);
        }
        Number::from_f64(value).map(Value::Number).ok_or(ValidationError)
    }

    fn to_text(&self, value: &Value) -> Result<String, ValidationError> {
        let value = match value {
            Value::Number(n) => n.as_f64().ok_or(ValidationError)?,
            Value::String(s) => s.parse().map_err(|_| ValidationError)?,
            _ => return Err(ValidationError),
        };
        if value < 0.0 || !self.in_range(value) {
            return Err(ValidationError);
        }
        let text = value.to_string();
        Ok(if text.contains('.') { text } else { format!("{text}.0") })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name-to-factory map of the converters a route map knows.
#[derive(Clone)]
pub struct ConverterRegistry {
    factories: HashMap<String, ConverterFactory>,
}

impl ConverterRegistry {
    /// Creates a registry holding the built-in converters:
    /// `default`, `string`, `any`, `int` and `float`.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("default", |args| Ok(Box::new(WordConverter::from_args(args)?)));
        registry.register("string", |args| Ok(Box::new(StringConverter::from_args(args)?)));
        registry.register("any", |args| Ok(Box::new(AnyConverter::from_args(args)?)));
        registry.register("int", |args| Ok(Box::new(IntConverter::from_args(args)?)));
        registry.register("float", |args| Ok(Box::new(FloatConverter::from_args(args)?)));
        registry
    }

    /// Registers (or replaces) a converter factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConverterArgs) -> RoutingResult<Box<dyn Converter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiates the converter `name` with `args`.
    pub fn build(&self, name: &str, args: &ConverterArgs) -> RoutingResult<Box<dyn Converter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RoutingError::UnknownConverter(name.to_owned()))?;
        factory(args)
    }

    /// Returns `true` if a converter named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ConverterRegistry")
            .field("converters", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(pairs: &[(&str, Value)]) -> ConverterArgs {
        ConverterArgs {
            positional: Vec::new(),
            named: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_length_quantifiers() {
        let word = WordConverter::from_args(&ConverterArgs::default()).unwrap();
        assert_eq!(word.regex(), r"\S{1,}");

        let city = StringConverter::from_args(&named(&[("maxlength", json!(10))])).unwrap();
        assert_eq!(city.regex(), ".{1,10}");

        let code = StringConverter::from_args(&named(&[("length", json!(2))])).unwrap();
        assert_eq!(code.regex(), ".{2}");
    }

    #[test]
    fn test_any_escapes_items() {
        let args = ConverterArgs {
            positional: vec![json!("k_bx"), json!("kost-bebix"), json!("a.b")],
            named: Map::new(),
        };
        let any = AnyConverter::from_args(&args).unwrap();
        let re = regex::Regex::new(&format!("^{}$", any.regex())).unwrap();
        assert!(re.is_match("kost-bebix"));
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));
        assert_eq!(any.to_text(&json!("k_bx")), Ok("k_bx".to_string()));
        assert_eq!(any.to_text(&json!("nobody")), Err(ValidationError));
    }

    #[test]
    fn test_int_range_and_fixed_digits() {
        let conv = IntConverter::from_args(&named(&[
            ("fixed_digits", json!(3)),
            ("max", json!(500)),
        ]))
        .unwrap();
        assert_eq!(conv.to_value("042"), Ok(json!(42)));
        assert_eq!(conv.to_value("42"), Err(ValidationError));
        assert_eq!(conv.to_value("501"), Err(ValidationError));
        assert_eq!(conv.to_text(&json!(7)), Ok("007".to_string()));
        assert_eq!(conv.to_text(&json!("seven")), Err(ValidationError));
    }

    #[test]
    fn test_float_conversion() {
        let conv = FloatConverter::from_args(&named(&[("min_", json!(1.5))])).unwrap();
        assert_eq!(conv.to_value("2.25"), Ok(json!(2.25)));
        assert_eq!(conv.to_value("1.0"), Err(ValidationError));
        assert_eq!(conv.to_text(&json!(3)), Ok("3.0".to_string()));
    }

    #[test]
    fn test_unknown_arguments_are_rejected() {
        let err = IntConverter::from_args(&named(&[("digits", json!(3))])).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidConverterArgs { .. }));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ConverterRegistry::new();
        assert!(registry.contains("int"));
        let err = registry.build("path", &ConverterArgs::default()).unwrap_err();
        assert_eq!(err, RoutingError::UnknownConverter("path".into()));
    }
}
