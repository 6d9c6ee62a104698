//! Built-in function set and host function registration.
//!
//! Built-ins propagate null: any null argument yields null (and therefore a
//! non-match in comparisons), except `now()` which takes no arguments.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::expr::error::{EvalError, FunctionError};
use crate::expr::value::Value;

/// Statically known type of a sub-expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Any,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Timestamp,
    Duration,
}

impl Ty {
    pub fn of(value: &Value) -> Ty {
        match value {
            Value::Null => Ty::Null,
            Value::Bool(_) => Ty::Bool,
            Value::Number(_) => Ty::Number,
            Value::String(_) => Ty::String,
            Value::Array(_) => Ty::Array,
            Value::Object(_) => Ty::Object,
            Value::Timestamp(_) => Ty::Timestamp,
            Value::Duration(_) => Ty::Duration,
        }
    }

    /// Types whose value is known only at evaluation time never fail checks.
    pub fn is_known(&self) -> bool {
        !matches!(self, Ty::Any | Ty::Null)
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Ty::Number | Ty::String | Ty::Timestamp | Ty::Duration)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ty::Any => "any",
            Ty::Null => "null",
            Ty::Bool => "bool",
            Ty::Number => "number",
            Ty::String => "string",
            Ty::Array => "array",
            Ty::Object => "object",
            Ty::Timestamp => "timestamp",
            Ty::Duration => "duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Length,
    Concat,
    Substring,
    Upper,
    Lower,
    Abs,
    Round,
    Min,
    Max,
    Now,
    Date,
    Duration,
    TimeSince,
    Count,
    Contains,
}

/// Names handled by the quantifier node rather than a plain call.
pub const QUANTIFIERS: [&str; 3] = ["any", "all", "count"];

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        Some(match name {
            "length" => Builtin::Length,
            "concat" => Builtin::Concat,
            "substring" => Builtin::Substring,
            "upper" => Builtin::Upper,
            "lower" => Builtin::Lower,
            "abs" => Builtin::Abs,
            "round" => Builtin::Round,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "now" => Builtin::Now,
            "date" => Builtin::Date,
            "duration" => Builtin::Duration,
            "timeSince" => Builtin::TimeSince,
            "count" => Builtin::Count,
            "contains" => Builtin::Contains,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Length => "length",
            Builtin::Concat => "concat",
            Builtin::Substring => "substring",
            Builtin::Upper => "upper",
            Builtin::Lower => "lower",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Now => "now",
            Builtin::Date => "date",
            Builtin::Duration => "duration",
            Builtin::TimeSince => "timeSince",
            Builtin::Count => "count",
            Builtin::Contains => "contains",
        }
    }

    /// `(min, max)` argument count; `None` means variadic.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Builtin::Now => (0, Some(0)),
            Builtin::Length
            | Builtin::Upper
            | Builtin::Lower
            | Builtin::Abs
            | Builtin::Date
            | Builtin::Duration
            | Builtin::TimeSince
            | Builtin::Count => (1, Some(1)),
            Builtin::Round => (1, Some(2)),
            Builtin::Substring => (2, Some(3)),
            Builtin::Contains => (2, Some(2)),
            Builtin::Concat | Builtin::Min | Builtin::Max => (1, None),
        }
    }

    /// Results that depend on the wall clock are never constant-folded.
    pub fn is_pure(&self) -> bool {
        !matches!(self, Builtin::Now | Builtin::TimeSince)
    }

    pub fn return_type(&self, args: &[Ty]) -> Ty {
        match self {
            Builtin::Length | Builtin::Abs | Builtin::Round | Builtin::Count => Ty::Number,
            Builtin::Concat | Builtin::Substring | Builtin::Upper | Builtin::Lower => Ty::String,
            Builtin::Min | Builtin::Max => {
                let first = args.first().copied().unwrap_or(Ty::Any);
                if args.iter().all(|t| *t == first) {
                    first
                } else {
                    Ty::Any
                }
            }
            Builtin::Now | Builtin::Date => Ty::Timestamp,
            Builtin::Duration | Builtin::TimeSince => Ty::Duration,
            Builtin::Contains => Ty::Bool,
        }
    }

    /// Reject argument types that can never work. Unknown types pass.
    pub fn check_args(&self, args: &[Ty]) -> Result<(), String> {
        let expect = |idx: usize, allowed: &[Ty]| -> Result<(), String> {
            match args.get(idx) {
                Some(t) if t.is_known() && !allowed.contains(t) => Err(format!(
                    "{}() argument {} must be {}, found {}",
                    self.name(),
                    idx + 1,
                    allowed.iter().map(Ty::name).collect::<Vec<_>>().join(" or "),
                    t.name()
                )),
                _ => Ok(()),
            }
        };

        match self {
            Builtin::Length => expect(0, &[Ty::String, Ty::Array, Ty::Object]),
            Builtin::Upper | Builtin::Lower => expect(0, &[Ty::String]),
            Builtin::Substring => {
                expect(0, &[Ty::String])?;
                expect(1, &[Ty::Number])?;
                expect(2, &[Ty::Number])
            }
            Builtin::Abs => expect(0, &[Ty::Number]),
            Builtin::Round => {
                expect(0, &[Ty::Number])?;
                expect(1, &[Ty::Number])
            }
            Builtin::Min | Builtin::Max => {
                for i in 0..args.len() {
                    expect(i, &[Ty::Number, Ty::String, Ty::Timestamp, Ty::Duration])?;
                }
                Ok(())
            }
            Builtin::Date => expect(0, &[Ty::String, Ty::Number, Ty::Timestamp]),
            Builtin::Duration => expect(0, &[Ty::String, Ty::Number, Ty::Duration]),
            Builtin::TimeSince => expect(0, &[Ty::Timestamp]),
            Builtin::Count => expect(0, &[Ty::Array, Ty::Object]),
            Builtin::Contains => expect(0, &[Ty::String, Ty::Array]),
            Builtin::Now | Builtin::Concat => Ok(()),
        }
    }

    pub fn call(&self, args: &[Value], now: DateTime<Utc>) -> Result<Value, EvalError> {
        if *self != Builtin::Now && args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        let name = self.name();
        let mismatch = |v: &Value| EvalError::invalid_argument(name, format!("unsupported {} argument", v.type_name()));

        match self {
            Builtin::Length => match &args[0] {
                Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
                Value::Array(items) => Ok(Value::Number(items.len() as f64)),
                Value::Object(map) => Ok(Value::Number(map.len() as f64)),
                other => Err(mismatch(other)),
            },
            Builtin::Concat => Ok(Value::String(args.iter().map(Value::render).collect())),
            Builtin::Substring => {
                let s = args[0].as_str().ok_or_else(|| mismatch(&args[0]))?;
                let start = args[1].as_f64().ok_or_else(|| mismatch(&args[1]))?.max(0.0) as usize;
                let chars = s.chars().skip(start);
                let out: String = match args.get(2) {
                    Some(len) => {
                        let len = len.as_f64().ok_or_else(|| mismatch(len))?.max(0.0) as usize;
                        chars.take(len).collect()
                    }
                    None => chars.collect(),
                };
                Ok(Value::String(out))
            }
            Builtin::Upper => args[0]
                .as_str()
                .map(|s| Value::String(s.to_uppercase()))
                .ok_or_else(|| mismatch(&args[0])),
            Builtin::Lower => args[0]
                .as_str()
                .map(|s| Value::String(s.to_lowercase()))
                .ok_or_else(|| mismatch(&args[0])),
            Builtin::Abs => args[0]
                .as_f64()
                .map(|n| Value::Number(n.abs()))
                .ok_or_else(|| mismatch(&args[0])),
            Builtin::Round => {
                let n = args[0].as_f64().ok_or_else(|| mismatch(&args[0]))?;
                let digits = match args.get(1) {
                    Some(d) => d.as_f64().ok_or_else(|| mismatch(d))?.clamp(0.0, 15.0) as i32,
                    None => 0,
                };
                let factor = 10f64.powi(digits);
                Ok(Value::Number((n * factor).round() / factor))
            }
            Builtin::Min | Builtin::Max => {
                let mut best = &args[0];
                for candidate in &args[1..] {
                    let ord = candidate.compare(best).ok_or(EvalError::TypeMismatch {
                        op: name,
                        left: candidate.type_name(),
                        right: best.type_name(),
                    })?;
                    let better = match self {
                        Builtin::Min => ord.is_lt(),
                        _ => ord.is_gt(),
                    };
                    if better {
                        best = candidate;
                    }
                }
                if best.compare(best).is_none() {
                    return Err(mismatch(best));
                }
                Ok(best.clone())
            }
            Builtin::Now => Ok(Value::Timestamp(now)),
            Builtin::Date => match &args[0] {
                Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
                Value::String(s) => parse_date(s)
                    .map(Value::Timestamp)
                    .ok_or_else(|| EvalError::invalid_argument(name, format!("unrecognised date '{}'", s))),
                Value::Number(secs) => {
                    let millis = (secs * 1000.0).round() as i64;
                    DateTime::<Utc>::from_timestamp_millis(millis)
                        .map(Value::Timestamp)
                        .ok_or_else(|| EvalError::invalid_argument(name, "epoch seconds out of range"))
                }
                other => Err(mismatch(other)),
            },
            Builtin::Duration => match &args[0] {
                Value::Duration(d) => Ok(Value::Duration(*d)),
                Value::String(s) => parse_duration(s)
                    .map(Value::Duration)
                    .ok_or_else(|| EvalError::invalid_argument(name, format!("unrecognised duration '{}'", s))),
                Value::Number(secs) => TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
                    .map(Value::Duration)
                    .ok_or_else(|| EvalError::invalid_argument(name, "duration out of range")),
                other => Err(mismatch(other)),
            },
            Builtin::TimeSince => match &args[0] {
                Value::Timestamp(ts) => Ok(Value::Duration(now.signed_duration_since(*ts))),
                other => Err(mismatch(other)),
            },
            Builtin::Count => match &args[0] {
                Value::Array(items) => Ok(Value::Number(items.len() as f64)),
                Value::Object(map) => Ok(Value::Number(map.len() as f64)),
                other => Err(mismatch(other)),
            },
            Builtin::Contains => match (&args[0], &args[1]) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(Value::Bool(haystack.contains(needle.as_str())))
                }
                (Value::Array(items), needle) => Ok(Value::Bool(items.iter().any(|i| i.strict_eq(needle)))),
                (other, _) => Err(mismatch(other)),
            },
        }
    }
}

/// Parse durations such as `7d`, `1h30m`, `500ms`, `2w` or `1.5h`.
pub fn parse_duration(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut total_ms = 0f64;
    let mut rest = text;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let amount: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
        let unit_ms = match &rest[..unit_len] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            "w" => 604_800_000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_ms += amount * unit_ms;
    }

    TimeDelta::try_milliseconds(total_ms.round() as i64)
}

/// Parse RFC 3339 timestamps, `YYYY-MM-DDTHH:MM:SS` (UTC) or `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Signature of a host-provided function.
pub type HostFn = dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync;

/// A function registered by the embedding application.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    arity: usize,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Extra functions visible to the compiler besides the built-ins.
#[derive(Clone, Default, Debug)]
pub struct FunctionRegistry {
    host: HashMap<String, HostFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function. Built-in names cannot be shadowed.
    pub fn register<F>(&mut self, name: &str, arity: usize, func: F) -> Result<(), FunctionError>
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        if Builtin::lookup(name).is_some() || QUANTIFIERS.contains(&name) {
            return Err(FunctionError::Reserved(name.to_string()));
        }
        let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(FunctionError::InvalidName(name.to_string()));
        }
        self.host.insert(
            name.to_string(),
            HostFunction {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.host.get(name)
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }
}
