//! Budgeted evaluation of compiled expressions against events.
//!
//! # Responsibilities
//! - Walk a [`CompiledExpression`] tree with short-circuit `AND`/`OR`
//! - Count node visits and enforce the [`ExecutionBudget`]
//! - Resolve field paths against the event payload, headers and subject
//!
//! # Design Decisions
//! - Values are borrowed from the payload wherever possible (`Cow`), so
//!   plain field comparisons never clone
//! - Boolean positions are three-valued: an ordinary evaluation error is
//!   unknown, `NOT` keeps it unknown and `AND`/`OR` follow Kleene logic, so
//!   operand order never changes the result. A top-level unknown surfaces
//!   as the original error. Budget and timeout errors abort immediately
//! - The wall clock is sampled every 256 visits rather than every node

use std::borrow::Cow;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::event::Event;
use crate::expr::ast::{CompareOp, PathSegment};
use crate::expr::compile::{CompiledExpression, FieldRef, FieldRoot, Node, QuantifierKind};
use crate::expr::error::EvalError;
use crate::expr::value::{Value, NULL};

static TRUE: Value = Value::Bool(true);
static FALSE: Value = Value::Bool(false);

const CLOCK_CHECK_INTERVAL: u64 = 256;

/// Limits applied to a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBudget {
    pub max_node_visits: u64,
    pub max_duration: Option<Duration>,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self {
            max_node_visits: 10_000,
            max_duration: Some(Duration::from_millis(50)),
        }
    }
}

impl ExecutionBudget {
    pub fn new(max_node_visits: u64) -> Self {
        Self {
            max_node_visits,
            max_duration: None,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn unlimited() -> Self {
        Self {
            max_node_visits: u64::MAX,
            max_duration: None,
        }
    }
}

/// Evaluate a compiled filter to a boolean. A `null` result is `false`.
pub fn evaluate(
    expr: &CompiledExpression,
    event: &Event,
    budget: &ExecutionBudget,
) -> Result<bool, EvalError> {
    let mut evaluator = Evaluator::new(Some(event), *budget);
    match evaluator.truth(expr.root())? {
        Truth::Known(b) => Ok(b),
        Truth::Unknown(e) => Err(e),
    }
}

/// Evaluate a compiled expression to its value.
pub fn evaluate_value(
    expr: &CompiledExpression,
    event: &Event,
    budget: &ExecutionBudget,
) -> Result<Value, EvalError> {
    let mut evaluator = Evaluator::new(Some(event), *budget);
    evaluator.eval(expr.root()).map(Cow::into_owned)
}

/// Used by the compiler to fold event-independent sub-trees.
pub(crate) fn evaluate_constant(node: &Node) -> Result<Value, EvalError> {
    let mut evaluator = Evaluator::new(None, ExecutionBudget::new(100_000));
    evaluator.eval(node).map(Cow::into_owned)
}

/// Resolve a field against an event. `None` means the field is absent,
/// which is distinct from a present JSON `null`.
pub fn resolve_field<'a>(field: &FieldRef, event: &'a Event) -> Option<Cow<'a, Value>> {
    match field.root {
        FieldRoot::Payload => walk(event.payload(), &field.segments).map(Cow::Borrowed),
        FieldRoot::Subject if field.segments.is_empty() => {
            Some(Cow::Owned(Value::String(event.subject().to_string())))
        }
        FieldRoot::Headers => match field.segments.as_slice() {
            [] => Some(Cow::Owned(Value::Object(
                event
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ))),
            [PathSegment::Key(name)] => event
                .header(name)
                .map(|v| Cow::Owned(Value::String(v.to_string()))),
            _ => None,
        },
        FieldRoot::Subject | FieldRoot::Binding(_) => None,
    }
}

fn walk<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |current, seg| match seg {
        PathSegment::Key(key) => current.get(key),
        PathSegment::Index(idx) => current.index(*idx),
    })
}

enum Truth {
    Known(bool),
    Unknown(EvalError),
}

fn boolean(b: bool) -> Cow<'static, Value> {
    Cow::Borrowed(if b { &TRUE } else { &FALSE })
}

struct Evaluator<'a> {
    event: Option<&'a Event>,
    bindings: Vec<Cow<'a, Value>>,
    budget: ExecutionBudget,
    visits: u64,
    started: Instant,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    fn new(event: Option<&'a Event>, budget: ExecutionBudget) -> Self {
        Self {
            event,
            bindings: Vec::new(),
            budget,
            visits: 0,
            started: Instant::now(),
            now: Utc::now(),
        }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.visits += 1;
        if self.visits > self.budget.max_node_visits {
            return Err(EvalError::BudgetExceeded {
                limit: self.budget.max_node_visits,
            });
        }
        if let Some(max) = self.budget.max_duration {
            if self.visits % CLOCK_CHECK_INTERVAL == 0 && self.started.elapsed() > max {
                return Err(EvalError::Timeout {
                    limit_ms: max.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    fn lookup(&self, field: &FieldRef) -> Option<Cow<'a, Value>> {
        match field.root {
            FieldRoot::Binding(slot) => match self.bindings.get(slot)? {
                Cow::Borrowed(v) => walk(*v, &field.segments).map(Cow::Borrowed),
                Cow::Owned(v) => walk(v, &field.segments).map(|v| Cow::Owned(v.clone())),
            },
            _ => self.event.and_then(|event| resolve_field(field, event)),
        }
    }

    fn eval_bool(&mut self, node: &'a Node) -> Result<bool, EvalError> {
        match self.eval(node)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            other => Err(EvalError::NotBoolean {
                found: other.type_name(),
            }),
        }
    }

    /// Evaluate a node in boolean position. `Err` is reserved for budget
    /// and timeout overruns.
    fn truth(&mut self, node: &'a Node) -> Result<Truth, EvalError> {
        match node {
            Node::Not(_) | Node::And(_) | Node::Or(_) => {
                self.tick()?;
                self.logical(node)
            }
            _ => match self.eval_bool(node) {
                Ok(b) => Ok(Truth::Known(b)),
                Err(e) if e.is_budget() => Err(e),
                Err(e) => Ok(Truth::Unknown(e)),
            },
        }
    }

    fn logical(&mut self, node: &'a Node) -> Result<Truth, EvalError> {
        match node {
            Node::Not(inner) => Ok(match self.truth(inner)? {
                Truth::Known(b) => Truth::Known(!b),
                unknown => unknown,
            }),
            Node::And(ops) => self.connective(ops, false),
            Node::Or(ops) => self.connective(ops, true),
            _ => self.truth(node),
        }
    }

    /// `AND` stops at the first `false`, `OR` at the first `true`. Without a
    /// deciding operand, any unknown operand leaves the result unknown.
    fn connective(&mut self, ops: &'a [Node], decisive: bool) -> Result<Truth, EvalError> {
        let mut unknown = None;
        for op in ops {
            match self.truth(op)? {
                Truth::Known(b) if b == decisive => return Ok(Truth::Known(decisive)),
                Truth::Known(_) => {}
                Truth::Unknown(e) => {
                    unknown.get_or_insert(e);
                }
            }
        }
        Ok(unknown.map_or(Truth::Known(!decisive), Truth::Unknown))
    }

    fn eval(&mut self, node: &'a Node) -> Result<Cow<'a, Value>, EvalError> {
        self.tick()?;
        match node {
            Node::Const(v) => Ok(Cow::Borrowed(v)),
            Node::Field(field) => Ok(self.lookup(field).unwrap_or(Cow::Borrowed(&NULL))),
            Node::Exists(field) => Ok(boolean(self.lookup(field).is_some())),
            Node::Neg(inner) => {
                let v = self.eval(inner)?;
                match v.as_ref() {
                    Value::Number(n) => Ok(Cow::Owned(Value::Number(-n))),
                    Value::Duration(d) => Ok(Cow::Owned(Value::Duration(-*d))),
                    Value::Null => Ok(Cow::Borrowed(&NULL)),
                    other => Err(EvalError::invalid_argument(
                        "-",
                        format!("cannot negate {}", other.type_name()),
                    )),
                }
            }
            Node::Not(_) | Node::And(_) | Node::Or(_) => match self.logical(node)? {
                Truth::Known(b) => Ok(boolean(b)),
                Truth::Unknown(e) => Err(e),
            },
            Node::Compare { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                compare(*op, &l, &r).map(boolean)
            }
            Node::Like {
                operand,
                pattern,
                negated,
            } => {
                let v = self.eval(operand)?;
                match v.as_ref() {
                    Value::Null => Ok(boolean(false)),
                    Value::String(s) => Ok(boolean(pattern.matches(s) != *negated)),
                    other => Err(EvalError::TypeMismatch {
                        op: "LIKE",
                        left: other.type_name(),
                        right: "string",
                    }),
                }
            }
            Node::Matches {
                operand,
                regex,
                negated,
            } => {
                let v = self.eval(operand)?;
                match v.as_ref() {
                    Value::Null => Ok(boolean(false)),
                    Value::String(s) => Ok(boolean(regex.is_match(s) != *negated)),
                    other => Err(EvalError::TypeMismatch {
                        op: "MATCHES",
                        left: other.type_name(),
                        right: "string",
                    }),
                }
            }
            Node::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let v = self.eval(operand)?;
                let lo = self.eval(low)?;
                let hi = self.eval(high)?;
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(boolean(false));
                }
                let above = ordering("BETWEEN", &v, &lo)?;
                let below = ordering("BETWEEN", &v, &hi)?;
                let inside = above != Ordering::Less && below != Ordering::Greater;
                Ok(boolean(inside != *negated))
            }
            Node::In {
                operand,
                set,
                negated,
            } => {
                let v = self.eval(operand)?;
                if v.is_null() {
                    return Ok(boolean(false));
                }
                let found = set.iter().any(|item| item.strict_eq(&v));
                Ok(boolean(found != *negated))
            }
            Node::IsNull { operand, negated } => {
                let v = self.eval(operand)?;
                Ok(boolean(v.is_null() != *negated))
            }
            Node::Call { func, args } => {
                let values = self.eval_args(args)?;
                func.call(&values, self.now).map(Cow::Owned)
            }
            Node::Host { func, args } => {
                let values = self.eval_args(args)?;
                func.call(&values).map(Cow::Owned)
            }
            Node::Quantifier {
                kind,
                collection,
                slot,
                predicate,
            } => self.quantify(*kind, collection, *slot, predicate),
        }
    }

    fn eval_args(&mut self, args: &'a [Node]) -> Result<Vec<Value>, EvalError> {
        args.iter()
            .map(|arg| self.eval(arg).map(Cow::into_owned))
            .collect()
    }

    fn quantify(
        &mut self,
        kind: QuantifierKind,
        collection: &'a Node,
        slot: usize,
        predicate: &'a Node,
    ) -> Result<Cow<'a, Value>, EvalError> {
        let items: Vec<Cow<'a, Value>> = match self.eval(collection)? {
            Cow::Borrowed(Value::Array(items)) => items.iter().map(Cow::Borrowed).collect(),
            Cow::Owned(Value::Array(items)) => items.into_iter().map(Cow::Owned).collect(),
            Cow::Borrowed(Value::Null) | Cow::Owned(Value::Null) => {
                return Ok(match kind {
                    QuantifierKind::Count => Cow::Borrowed(&NULL),
                    _ => boolean(false),
                });
            }
            other => {
                return Err(EvalError::TypeMismatch {
                    op: kind.name(),
                    left: other.type_name(),
                    right: "array",
                })
            }
        };

        debug_assert_eq!(self.bindings.len(), slot);
        let mut hits = 0usize;
        let mut unknown = None;
        for item in items {
            self.bindings.push(item);
            let outcome = self.truth(predicate);
            self.bindings.pop();
            match (kind, outcome?) {
                (QuantifierKind::Any, Truth::Known(true)) => return Ok(boolean(true)),
                (QuantifierKind::All, Truth::Known(false)) => return Ok(boolean(false)),
                (_, Truth::Known(true)) => hits += 1,
                (_, Truth::Known(false)) => {}
                (_, Truth::Unknown(e)) => {
                    unknown.get_or_insert(e);
                }
            }
        }

        match (kind, unknown) {
            (QuantifierKind::Count, _) => Ok(Cow::Owned(Value::Number(hits as f64))),
            (_, Some(e)) => Err(e),
            (QuantifierKind::Any, None) => Ok(boolean(false)),
            (QuantifierKind::All, None) => Ok(boolean(true)),
        }
    }
}

fn ordering(op: &'static str, left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    left.compare(right).ok_or(EvalError::TypeMismatch {
        op,
        left: left.type_name(),
        right: right.type_name(),
    })
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(false);
    }
    let result = match op {
        CompareOp::Eq => left.strict_eq(right),
        CompareOp::Ne => !left.strict_eq(right),
        CompareOp::Lt => ordering(op.symbol(), left, right)? == Ordering::Less,
        CompareOp::Le => ordering(op.symbol(), left, right)? != Ordering::Greater,
        CompareOp::Gt => ordering(op.symbol(), left, right)? == Ordering::Greater,
        CompareOp::Ge => ordering(op.symbol(), left, right)? != Ordering::Less,
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile::Compiler;
    use crate::expr::functions::FunctionRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn event(payload: serde_json::Value) -> Event {
        Event::from_json("orders.created", payload)
    }

    fn eval(src: &str, ev: &Event) -> Result<bool, EvalError> {
        let expr = Compiler::new().compile(src).unwrap();
        evaluate(&expr, ev, &ExecutionBudget::default())
    }

    fn check(src: &str, ev: &Event) -> bool {
        eval(src, ev).unwrap()
    }

    #[test]
    fn test_comparisons_and_logic() {
        let ev = event(json!({"amount": 150, "region": "EU", "vip": true}));
        assert!(check("payload.amount > 100 AND payload.region == 'EU'", &ev));
        assert!(!check("payload.amount < 100 OR payload.region != 'EU'", &ev));
        assert!(check("NOT payload.amount <= 100", &ev));
        assert!(check("payload.vip", &ev));
        assert!(check("payload.amount BETWEEN 100 AND 150", &ev));
        assert!(check("payload.amount NOT BETWEEN 1 AND 10", &ev));
        assert!(check("payload.region IN ('EU', 'UK')", &ev));
        assert!(check("payload.region NOT IN ['US']", &ev));
        assert!(check("subject LIKE 'orders.*'", &ev));
    }

    #[test]
    fn test_null_semantics() {
        let ev = event(json!({"a": null, "b": 1}));
        assert!(!check("payload.missing == 1", &ev));
        assert!(!check("payload.missing != 1", &ev));
        assert!(check("payload.missing IS NULL", &ev));
        assert!(check("payload.a IS NULL", &ev));
        assert!(check("payload.b IS NOT NULL", &ev));
        assert!(check("EXISTS payload.a", &ev));
        assert!(!check("EXISTS payload.missing", &ev));
        assert!(!check("payload.missing > 0", &ev));
        assert!(check("upper(payload.missing) IS NULL", &ev));
    }

    #[test]
    fn test_strict_number_equality() {
        let ev = event(json!({"n": 1.0, "z": 0.0}));
        assert!(check("payload.n == 1", &ev));
        assert!(!check("payload.z == -0.0", &ev));
        assert!(!check("payload.n == '1'", &ev));
    }

    #[test]
    fn test_type_error_is_unknown() {
        let ev = event(json!({"name": "x", "ok": true, "off": false}));
        // Ordering a string against a number fails at runtime only.
        assert!(eval("payload.name > 5", &ev).is_err());
        assert!(eval("payload.name > 5 AND payload.ok", &ev).is_err());
        assert!(!check("payload.name > 5 AND payload.off", &ev));
        assert!(check("payload.name > 5 OR payload.ok", &ev));
        assert!(check("payload.ok OR payload.name > 5", &ev));
        assert!(eval("payload.name > 5 OR payload.off", &ev).is_err());
    }

    #[test]
    fn test_not_keeps_errors_unknown() {
        let ev = event(json!({"name": "x", "ok": true}));
        assert!(eval("NOT (payload.name > 5)", &ev).is_err());
        assert!(eval("NOT (payload.name > 5 AND payload.ok)", &ev).is_err());
        assert!(eval("NOT (payload.name > 5 OR payload.nope == 1)", &ev).is_err());
        assert!(eval("NOT NOT (payload.name > 5)", &ev).is_err());
        // A decided operand still decides.
        assert!(check("NOT (payload.name > 5 AND payload.nope == 1)", &ev));
        assert!(!check("NOT (payload.name > 5 OR payload.ok)", &ev));
    }

    #[test]
    fn test_unknown_is_order_independent() {
        let ev = event(json!({"name": "x", "ok": true, "off": false}));
        for (a, b) in [
            ("payload.name > 5", "payload.ok"),
            ("payload.name > 5", "payload.off"),
        ] {
            for op in ["AND", "OR"] {
                let ab = eval(&format!("{a} {op} {b}"), &ev).ok();
                let ba = eval(&format!("{b} {op} {a}"), &ev).ok();
                assert_eq!(ab, ba, "{a} {op} {b}");
            }
        }
    }

    #[test]
    fn test_quantifier_with_unknown_element() {
        let ev = event(json!({"items": [1, "x", 3]}));
        assert!(check("any(payload.items, i => i == 3)", &ev));
        assert!(eval("all(payload.items, i => i > 0)", &ev).is_err());
        assert!(!check("all(payload.items, i => i > 1)", &ev));
        assert!(check("count(payload.items, i => i > 0) == 2", &ev));
    }

    #[test]
    fn test_regex_is_anchored() {
        let ev = event(json!({"sku": "AB-1234"}));
        assert!(check("payload.sku MATCHES '[A-Z]{2}-[0-9]+'", &ev));
        assert!(!check("payload.sku MATCHES '[0-9]+'", &ev));
        assert!(check("payload.sku NOT MATCHES 'x'", &ev));
    }

    #[test]
    fn test_quantifiers() {
        let ev = event(json!({"items": [{"qty": 2, "sku": "a"}, {"qty": 0, "sku": "b"}], "empty": []}));
        assert!(check("any(payload.items, i => i.qty == 0)", &ev));
        assert!(!check("all(payload.items, i => i.qty > 0)", &ev));
        assert!(check("count(payload.items, i => i.qty > 0) == 1", &ev));
        assert!(check("count(payload.items) == 2", &ev));
        assert!(check("all(payload.empty, i => i.qty > 0)", &ev));
        assert!(!check("any(payload.empty, i => true)", &ev));
        assert!(!check("any(payload.missing, i => true)", &ev));
        assert!(check("payload.items[1].sku == 'b'", &ev));
    }

    #[test]
    fn test_headers_and_subject() {
        let ev = event(json!({})).with_header("tenant", "acme");
        assert!(check("headers.tenant == 'acme'", &ev));
        assert!(!check("EXISTS headers.other", &ev));
        assert!(check("subject == 'orders.created'", &ev));
    }

    #[test]
    fn test_time_functions() {
        let ev = event(json!({"created": "2020-01-01T00:00:00Z"}));
        assert!(check("timeSince(date(payload.created)) > duration('7d')", &ev));
        assert!(check("date(payload.created) < now()", &ev));
    }

    #[test]
    fn test_budget_exceeded() {
        let items: Vec<i64> = (0..1_000).collect();
        let ev = event(json!({ "items": items }));
        let expr = Compiler::new()
            .compile("all(payload.items, x => x >= 0)")
            .unwrap();
        let err = evaluate(&expr, &ev, &ExecutionBudget::new(100)).unwrap_err();
        assert_eq!(err, EvalError::BudgetExceeded { limit: 100 });
        assert!(evaluate(&expr, &ev, &ExecutionBudget::new(100_000)).unwrap());

        // Budget errors are not swallowed by logical operators.
        let expr = Compiler::new()
            .compile("payload.items IS NOT NULL AND (all(payload.items, x => x >= 0) OR payload.items IS NULL)")
            .unwrap();
        assert!(evaluate(&expr, &ev, &ExecutionBudget::new(100)).unwrap_err().is_budget());
    }

    #[test]
    fn test_short_circuit_skips_host_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut functions = FunctionRegistry::new();
        functions
            .register("expensive", 1, move |args| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(args[0].clone())
            })
            .unwrap();
        let compiler = Compiler::with_functions(functions);
        let expr = compiler
            .compile("expensive(payload.flag) == true AND payload.amount > 100")
            .unwrap();

        let ev = event(json!({"flag": true, "amount": 5}));
        assert!(!evaluate(&expr, &ev, &ExecutionBudget::default()).unwrap());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        let ev = event(json!({"flag": true, "amount": 500}));
        assert!(evaluate(&expr, &ev, &ExecutionBudget::default()).unwrap());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        // The cheap comparison runs first and settles the OR.
        let expr = compiler
            .compile("expensive(payload.flag) == true OR payload.amount > 100")
            .unwrap();
        assert!(evaluate(&expr, &ev, &ExecutionBudget::default()).unwrap());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        let ev = event(json!({"flag": true, "amount": 5}));
        assert!(evaluate(&expr, &ev, &ExecutionBudget::default()).unwrap());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn test_evaluate_value() {
        let ev = event(json!({"name": "ada"}));
        let expr = Compiler::new().compile("upper(payload.name) == 'ADA'").unwrap();
        assert_eq!(
            evaluate_value(&expr, &ev, &ExecutionBudget::default()).unwrap(),
            Value::Bool(true)
        );
    }
}
