//! Lowering from syntax tree to the immutable evaluation form.
//!
//! # Responsibilities
//! - Resolve field roots (`payload`, `headers`, `subject`, bound variables)
//! - Reject statically detectable type mismatches
//! - Fold constant sub-expressions (`duration("7d")` is resolved once)
//! - Order `AND`/`OR` operands so cheap checks run before regex and calls
//!
//! # Design Decisions
//! - The compiled tree is never mutated after construction and is
//!   `Send + Sync`; rules share it across routing workers without locks
//! - Reordering is stable and only groups operands by static cost; the
//!   evaluator falsifies failing operands locally, so order never changes
//!   the result

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::event::Event;
use crate::expr::ast::{Arg, CompareOp, Expr, PathExpr, PathSegment};
use crate::expr::error::{CompileError, EvalError};
use crate::expr::eval::{self, ExecutionBudget};
use crate::expr::functions::{Builtin, FunctionRegistry, HostFunction, Ty};
use crate::expr::glob::GlobPattern;
use crate::expr::parser::{parse, parse_path};
use crate::expr::value::Value;

const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Where a field path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoot {
    Payload,
    Headers,
    Subject,
    /// Variable bound by an enclosing quantifier, by nesting depth.
    Binding(usize),
}

/// A resolved field reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub root: FieldRoot,
    pub segments: Vec<PathSegment>,
}

impl FieldRef {
    /// Parse a path used by simple map filters and target templates.
    ///
    /// Paths not rooted at `payload`, `headers` or `subject` are read from
    /// the payload, so `region` and `payload.region` are equivalent.
    pub fn parse(src: &str) -> Result<Self, CompileError> {
        let path = parse_path(src.trim())?;
        let root = match path.root.as_str() {
            "payload" => FieldRoot::Payload,
            "headers" => FieldRoot::Headers,
            "subject" if path.segments.is_empty() => FieldRoot::Subject,
            _ => {
                let mut segments = vec![PathSegment::Key(path.root)];
                segments.extend(path.segments);
                return Ok(FieldRef {
                    root: FieldRoot::Payload,
                    segments,
                });
            }
        };
        Ok(FieldRef {
            root,
            segments: path.segments,
        })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            FieldRoot::Payload => f.write_str("payload")?,
            FieldRoot::Headers => f.write_str("headers")?,
            FieldRoot::Subject => f.write_str("subject")?,
            FieldRoot::Binding(slot) => write!(f, "${}", slot)?,
        }
        for seg in &self.segments {
            match seg {
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Any,
    All,
    Count,
}

impl QuantifierKind {
    pub fn name(&self) -> &'static str {
        match self {
            QuantifierKind::Any => "any",
            QuantifierKind::All => "all",
            QuantifierKind::Count => "count",
        }
    }
}

/// A node of the compiled evaluation tree.
#[derive(Debug, Clone)]
pub enum Node {
    Const(Value),
    Field(FieldRef),
    Neg(Box<Node>),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
    Compare {
        op: CompareOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Like {
        operand: Box<Node>,
        pattern: GlobPattern,
        negated: bool,
    },
    Matches {
        operand: Box<Node>,
        regex: Regex,
        negated: bool,
    },
    Between {
        operand: Box<Node>,
        low: Box<Node>,
        high: Box<Node>,
        negated: bool,
    },
    In {
        operand: Box<Node>,
        set: Vec<Value>,
        negated: bool,
    },
    Exists(FieldRef),
    IsNull {
        operand: Box<Node>,
        negated: bool,
    },
    Call {
        func: Builtin,
        args: Vec<Node>,
    },
    Host {
        func: HostFunction,
        args: Vec<Node>,
    },
    Quantifier {
        kind: QuantifierKind,
        collection: Box<Node>,
        slot: usize,
        predicate: Box<Node>,
    },
}

impl Node {
    /// Relative static cost used to order logical operands.
    pub fn cost(&self) -> u32 {
        match self {
            Node::Const(_) => 0,
            Node::Field(_) | Node::Exists(_) => 1,
            Node::IsNull { operand, .. } | Node::Neg(operand) | Node::Not(operand) => 1 + operand.cost(),
            Node::Compare { lhs, rhs, .. } => 2 + lhs.cost() + rhs.cost(),
            Node::In { operand, .. } => 3 + operand.cost(),
            Node::Between {
                operand, low, high, ..
            } => 3 + operand.cost() + low.cost() + high.cost(),
            Node::And(ops) | Node::Or(ops) => ops.iter().map(Node::cost).sum(),
            Node::Like { operand, .. } => 8 + operand.cost(),
            Node::Call { args, .. } => 10 + args.iter().map(Node::cost).sum::<u32>(),
            Node::Host { args, .. } => 25 + args.iter().map(Node::cost).sum::<u32>(),
            Node::Matches { operand, .. } => 30 + operand.cost(),
            Node::Quantifier {
                collection,
                predicate,
                ..
            } => 50 + collection.cost() + predicate.cost(),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + match self {
            Node::Const(_) | Node::Field(_) | Node::Exists(_) => 0,
            Node::Neg(n) | Node::Not(n) => n.node_count(),
            Node::IsNull { operand, .. }
            | Node::Like { operand, .. }
            | Node::Matches { operand, .. }
            | Node::In { operand, .. } => operand.node_count(),
            Node::And(ops) | Node::Or(ops) => ops.iter().map(Node::node_count).sum(),
            Node::Compare { lhs, rhs, .. } => lhs.node_count() + rhs.node_count(),
            Node::Between {
                operand, low, high, ..
            } => operand.node_count() + low.node_count() + high.node_count(),
            Node::Call { args, .. } | Node::Host { args, .. } => {
                args.iter().map(Node::node_count).sum()
            }
            Node::Quantifier {
                collection,
                predicate,
                ..
            } => collection.node_count() + predicate.node_count(),
        }
    }

    fn as_const(&self) -> Option<&Value> {
        match self {
            Node::Const(v) => Some(v),
            _ => None,
        }
    }

    /// A node whose direct inputs are all constants and whose result does
    /// not depend on the event or the clock.
    fn is_foldable(&self) -> bool {
        let konst = |n: &Node| matches!(n, Node::Const(_));
        match self {
            Node::Neg(n) | Node::Not(n) => konst(n),
            Node::Compare { lhs, rhs, .. } => konst(lhs) && konst(rhs),
            Node::Like { operand, .. }
            | Node::Matches { operand, .. }
            | Node::In { operand, .. }
            | Node::IsNull { operand, .. } => konst(operand),
            Node::Between {
                operand, low, high, ..
            } => konst(operand) && konst(low) && konst(high),
            Node::Call { func, args } => func.is_pure() && args.iter().all(konst),
            _ => false,
        }
    }
}

/// An immutable, compiled filter expression.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    root: Node,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// Evaluate against an event. See [`eval::evaluate`].
    pub fn evaluate(&self, event: &Event, budget: &ExecutionBudget) -> Result<bool, EvalError> {
        eval::evaluate(self, event, budget)
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles filter text using the built-ins plus any host functions.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    functions: FunctionRegistry,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn compile(&self, source: &str) -> Result<CompiledExpression, CompileError> {
        let ast = parse(source)?;
        let mut lowering = Lowering {
            functions: &self.functions,
            scope: Vec::new(),
        };
        let (root, ty) = lowering.lower(&ast)?;
        if ty.is_known() && ty != Ty::Bool {
            return Err(CompileError::type_error(
                ast.pos(),
                format!("filter must be a boolean expression, found {}", ty.name()),
            ));
        }
        Ok(CompiledExpression {
            source: source.to_string(),
            root,
        })
    }
}

struct Lowering<'c> {
    functions: &'c FunctionRegistry,
    scope: Vec<String>,
}

impl<'c> Lowering<'c> {
    fn lower(&mut self, expr: &Expr) -> Result<(Node, Ty), CompileError> {
        let pos = expr.pos();
        let node = match expr {
            Expr::Literal { value, .. } => return Ok((Node::Const(value.clone()), Ty::of(value))),
            Expr::Path(path) => {
                let field = self.resolve(path)?;
                let ty = match field.root {
                    FieldRoot::Subject => Ty::String,
                    _ => Ty::Any,
                };
                return Ok((Node::Field(field), ty));
            }
            Expr::Exists(path) => return Ok((Node::Exists(self.resolve(path)?), Ty::Bool)),
            Expr::Neg { operand, .. } => {
                let (inner, ty) = self.lower(operand)?;
                if ty.is_known() && !matches!(ty, Ty::Number | Ty::Duration) {
                    return Err(CompileError::type_error(pos, format!("cannot negate {}", ty.name())));
                }
                Node::Neg(Box::new(inner))
            }
            Expr::Not { operand, .. } => {
                let (inner, ty) = self.lower(operand)?;
                require_bool(&ty, operand.pos(), "NOT")?;
                Node::Not(Box::new(inner))
            }
            Expr::And(ops) => return self.lower_logical(ops, true),
            Expr::Or(ops) => return self.lower_logical(ops, false),
            Expr::Compare { op, lhs, rhs, .. } => {
                let (l, lt) = self.lower(lhs)?;
                let (r, rt) = self.lower(rhs)?;
                if op.is_ordering() {
                    check_ordered(pos, op.symbol(), lt, rt)?;
                }
                Node::Compare {
                    op: *op,
                    lhs: Box::new(l),
                    rhs: Box::new(r),
                }
            }
            Expr::Like {
                operand,
                pattern,
                negated,
                ..
            } => {
                let (inner, ty) = self.lower(operand)?;
                require_string(&ty, pos, "LIKE")?;
                Node::Like {
                    operand: Box::new(inner),
                    pattern: GlobPattern::new(pattern),
                    negated: *negated,
                }
            }
            Expr::Matches {
                operand,
                pattern,
                negated,
                ..
            } => {
                let (inner, ty) = self.lower(operand)?;
                require_string(&ty, pos, "MATCHES")?;
                let regex = RegexBuilder::new(&format!("^(?:{})$", pattern))
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| CompileError::syntax(pos, format!("invalid regex: {}", e)))?;
                Node::Matches {
                    operand: Box::new(inner),
                    regex,
                    negated: *negated,
                }
            }
            Expr::Between {
                operand,
                low,
                high,
                negated,
                ..
            } => {
                let (v, vt) = self.lower(operand)?;
                let (lo, lot) = self.lower(low)?;
                let (hi, hit) = self.lower(high)?;
                check_ordered(pos, "BETWEEN", vt, lot)?;
                check_ordered(pos, "BETWEEN", vt, hit)?;
                check_ordered(pos, "BETWEEN", lot, hit)?;
                Node::Between {
                    operand: Box::new(v),
                    low: Box::new(lo),
                    high: Box::new(hi),
                    negated: *negated,
                }
            }
            Expr::In {
                operand,
                set,
                negated,
                ..
            } => {
                let (inner, _) = self.lower(operand)?;
                let mut values = Vec::with_capacity(set.len());
                for item in set {
                    let (node, _) = self.lower(item)?;
                    match node {
                        Node::Const(v) => values.push(v),
                        _ => {
                            return Err(CompileError::type_error(
                                item.pos(),
                                "IN requires a set of literal values",
                            ))
                        }
                    }
                }
                Node::In {
                    operand: Box::new(inner),
                    set: values,
                    negated: *negated,
                }
            }
            Expr::IsNull {
                operand, negated, ..
            } => {
                let (inner, _) = self.lower(operand)?;
                Node::IsNull {
                    operand: Box::new(inner),
                    negated: *negated,
                }
            }
            Expr::Call { name, args, .. } => return self.lower_call(name, args, pos),
        };

        fold(node, pos)
    }

    fn lower_logical(&mut self, ops: &[Expr], is_and: bool) -> Result<(Node, Ty), CompileError> {
        let keyword = if is_and { "AND" } else { "OR" };
        let mut kept = Vec::with_capacity(ops.len());

        for op in ops {
            let (node, ty) = self.lower(op)?;
            require_bool(&ty, op.pos(), keyword)?;
            // A constant null evaluates as false. Identity operands drop out;
            // absorbing ones decide the result.
            let constant = match node.as_const() {
                Some(Value::Bool(b)) => Some(*b),
                Some(Value::Null) => Some(false),
                _ => None,
            };
            match constant {
                Some(b) if b == is_and => continue,
                Some(_) => return Ok((Node::Const(Value::Bool(!is_and)), Ty::Bool)),
                None => kept.push(node),
            }
        }

        if kept.is_empty() {
            return Ok((Node::Const(Value::Bool(is_and)), Ty::Bool));
        }
        kept.sort_by_key(Node::cost);
        let node = if is_and { Node::And(kept) } else { Node::Or(kept) };
        Ok((node, Ty::Bool))
    }

    fn lower_call(&mut self, name: &str, args: &[Arg], pos: usize) -> Result<(Node, Ty), CompileError> {
        let quantifier = match name {
            "any" => Some(QuantifierKind::Any),
            "all" => Some(QuantifierKind::All),
            "count" if args.len() == 2 => Some(QuantifierKind::Count),
            _ => None,
        };
        if let Some(kind) = quantifier {
            return self.lower_quantifier(kind, args, pos);
        }

        let mut nodes = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Expr(e) => {
                    let (node, ty) = self.lower(e)?;
                    nodes.push(node);
                    types.push(ty);
                }
                Arg::Lambda { pos, .. } => {
                    return Err(CompileError::syntax(
                        *pos,
                        format!("{}() does not take a predicate", name),
                    ))
                }
            }
        }

        if let Some(func) = Builtin::lookup(name) {
            let (min, max) = func.arity();
            if nodes.len() < min || max.is_some_and(|m| nodes.len() > m) {
                return Err(CompileError::type_error(
                    pos,
                    format!("{}() called with {} arguments", name, nodes.len()),
                ));
            }
            func.check_args(&types)
                .map_err(|msg| CompileError::type_error(pos, msg))?;
            let ty = func.return_type(&types);
            let (node, folded_ty) = fold(Node::Call { func, args: nodes }, pos)?;
            return Ok((node, if folded_ty == Ty::Any { ty } else { folded_ty }));
        }

        if let Some(func) = self.functions.get(name) {
            if nodes.len() != func.arity() {
                return Err(CompileError::type_error(
                    pos,
                    format!("{}() expects {} arguments, got {}", name, func.arity(), nodes.len()),
                ));
            }
            return Ok((
                Node::Host {
                    func: func.clone(),
                    args: nodes,
                },
                Ty::Any,
            ));
        }

        Err(CompileError::syntax(pos, format!("unknown function '{}'", name)))
    }

    fn lower_quantifier(
        &mut self,
        kind: QuantifierKind,
        args: &[Arg],
        pos: usize,
    ) -> Result<(Node, Ty), CompileError> {
        let (collection, param, body) = match args {
            [Arg::Expr(collection), Arg::Lambda { param, body, .. }] => (collection, param, body),
            _ => {
                return Err(CompileError::syntax(
                    pos,
                    format!("{}() expects (collection, x => predicate)", kind.name()),
                ))
            }
        };

        let (coll, coll_ty) = self.lower(collection)?;
        if coll_ty.is_known() && coll_ty != Ty::Array {
            return Err(CompileError::type_error(
                collection.pos(),
                format!("{}() needs an array, found {}", kind.name(), coll_ty.name()),
            ));
        }

        let slot = self.scope.len();
        self.scope.push(param.clone());
        let lowered = self.lower(body);
        self.scope.pop();
        let (predicate, pred_ty) = lowered?;
        require_bool(&pred_ty, body.pos(), kind.name())?;

        let ty = match kind {
            QuantifierKind::Count => Ty::Number,
            _ => Ty::Bool,
        };
        Ok((
            Node::Quantifier {
                kind,
                collection: Box::new(coll),
                slot,
                predicate: Box::new(predicate),
            },
            ty,
        ))
    }

    fn resolve(&self, path: &PathExpr) -> Result<FieldRef, CompileError> {
        let root = if let Some(slot) = self.scope.iter().rposition(|v| *v == path.root) {
            FieldRoot::Binding(slot)
        } else {
            match path.root.as_str() {
                "payload" => FieldRoot::Payload,
                "headers" => FieldRoot::Headers,
                "subject" => {
                    if !path.segments.is_empty() {
                        return Err(CompileError::type_error(path.pos, "subject has no fields"));
                    }
                    FieldRoot::Subject
                }
                other => {
                    return Err(CompileError::syntax(
                        path.pos,
                        format!(
                            "unknown identifier '{}'; fields start with payload, headers or subject",
                            other
                        ),
                    ))
                }
            }
        };
        Ok(FieldRef {
            root,
            segments: path.segments.clone(),
        })
    }
}

fn fold(node: Node, pos: usize) -> Result<(Node, Ty), CompileError> {
    if !node.is_foldable() {
        let ty = match &node {
            Node::Neg(inner) => match inner.as_const() {
                Some(v) => Ty::of(v),
                None => Ty::Any,
            },
            Node::Call { .. } | Node::Field(_) | Node::Host { .. } => Ty::Any,
            _ => Ty::Bool,
        };
        return Ok((node, ty));
    }
    let value = eval::evaluate_constant(&node)
        .map_err(|e| CompileError::type_error(pos, e.to_string()))?;
    let ty = Ty::of(&value);
    Ok((Node::Const(value), ty))
}

fn require_bool(ty: &Ty, pos: usize, context: &str) -> Result<(), CompileError> {
    if ty.is_known() && *ty != Ty::Bool {
        return Err(CompileError::type_error(
            pos,
            format!("{} expects a boolean operand, found {}", context, ty.name()),
        ));
    }
    Ok(())
}

fn require_string(ty: &Ty, pos: usize, context: &str) -> Result<(), CompileError> {
    if ty.is_known() && *ty != Ty::String {
        return Err(CompileError::type_error(
            pos,
            format!("{} applies to strings, found {}", context, ty.name()),
        ));
    }
    Ok(())
}

fn check_ordered(pos: usize, op: &str, left: Ty, right: Ty) -> Result<(), CompileError> {
    let bad = |t: Ty| t.is_known() && !t.is_ordered();
    if bad(left) || bad(right) || (left.is_known() && right.is_known() && left != right) {
        return Err(CompileError::type_error(
            pos,
            format!("cannot order {} against {} with '{}'", left.name(), right.name(), op),
        ));
    }
    Ok(())
}
