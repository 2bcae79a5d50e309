//! Dynamic value expressions and their compilation into outlet graphs.
//!
//! Constants become static value outlets; every operator and selector kind
//! maps to one dedicated cell whose inlets bind to the compiled operands.
//! `$a` (a `get` with a constant key) binds statically to the field outlet of
//! the current scope; `$[$k]` (a dynamic key) produces a lookup cell that
//! re-resolves whenever the key changes.

mod cells;
mod functions;
mod parser;

pub use cells::{BinaryCell, ConditionalCell, ConstantCell, GetCell, InvokeCell, UnaryCell};
pub use functions::{Function, Functions};
pub use parser::{ParseError, parse};

use crate::arena::SlotId;
use crate::graph::{Graph, InletRef};
use crate::value::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Value),
    Selector(Selector),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Invoke {
        function: Box<Expr>,
        args: Vec<Expr>,
    },
}

/// Path into the scope. `Get` chains through `then`; the remaining kinds
/// are part of the expression language but cannot be compiled.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    Identity,
    Get {
        key: Box<Expr>,
        then: Box<Selector>,
    },
    GetAttr(Value),
    GetItem(Value),
    Keys,
    Values,
    Children,
    Descendants,
    Filter(Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negative,
    Positive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
}

impl UnaryOp {
    pub fn apply(self, operand: &Value) -> Value {
        match self {
            UnaryOp::Not => operand.not(),
            UnaryOp::Negative => operand.negative(),
            UnaryOp::Positive => operand.positive(),
        }
    }
}

impl BinaryOp {
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        match self {
            BinaryOp::Or => {
                if lhs.is_truthy() {
                    lhs.clone()
                } else {
                    rhs.clone()
                }
            }
            BinaryOp::And => {
                if lhs.is_truthy() {
                    rhs.clone()
                } else {
                    lhs.clone()
                }
            }
            BinaryOp::Lt => lhs.compare(rhs, |o| o.is_lt()),
            BinaryOp::Le => lhs.compare(rhs, |o| o.is_le()),
            BinaryOp::Eq => Value::Bool(lhs == rhs),
            BinaryOp::Ne => Value::Bool(lhs != rhs),
            BinaryOp::Ge => lhs.compare(rhs, |o| o.is_ge()),
            BinaryOp::Gt => lhs.compare(rhs, |o| o.is_gt()),
            BinaryOp::Plus => lhs.plus(rhs),
            BinaryOp::Minus => lhs.minus(rhs),
            BinaryOp::Times => lhs.times(rhs),
            BinaryOp::Divide => lhs.divide(rhs),
            BinaryOp::Modulo => lhs.modulo(rhs),
        }
    }
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// `$key`
    pub fn get(key: impl Into<Value>) -> Self {
        Expr::Selector(Selector::path([Expr::constant(key)]))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn conditional(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn invoke(name: &str, args: Vec<Expr>) -> Self {
        Expr::Invoke {
            function: Box::new(Expr::constant(name)),
            args,
        }
    }
}

impl Selector {
    /// Nested `Get`s, outermost key first.
    pub fn path(keys: impl IntoIterator<Item = Expr>) -> Self {
        let keys: Vec<Expr> = keys.into_iter().collect();
        keys.into_iter().rev().fold(Selector::Identity, |then, key| Selector::Get {
            key: Box::new(key),
            then: Box::new(then),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Selector::Identity => "identity",
            Selector::Get { .. } => "get",
            Selector::GetAttr(_) => "getAttr",
            Selector::GetItem(_) => "getItem",
            Selector::Keys => "keys",
            Selector::Values => "values",
            Selector::Children => "children",
            Selector::Descendants => "descendants",
            Selector::Filter(_) => "filter",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The selector kind has no compiled form.
    Unsupported(&'static str),
    /// A constant function name not present in the registry.
    UnknownFunction(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Unsupported(kind) => write!(f, "unsupported selector: {kind}"),
            CompileError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile `expr` against `scope` into a wired outlet graph and return its
/// root outlet. Nodes created for the expression are owned by the root; on
/// error they are disposed again.
pub fn compile(
    graph: &mut Graph,
    expr: &Expr,
    scope: SlotId,
    functions: &Functions,
) -> Result<SlotId, CompileError> {
    let mut compiler = Compiler {
        graph,
        scope,
        functions,
        created: Vec::new(),
    };
    match compiler.expr(expr) {
        Ok(root) => {
            let created = std::mem::take(&mut compiler.created);
            // A root that is a field proxy of a created node sits below it in
            // the ownership tree; lift it so it owns the whole chain.
            let mut chain = Vec::new();
            let mut current = compiler.graph.owner(root);
            while let Some(owner) = current {
                chain.push(owner);
                current = compiler.graph.owner(owner);
            }
            match chain.iter().rposition(|node| created.contains(node)) {
                Some(top) => {
                    chain.truncate(top + 1);
                    compiler.graph.disown(root);
                    for node in &chain {
                        compiler.graph.disown(*node);
                    }
                    chain.retain(|node| !created.contains(node));
                }
                None => chain.clear(),
            }
            for node in created.into_iter().chain(chain).filter(|node| *node != root) {
                compiler.graph.adopt(root, node);
            }
            Ok(root)
        }
        Err(error) => {
            for node in std::mem::take(&mut compiler.created) {
                compiler.graph.dispose(node);
            }
            Err(error)
        }
    }
}

struct Compiler<'a> {
    graph: &'a mut Graph,
    scope: SlotId,
    functions: &'a Functions,
    created: Vec<SlotId>,
}

impl Compiler<'_> {
    fn expr(&mut self, expr: &Expr) -> Result<SlotId, CompileError> {
        match expr {
            Expr::Constant(value) => Ok(self.node(ConstantCell::new(value.clone()), &[])),
            Expr::Selector(selector) => self.selector(selector, self.scope),
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                Ok(self.node(UnaryCell::new(*op), &[operand]))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                Ok(self.node(BinaryCell::new(*op), &[lhs, rhs]))
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr(condition)?;
                let then = self.expr(then)?;
                let otherwise = self.expr(otherwise)?;
                Ok(self.node(ConditionalCell, &[condition, then, otherwise]))
            }
            Expr::Invoke { function, args } => {
                let mut operands = Vec::with_capacity(args.len());
                for arg in args {
                    operands.push(self.expr(arg)?);
                }
                match function.as_ref() {
                    Expr::Constant(name) => {
                        let resolved = name
                            .as_text()
                            .and_then(|text| self.functions.get(text))
                            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;
                        Ok(self.node(InvokeCell::resolved(resolved, args.len()), &operands))
                    }
                    dynamic => {
                        let function = self.expr(dynamic)?;
                        operands.insert(0, function);
                        Ok(self.node(InvokeCell::dynamic(self.functions.clone(), args.len()), &operands))
                    }
                }
            }
        }
    }

    fn selector(&mut self, selector: &Selector, scope: SlotId) -> Result<SlotId, CompileError> {
        match selector {
            Selector::Identity => Ok(scope),
            Selector::Get { key, then } => {
                let target = match key.as_ref() {
                    Expr::Constant(key) => self
                        .graph
                        .key_outlet(scope, key.clone())
                        .ok_or(CompileError::Unsupported("get on a disposed scope"))?,
                    dynamic => {
                        let key = self.expr(dynamic)?;
                        self.node(GetCell, &[key, scope])
                    }
                };
                self.selector(then, target)
            }
            unsupported => Err(CompileError::Unsupported(unsupported.name())),
        }
    }

    fn node(&mut self, cell: impl crate::graph::Cell + 'static, operands: &[SlotId]) -> SlotId {
        let id = self.graph.insert(cell);
        for (port, operand) in operands.iter().enumerate() {
            self.graph.bind(InletRef::new(id, port as u8), *operand);
        }
        self.created.push(id);
        id
    }
}
