use super::functions::{Function, Functions};
use super::{BinaryOp, UnaryOp};
use crate::graph::{Cell, Inputs};
use crate::value::Value;

/// Static value outlet.
pub struct ConstantCell {
    value: Value,
}

impl ConstantCell {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl Cell for ConstantCell {
    fn kind(&self) -> &'static str {
        "constant"
    }

    fn evaluate(&mut self, _inputs: &Inputs<'_>, _current: &Value) -> Value {
        self.value.clone()
    }
}

pub struct UnaryCell {
    op: UnaryOp,
}

impl UnaryCell {
    pub fn new(op: UnaryOp) -> Self {
        Self { op }
    }
}

impl Cell for UnaryCell {
    fn kind(&self) -> &'static str {
        "unary"
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        self.op.apply(inputs.get(0))
    }
}

pub struct BinaryCell {
    op: BinaryOp,
}

impl BinaryCell {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }
}

impl Cell for BinaryCell {
    fn kind(&self) -> &'static str {
        "binary"
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        self.op.apply(inputs.get(0), inputs.get(1))
    }
}

/// Inlets: condition, then, otherwise.
pub struct ConditionalCell;

impl Cell for ConditionalCell {
    fn kind(&self) -> &'static str {
        "conditional"
    }

    fn arity(&self) -> usize {
        3
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        if inputs.get(0).is_truthy() {
            inputs.get(1).clone()
        } else {
            inputs.get(2).clone()
        }
    }
}

/// Reactive lookup: inlet 0 is the key, inlet 1 the map it is looked up in.
pub struct GetCell;

impl Cell for GetCell {
    fn kind(&self) -> &'static str {
        "get"
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        inputs.get(1).get(inputs.get(0)).cloned().unwrap_or_default()
    }
}

enum Target {
    Resolved(Function),
    /// Function name arrives on inlet 0.
    Dynamic(Functions),
}

/// Function application over argument inlets.
pub struct InvokeCell {
    target: Target,
    arity: usize,
}

impl InvokeCell {
    pub fn resolved(function: Function, args: usize) -> Self {
        Self {
            target: Target::Resolved(function),
            arity: args,
        }
    }

    pub fn dynamic(functions: Functions, args: usize) -> Self {
        Self {
            target: Target::Dynamic(functions),
            arity: args + 1,
        }
    }
}

impl Cell for InvokeCell {
    fn kind(&self) -> &'static str {
        "invoke"
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        match &self.target {
            Target::Resolved(function) => {
                let args: Vec<Value> = inputs.iter().cloned().collect();
                function(&args)
            }
            Target::Dynamic(functions) => {
                let Some(function) = inputs.get(0).as_text().and_then(|name| functions.get(name)) else {
                    return Value::Absent;
                };
                let args: Vec<Value> = inputs.iter().skip(1).cloned().collect();
                function(&args)
            }
        }
    }
}
