use crate::value::Value;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type Function = Rc<dyn Fn(&[Value]) -> Value>;

/// Functions callable from compiled expressions, injected per scope.
#[derive(Clone)]
pub struct Functions {
    table: FxHashMap<Arc<str>, Function>,
}

impl Functions {
    /// A registry with no functions at all.
    pub fn empty() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    /// `abs`, `min`, `max`, `sum`, `len`.
    pub fn standard() -> Self {
        let mut functions = Self::empty();
        functions.register("abs", |args| {
            args.first()
                .and_then(Value::as_number)
                .map_or(Value::Absent, |n| Value::number(n.abs()))
        });
        functions.register("min", |args| fold_numbers(args, f64::min));
        functions.register("max", |args| fold_numbers(args, f64::max));
        functions.register("sum", |args| fold_numbers(args, |a, b| a + b));
        functions.register("len", |args| match args.first() {
            Some(Value::Text(text)) => Value::number(text.chars().count() as f64),
            Some(Value::Record(record)) => Value::number(record.len() as f64),
            _ => Value::Absent,
        });
        functions
    }

    pub fn register(&mut self, name: &str, function: impl Fn(&[Value]) -> Value + 'static) {
        self.table.insert(name.into(), Rc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        self.table.get(name).cloned()
    }
}

impl Default for Functions {
    fn default() -> Self {
        Self::standard()
    }
}

fn fold_numbers(args: &[Value], op: fn(f64, f64) -> f64) -> Value {
    let mut numbers = args.iter().map(Value::as_number);
    let Some(Some(first)) = numbers.next() else {
        return Value::Absent;
    };
    numbers
        .try_fold(first, |acc, n| n.map(|n| op(acc, n)))
        .map_or(Value::Absent, Value::number)
}
