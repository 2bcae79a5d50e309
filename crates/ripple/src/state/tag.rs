use crate::form::Form;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique stream identifier minted by a binding context.
pub type StreamId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKind {
    Period,
    Mode,
    State,
}

impl StateKind {
    pub fn name(self) -> &'static str {
        match self {
            StateKind::Period => "period",
            StateKind::Mode => "mode",
            StateKind::State => "state",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "period" => Some(StateKind::Period),
            "mode" => Some(StateKind::Mode),
            "state" => Some(StateKind::State),
            _ => None,
        }
    }
}

/// Address of one persisted state instance.
///
/// Two live instances must never share a tag. Operators that keep more than
/// one piece of state under the same kind tell them apart with [`StateTag::slot`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateTag {
    pub element: StreamId,
    pub kind: StateKind,
    pub key: Option<Value>,
}

impl StateTag {
    pub fn new(element: StreamId, kind: StateKind) -> Self {
        Self {
            element,
            kind,
            key: None,
        }
    }

    pub fn period(element: StreamId) -> Self {
        Self::new(element, StateKind::Period)
    }

    pub fn mode(element: StreamId) -> Self {
        Self::new(element, StateKind::Mode)
    }

    pub fn state(element: StreamId) -> Self {
        Self::new(element, StateKind::State)
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// A named sub-slot, optionally scoped to a stream key:
    /// `{slot: name}` or `{slot: name, key: key}`.
    pub fn slot(self, name: &str, key: Option<&Value>) -> Self {
        let mut fields = vec![(Value::text("slot"), Value::text(name))];
        if let Some(key) = key {
            fields.push((Value::text("key"), key.clone()));
        }
        self.with_key(Value::record(fields))
    }
}

impl Form for StateTag {
    fn mold(&self) -> Value {
        let mut fields = vec![
            (Value::text("element"), Value::number(self.element as f64)),
            (Value::text("kind"), Value::text(self.kind.name())),
        ];
        if let Some(key) = &self.key {
            fields.push((Value::text("key"), key.clone()));
        }
        Value::record(fields)
    }

    fn cast(value: &Value) -> Option<Self> {
        let element = u64::cast(value.get(&"element".into())?)?;
        let kind = StateKind::from_name(value.get(&"kind".into())?.as_text()?)?;
        let key = value.get(&"key".into()).cloned();
        Some(Self { element, kind, key })
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.element, self.kind.name())?;
        if let Some(key) = &self.key {
            write!(f, "/{}", key.to_json())?;
        }
        Ok(())
    }
}
