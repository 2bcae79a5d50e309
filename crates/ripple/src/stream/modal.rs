//! Operators whose operation is switched by a control stream.
//!
//! Port 0 carries data, port 1 carries modes. A mode applies to every data
//! value delivered after it.

use super::flow::{Conduit, Emitter};
use super::{Combine, Expand, ModalOp, Transform};
use crate::state::ValuePersister;
use crate::value::Value;

pub(crate) const DATA_PORT: u8 = 0;
pub(crate) const CONTROL_PORT: u8 = 1;

enum Active {
    Transform(Transform),
    Combine(Combine),
    Expand(Expand),
}

pub(crate) struct ModalConduit {
    op: ModalOp,
    mode: Value,
    active: Active,
    aggregate: Option<Value>,
    mode_persister: Option<ValuePersister<Value>>,
    state_persister: Option<ValuePersister<Value>>,
}

impl ModalConduit {
    pub(crate) fn new(
        op: ModalOp,
        initial_mode: Value,
        mode_persister: Option<ValuePersister<Value>>,
        state_persister: Option<ValuePersister<Value>>,
    ) -> Self {
        let mode = mode_persister
            .as_ref()
            .and_then(ValuePersister::get)
            .unwrap_or(initial_mode);
        let stored = state_persister.as_ref().and_then(ValuePersister::get);
        let aggregate = match &op {
            ModalOp::Fold { initial, .. } => Some(stored.unwrap_or_else(|| initial.clone())),
            ModalOp::Reduce(_) => stored,
            ModalOp::Transform(_) | ModalOp::FlatMap(_) => None,
        };
        let active = select(&op, &mode);
        Self {
            op,
            mode,
            active,
            aggregate,
            mode_persister,
            state_persister,
        }
    }

    fn switch(&mut self, mode: &Value) {
        log::debug!("{} switches mode {} -> {mode}", self.op.name(), self.mode);
        self.mode = mode.clone();
        self.active = select(&self.op, mode);
        if let Some(persister) = &self.mode_persister {
            persister.set(mode);
        }
    }
}

fn select(op: &ModalOp, mode: &Value) -> Active {
    match op {
        ModalOp::Transform(select) => Active::Transform(select(mode)),
        ModalOp::Fold { select, .. } | ModalOp::Reduce(select) => Active::Combine(select(mode)),
        ModalOp::FlatMap(select) => Active::Expand(select(mode)),
    }
}

impl Conduit for ModalConduit {
    fn kind(&self) -> &'static str {
        self.op.name()
    }

    fn receive(&mut self, port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        if port == CONTROL_PORT {
            self.switch(value);
            return;
        }
        match &self.active {
            Active::Transform(f) => emitter.emit(f(value)),
            Active::Expand(f) => {
                for item in f(value) {
                    emitter.emit(item);
                }
            }
            Active::Combine(f) => {
                let next = match &self.aggregate {
                    Some(aggregate) => f(aggregate, value),
                    None => value.clone(),
                };
                if let Some(persister) = &self.state_persister {
                    persister.set(&next);
                }
                self.aggregate = Some(next.clone());
                emitter.emit(next);
            }
        }
    }
}
