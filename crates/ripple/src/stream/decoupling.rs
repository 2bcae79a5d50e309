//! Emission cadence control between a producer and its consumers.

use super::DecouplingMode;
use super::flow::{Conduit, Emitter};
use crate::schedule::{Millis, TimerId};
use crate::state::ValuePersister;
use crate::value::Value;

pub(crate) const PERIOD_PORT: u8 = 1;

pub(crate) struct DecoupleConduit {
    mode: DecouplingMode,
    period: Millis,
    period_persister: Option<ValuePersister<u64>>,
    pending: Option<Value>,
    timer: Option<TimerId>,
}

impl DecoupleConduit {
    pub(crate) fn new(mode: DecouplingMode, period: Millis, period_persister: Option<ValuePersister<u64>>) -> Self {
        let period = period_persister
            .as_ref()
            .and_then(ValuePersister::get)
            .filter(|period| *period > 0)
            .unwrap_or(period);
        Self {
            mode,
            period,
            period_persister,
            pending: None,
            timer: None,
        }
    }

    fn set_period(&mut self, value: &Value) {
        match value.as_number() {
            Some(period) if period >= 1.0 => {
                self.period = period as Millis;
                if let Some(persister) = &self.period_persister {
                    persister.set(&self.period);
                }
            }
            _ => log::warn!("ignoring decoupling period {value}"),
        }
    }
}

impl Conduit for DecoupleConduit {
    fn kind(&self) -> &'static str {
        "decouple"
    }

    fn receive(&mut self, port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        if port == PERIOD_PORT {
            self.set_period(value);
            return;
        }
        match self.mode {
            DecouplingMode::Discrete => {
                self.pending = Some(value.clone());
                if self.timer.is_none() {
                    self.timer = Some(emitter.schedule(self.period));
                }
            }
            DecouplingMode::Continuous => {
                if self.timer.is_none() {
                    emitter.emit(value.clone());
                    self.timer = Some(emitter.schedule(self.period));
                } else {
                    self.pending = Some(value.clone());
                }
            }
        }
    }

    fn on_timer(&mut self, timer: TimerId, emitter: &mut Emitter<'_>) {
        if self.timer != Some(timer) {
            return;
        }
        self.timer = None;
        // Keep ticking only while there is something to deliver.
        if let Some(value) = self.pending.take() {
            emitter.emit(value);
            self.timer = Some(emitter.schedule(self.period));
        }
    }
}
