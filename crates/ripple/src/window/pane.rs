use super::accumulators::WindowAccumulators;
use super::{Evaluator, Evictor, TemporalWindowAssigner, Trigger, Updater, Window, WindowState};
use crate::schedule::Millis;
use crate::state::ValuePersister;
use std::marker::PhantomData;

/// Accumulator pipeline with the accumulator type erased.
trait Panes<T, W, U> {
    /// Update, evict, evaluate.
    fn update(&mut self, window: &W, value: &T, timestamp: Millis, state: &WindowState) -> Option<U>;
    fn result(&self, window: &W) -> Option<U>;
    fn purge(&mut self, window: &W);
    fn windows(&self) -> Vec<W>;
    fn clear(&mut self);
}

struct Pipeline<T, W, Up: Updater<T>, Ev, Ex> {
    updater: Up,
    evictor: Ev,
    evaluator: Ex,
    accumulators: Box<dyn WindowAccumulators<W, Up::Acc>>,
    _value: PhantomData<fn(&T)>,
}

impl<T, W, U, Up, Ev, Ex> Panes<T, W, U> for Pipeline<T, W, Up, Ev, Ex>
where
    W: Window,
    Up: Updater<T>,
    Ev: Evictor<W, Up::Acc>,
    Ex: Evaluator<W, Up::Acc, Output = U>,
{
    fn update(&mut self, window: &W, value: &T, timestamp: Millis, state: &WindowState) -> Option<U> {
        let mut acc = self
            .accumulators
            .get(window)
            .unwrap_or_else(|| self.updater.create());
        // `state` is already advanced past this value.
        let position = state.position.saturating_sub(1);
        self.updater.update(&mut acc, value, timestamp, position);
        self.evictor.evict(window, &mut acc, state);
        let result = self.evaluator.evaluate(window, &acc);
        self.accumulators.put(window.clone(), acc);
        result
    }

    fn result(&self, window: &W) -> Option<U> {
        let acc = self.accumulators.get(window)?;
        self.evaluator.evaluate(window, &acc)
    }

    fn purge(&mut self, window: &W) {
        self.accumulators.remove(window);
    }

    fn windows(&self) -> Vec<W> {
        self.accumulators.windows()
    }

    fn clear(&mut self) {
        self.accumulators.clear();
    }
}

/// Window lifecycle for the values of one key.
pub struct PaneManager<T, W, U> {
    assigner: Box<dyn TemporalWindowAssigner<T, Window = W>>,
    trigger: Box<dyn Trigger<W>>,
    panes: Box<dyn Panes<T, W, U>>,
    state: WindowState,
    state_persister: Option<ValuePersister<WindowState>>,
    grace: Millis,
    new_deadlines: Vec<Millis>,
}

impl<T: 'static, W: Window + 'static, U: 'static> PaneManager<T, W, U> {
    pub fn new<G, Tr, Up, Ev, Ex>(
        assigner: G,
        trigger: Tr,
        updater: Up,
        evictor: Ev,
        evaluator: Ex,
        accumulators: Box<dyn WindowAccumulators<W, Up::Acc>>,
    ) -> Self
    where
        G: TemporalWindowAssigner<T, Window = W> + 'static,
        Tr: Trigger<W> + 'static,
        Up: Updater<T> + 'static,
        Ev: Evictor<W, Up::Acc> + 'static,
        Ex: Evaluator<W, Up::Acc, Output = U> + 'static,
    {
        Self {
            assigner: Box::new(assigner),
            trigger: Box::new(trigger),
            panes: Box::new(Pipeline {
                updater,
                evictor,
                evaluator,
                accumulators,
                _value: PhantomData,
            }),
            state: WindowState::default(),
            state_persister: None,
            grace: 0,
            new_deadlines: Vec::new(),
        }
    }

    /// Persist assigner state and pick up whatever was stored before.
    pub fn with_state_persister(mut self, persister: ValuePersister<WindowState>) -> Self {
        if let Some(state) = persister.get() {
            log::debug!("rehydrated window state {state:?} from {}", persister.tag());
            self.state = state;
        }
        self.state_persister = Some(persister);
        self
    }

    /// Extra time a window stays open past its end.
    pub fn with_grace(mut self, grace: Millis) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn windows(&self) -> Vec<W> {
        self.panes.windows()
    }

    pub fn result(&self, window: &W) -> Option<U> {
        self.panes.result(window)
    }

    /// Process one value and return the results the trigger released, in
    /// window order.
    pub fn process(&mut self, value: &T, timestamp: Millis) -> Vec<(W, U)> {
        let open_before = self.panes.windows();
        let progress = self.state;
        let (targets, state) = self.assigner.assign(value, timestamp, self.state);
        self.set_state(state);

        let mut emitted = Vec::new();
        for window in targets {
            // A window closes once; late values for it are dropped.
            if window.is_closed(&progress, self.grace) {
                log::debug!("dropping late value at {timestamp} for closed window {window:?}");
                continue;
            }
            if self.trigger.schedules_close() && !open_before.contains(&window) {
                if let Some(deadline) = window.deadline() {
                    self.new_deadlines.push(deadline.saturating_add(self.grace));
                }
            }
            let result = self.panes.update(&window, value, timestamp, &self.state);
            let action = self.trigger.on_update(&window);
            if action.emits() {
                if let Some(result) = result {
                    emitted.push((window.clone(), result));
                }
            }
            if action.purges() {
                self.panes.purge(&window);
            }
        }

        for window in self.panes.windows() {
            if window.is_closed(&self.state, self.grace) {
                self.close(window, &mut emitted);
            }
        }
        emitted
    }

    /// Close every window whose deadline plus grace has passed.
    pub fn close_due(&mut self, now: Millis) -> Vec<(W, U)> {
        let mut emitted = Vec::new();
        for window in self.panes.windows() {
            if window.deadline().is_some_and(|deadline| deadline.saturating_add(self.grace) <= now) {
                self.close(window, &mut emitted);
            }
        }
        emitted
    }

    /// Deadlines of windows opened since the last call.
    pub fn take_new_deadlines(&mut self) -> Vec<Millis> {
        std::mem::take(&mut self.new_deadlines)
    }

    /// Deadlines of every live window, for rescheduling after a restart.
    pub fn pending_deadlines(&self) -> Vec<Millis> {
        if !self.trigger.schedules_close() {
            return Vec::new();
        }
        self.panes
            .windows()
            .iter()
            .filter_map(|window| window.deadline())
            .map(|deadline| deadline.saturating_add(self.grace))
            .collect()
    }

    /// Drop every pane and the assigner state.
    pub fn clear(&mut self) {
        self.panes.clear();
        self.state = WindowState::default();
        if let Some(persister) = &self.state_persister {
            persister.clear();
        }
    }

    fn close(&mut self, window: W, emitted: &mut Vec<(W, U)>) {
        let action = self.trigger.on_close(&window);
        if action.emits() {
            if let Some(result) = self.panes.result(&window) {
                emitted.push((window.clone(), result));
            }
        }
        log::trace!("closing window {window:?} ({action:?})");
        self.panes.purge(&window);
    }

    fn set_state(&mut self, state: WindowState) {
        self.state = state;
        if let Some(persister) = &self.state_persister {
            persister.set(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{
        CountWindow, CountWindows, EveryUpdate, IdentityEvaluator, MapUpdater, NoOpEvictor, OnClose,
        ReduceUpdater, ReducingEvaluator, SequenceUpdater, Storage, ThresholdEvictor, TimeWindow,
        TumblingWindows, for_map_state, for_sequences_state, for_simple_state,
    };

    fn sum(a: &f64, b: &f64) -> f64 {
        a + b
    }

    #[test]
    fn count_windows_emit_on_close() {
        let mut panes = PaneManager::new(
            CountWindows::tumbling(2).unwrap(),
            OnClose,
            ReduceUpdater::new(sum),
            NoOpEvictor,
            IdentityEvaluator,
            for_simple_state::<CountWindow, f64>(&Storage::Transient),
        );
        assert!(panes.process(&1.0, 0).is_empty());
        assert_eq!(panes.process(&2.0, 0), vec![(CountWindow { first: 0, size: 2 }, 3.0)]);
        assert!(panes.windows().is_empty());
        assert!(panes.process(&5.0, 0).is_empty());
        assert_eq!(panes.windows(), vec![CountWindow { first: 2, size: 2 }]);
    }

    #[test]
    fn every_update_emits_running_results() {
        let mut panes = PaneManager::new(
            TumblingWindows::new(100).unwrap(),
            EveryUpdate,
            SequenceUpdater,
            NoOpEvictor,
            IdentityEvaluator,
            for_sequences_state::<TimeWindow, i64>(&Storage::Transient),
        );
        let window = TimeWindow { start: 0, end: 100 };
        assert_eq!(panes.process(&1, 10), vec![(window, vec![1])]);
        assert_eq!(panes.process(&2, 20), vec![(window, vec![1, 2])]);
        assert!(panes.take_new_deadlines().is_empty());

        // The watermark passing the end closes the window silently.
        let next = TimeWindow { start: 100, end: 200 };
        assert_eq!(panes.process(&3, 150), vec![(next, vec![3])]);
        assert_eq!(panes.windows(), vec![next]);
    }

    #[test]
    fn deadlines_close_time_windows() {
        let mut panes = PaneManager::new(
            TumblingWindows::new(100).unwrap(),
            OnClose,
            ReduceUpdater::new(sum),
            NoOpEvictor,
            IdentityEvaluator,
            for_simple_state::<TimeWindow, f64>(&Storage::Transient),
        )
        .with_grace(10);
        panes.process(&1.0, 10);
        panes.process(&2.0, 50);
        assert_eq!(panes.take_new_deadlines(), vec![110]);
        assert!(panes.take_new_deadlines().is_empty());
        assert_eq!(panes.pending_deadlines(), vec![110]);

        assert!(panes.close_due(109).is_empty());
        assert_eq!(panes.close_due(110), vec![(TimeWindow { start: 0, end: 100 }, 3.0)]);
        assert!(panes.windows().is_empty());
    }

    #[test]
    fn late_values_do_not_reopen_closed_windows() {
        let mut panes = PaneManager::new(
            TumblingWindows::new(100).unwrap(),
            OnClose,
            ReduceUpdater::new(sum),
            NoOpEvictor,
            IdentityEvaluator,
            for_simple_state::<TimeWindow, f64>(&Storage::Transient),
        );
        assert!(panes.process(&1.0, 10).is_empty());
        assert_eq!(
            panes.process(&2.0, 150),
            vec![(TimeWindow { start: 0, end: 100 }, 1.0)]
        );
        assert!(panes.process(&7.0, 50).is_empty());
        assert_eq!(panes.windows(), vec![TimeWindow { start: 100, end: 200 }]);
    }

    #[test]
    fn threshold_eviction_bounds_window_contents() {
        let mut panes = PaneManager::new(
            CountWindows::tumbling(10).unwrap(),
            EveryUpdate,
            MapUpdater::by_position(),
            ThresholdEvictor::most_recent(3),
            ReducingEvaluator::new(sum),
            for_map_state::<CountWindow, u64, f64>(&Storage::Transient),
        );
        let last = (1..=6)
            .map(|n| panes.process(&f64::from(n), 0))
            .last()
            .unwrap();
        assert_eq!(last[0].1, 4.0 + 5.0 + 6.0);
    }
}
