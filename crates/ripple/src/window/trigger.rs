#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerAction {
    Hold,
    Emit,
    Purge,
    EmitAndPurge,
}

impl TriggerAction {
    pub fn emits(self) -> bool {
        matches!(self, TriggerAction::Emit | TriggerAction::EmitAndPurge)
    }

    pub fn purges(self) -> bool {
        matches!(self, TriggerAction::Purge | TriggerAction::EmitAndPurge)
    }
}

/// Decides what happens to a window after an update and when it closes.
///
/// A closed window is always discarded afterwards; `on_close` only decides
/// whether its final result is emitted first.
pub trait Trigger<W> {
    fn on_update(&self, window: &W) -> TriggerAction;

    fn on_close(&self, window: &W) -> TriggerAction;

    /// Whether time windows should be closed by a scheduler deadline rather
    /// than lazily, when a later value moves the watermark past them.
    fn schedules_close(&self) -> bool;
}

/// Emit on every update, drop windows silently once closed.
#[derive(Clone, Copy, Debug, Default)]
pub struct EveryUpdate;

impl<W> Trigger<W> for EveryUpdate {
    fn on_update(&self, _window: &W) -> TriggerAction {
        TriggerAction::Emit
    }

    fn on_close(&self, _window: &W) -> TriggerAction {
        TriggerAction::Purge
    }

    fn schedules_close(&self) -> bool {
        false
    }
}

/// Emit each window once, when it closes.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnClose;

impl<W> Trigger<W> for OnClose {
    fn on_update(&self, _window: &W) -> TriggerAction {
        TriggerAction::Hold
    }

    fn on_close(&self, _window: &W) -> TriggerAction {
        TriggerAction::EmitAndPurge
    }

    fn schedules_close(&self) -> bool {
        true
    }
}

/// Emit on every update and stop accepting on-time values at the deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct EveryUpdateUntilClose;

impl<W> Trigger<W> for EveryUpdateUntilClose {
    fn on_update(&self, _window: &W) -> TriggerAction {
        TriggerAction::Emit
    }

    fn on_close(&self, _window: &W) -> TriggerAction {
        TriggerAction::Purge
    }

    fn schedules_close(&self) -> bool {
        true
    }
}
