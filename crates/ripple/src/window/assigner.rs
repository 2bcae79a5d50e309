use super::{CountWindow, TimeWindow, Window, WindowState};
use crate::schedule::Millis;
use crate::stream::StreamError;
use smallvec::SmallVec;

pub type Assigned<W> = SmallVec<[W; 2]>;

/// Maps a timestamped value plus the running [`WindowState`] to its target
/// windows and the next state.
pub trait TemporalWindowAssigner<T> {
    type Window: Window;

    fn assign(&self, value: &T, timestamp: Millis, state: WindowState) -> (Assigned<Self::Window>, WindowState);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TumblingWindows {
    size: Millis,
}

impl TumblingWindows {
    pub fn new(size: Millis) -> Result<Self, StreamError> {
        if size == 0 {
            return Err(StreamError::InvalidWindow("tumbling window size must be positive".into()));
        }
        Ok(Self { size })
    }
}

impl<T> TemporalWindowAssigner<T> for TumblingWindows {
    type Window = TimeWindow;

    fn assign(&self, _value: &T, timestamp: Millis, state: WindowState) -> (Assigned<TimeWindow>, WindowState) {
        let start = timestamp - timestamp % self.size;
        let window = TimeWindow {
            start,
            end: start.saturating_add(self.size),
        };
        (SmallVec::from_elem(window, 1), state.advance(timestamp))
    }
}

/// Overlapping windows of `size` starting every `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlidingWindows {
    size: Millis,
    step: Millis,
}

impl SlidingWindows {
    pub fn new(size: Millis, step: Millis) -> Result<Self, StreamError> {
        if size == 0 || step == 0 {
            return Err(StreamError::InvalidWindow("sliding window size and step must be positive".into()));
        }
        if step > size {
            return Err(StreamError::InvalidWindow(format!(
                "sliding window step {step} exceeds its size {size}"
            )));
        }
        Ok(Self { size, step })
    }
}

impl<T> TemporalWindowAssigner<T> for SlidingWindows {
    type Window = TimeWindow;

    fn assign(&self, _value: &T, timestamp: Millis, state: WindowState) -> (Assigned<TimeWindow>, WindowState) {
        let last = timestamp - timestamp % self.step;
        let mut windows = Assigned::new();
        let mut start = last;
        loop {
            if start.saturating_add(self.size) <= timestamp {
                break;
            }
            windows.push(TimeWindow {
                start,
                end: start.saturating_add(self.size),
            });
            if start < self.step {
                break;
            }
            start -= self.step;
        }
        // Oldest window first.
        windows.reverse();
        (windows, state.advance(timestamp))
    }
}

/// Windows over input positions: every `step` values a new window of `size`
/// values opens. `step == size` gives tumbling count windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountWindows {
    size: u64,
    step: u64,
}

impl CountWindows {
    pub fn tumbling(size: u64) -> Result<Self, StreamError> {
        Self::sliding(size, size)
    }

    pub fn sliding(size: u64, step: u64) -> Result<Self, StreamError> {
        if size == 0 || step == 0 {
            return Err(StreamError::InvalidWindow("count window size and step must be positive".into()));
        }
        if step > size {
            return Err(StreamError::InvalidWindow(format!(
                "count window step {step} exceeds its size {size}"
            )));
        }
        Ok(Self { size, step })
    }
}

impl<T> TemporalWindowAssigner<T> for CountWindows {
    type Window = CountWindow;

    fn assign(&self, _value: &T, timestamp: Millis, state: WindowState) -> (Assigned<CountWindow>, WindowState) {
        let position = state.position;
        let mut windows = Assigned::new();
        let mut first = position - position % self.step;
        loop {
            if first.saturating_add(self.size) <= position {
                break;
            }
            windows.push(CountWindow {
                first,
                size: self.size,
            });
            if first < self.step {
                break;
            }
            first -= self.step;
        }
        windows.reverse();
        (windows, state.advance(timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(windows: &[TimeWindow]) -> Vec<Millis> {
        windows.iter().map(|window| window.start).collect()
    }

    #[test]
    fn tumbling_windows_align_to_size() {
        let assigner = TumblingWindows::new(100).unwrap();
        let (windows, state) = TemporalWindowAssigner::<()>::assign(&assigner, &(), 250, WindowState::default());
        assert_eq!(windows.as_slice(), &[TimeWindow { start: 200, end: 300 }]);
        assert_eq!(state.watermark, 250);
        assert_eq!(state.position, 1);
    }

    #[test]
    fn windows_near_the_end_of_time_saturate() {
        let assigner = TumblingWindows::new(100).unwrap();
        let timestamp = Millis::MAX - 5;
        let (windows, _) = TemporalWindowAssigner::<()>::assign(&assigner, &(), timestamp, WindowState::default());
        let start = timestamp - timestamp % 100;
        assert_eq!(windows.as_slice(), &[TimeWindow { start, end: Millis::MAX }]);
        assert!(!windows[0].is_closed(&WindowState::default(), 10));
    }

    #[test]
    fn sliding_windows_overlap() {
        let assigner = SlidingWindows::new(100, 50).unwrap();
        let (windows, _) = TemporalWindowAssigner::<()>::assign(&assigner, &(), 120, WindowState::default());
        assert_eq!(starts(&windows), vec![50, 100]);

        let (windows, _) = TemporalWindowAssigner::<()>::assign(&assigner, &(), 20, WindowState::default());
        assert_eq!(starts(&windows), vec![0]);
    }

    #[test]
    fn count_windows_follow_positions() {
        let assigner = CountWindows::sliding(3, 2).unwrap();
        let mut state = WindowState::default();
        let mut firsts = Vec::new();
        for _ in 0..4 {
            let (windows, next) = TemporalWindowAssigner::<()>::assign(&assigner, &(), 0, state);
            firsts.push(windows.iter().map(|window| window.first).collect::<Vec<_>>());
            state = next;
        }
        assert_eq!(firsts, vec![vec![0], vec![0], vec![0, 2], vec![2]]);
    }

    #[test]
    fn empty_windows_are_rejected() {
        assert!(TumblingWindows::new(0).is_err());
        assert!(SlidingWindows::new(10, 20).is_err());
        assert!(CountWindows::tumbling(0).is_err());
    }
}
