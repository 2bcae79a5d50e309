use std::collections::BTreeMap;
use std::rc::Rc;

/// Derives a window's result from its accumulator. `None` means the window
/// has nothing to report yet.
pub trait Evaluator<W, A> {
    type Output;

    fn evaluate(&self, window: &W, acc: &A) -> Option<Self::Output>;
}

/// The accumulator is the result.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityEvaluator;

impl<W, T: Clone> Evaluator<W, Option<T>> for IdentityEvaluator {
    type Output = T;

    fn evaluate(&self, _window: &W, acc: &Option<T>) -> Option<T> {
        acc.clone()
    }
}

impl<W, T: Clone> Evaluator<W, Vec<T>> for IdentityEvaluator {
    type Output = Vec<T>;

    fn evaluate(&self, _window: &W, acc: &Vec<T>) -> Option<Vec<T>> {
        Some(acc.clone())
    }
}

impl<W, K: Clone, T: Clone> Evaluator<W, BTreeMap<K, T>> for IdentityEvaluator {
    type Output = BTreeMap<K, T>;

    fn evaluate(&self, _window: &W, acc: &BTreeMap<K, T>) -> Option<BTreeMap<K, T>> {
        Some(acc.clone())
    }
}

/// Re-folds the entries that survived eviction, in criterion order.
pub struct ReducingEvaluator<T> {
    op: Rc<dyn Fn(&T, &T) -> T>,
}

impl<T> ReducingEvaluator<T> {
    pub fn new(op: impl Fn(&T, &T) -> T + 'static) -> Self {
        Self { op: Rc::new(op) }
    }
}

impl<T> Clone for ReducingEvaluator<T> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
        }
    }
}

impl<W, K, T: Clone> Evaluator<W, BTreeMap<K, T>> for ReducingEvaluator<T> {
    type Output = T;

    fn evaluate(&self, _window: &W, acc: &BTreeMap<K, T>) -> Option<T> {
        let mut values = acc.values();
        let first = values.next()?.clone();
        Some(values.fold(first, |total, value| (self.op)(&total, value)))
    }
}

/// Arbitrary function over the materialized window contents.
pub struct WindowFunction<W, A, U> {
    function: Rc<dyn Fn(&W, &A) -> Option<U>>,
}

impl<W, A, U> WindowFunction<W, A, U> {
    pub fn new(function: impl Fn(&W, &A) -> Option<U> + 'static) -> Self {
        Self {
            function: Rc::new(function),
        }
    }
}

impl<W, A, U> Clone for WindowFunction<W, A, U> {
    fn clone(&self) -> Self {
        Self {
            function: self.function.clone(),
        }
    }
}

impl<W, A, U> Evaluator<W, A> for WindowFunction<W, A, U> {
    type Output = U;

    fn evaluate(&self, window: &W, acc: &A) -> Option<U> {
        (self.function)(window, acc)
    }
}
