//! Result processors
//!
//! A [`ResultProcessor`] is a pure, synchronous conversion applied on the success
//! path of a task or batch. It is the only place in a decorator chain that can
//! introduce a new kind of failure (a malformed payload), kept apart from
//! task-execution failures such as network errors.

use crate::error::Result;
use std::marker::PhantomData;

/// Converts a successful value of type `T` into a value of type `R`
pub trait ResultProcessor<T, R>: Send + Sync {
    /// Convert the value, or explain why it cannot be converted
    fn process(&self, value: T) -> Result<R>;
}

impl<T, R, F> ResultProcessor<T, R> for F
where
    F: Fn(T) -> Result<R> + Send + Sync,
{
    fn process(&self, value: T) -> Result<R> {
        self(value)
    }
}

/// Two processors applied one after the other
///
/// Built with [`ProcessorExt::then`].
pub struct Chain<P1, P2, M> {
    first: P1,
    second: P2,
    _middle: PhantomData<fn() -> M>,
}

impl<T, M, R, P1, P2> ResultProcessor<T, R> for Chain<P1, P2, M>
where
    P1: ResultProcessor<T, M>,
    P2: ResultProcessor<M, R>,
{
    fn process(&self, value: T) -> Result<R> {
        let middle = self.first.process(value)?;
        self.second.process(middle)
    }
}

/// Composition helpers for processors
pub trait ProcessorExt<T, M>: ResultProcessor<T, M> + Sized {
    /// Feed the output of this processor into `next`
    fn then<R, P>(self, next: P) -> Chain<Self, P, M>
    where
        P: ResultProcessor<M, R>,
    {
        Chain {
            first: self,
            second: next,
            _middle: PhantomData,
        }
    }
}

impl<T, M, P> ProcessorExt<T, M> for P where P: ResultProcessor<T, M> {}
