//! Piping: algorithms with their arguments bound, awaiting a predecessor.
//!
//! [`SenderClosure`] is the closure form of an algorithm: applying it to a
//! sender (via [`SenderExt::pipe`](crate::SenderExt::pipe)) prepends that
//! sender as the algorithm's input. Any `Sender<Value = ()>` is itself a
//! closure — piping onto it simply sequences — which is what lets chains
//! read `schedule.pipe(accept).pipe(receive(...)).pipe(close)`.

use std::marker::PhantomData;

use crate::error::Error;
use crate::exec::{Env, OperationState, Receiver, Sender};

/// An algorithm with only its arguments bound. `V` is the value type it
/// consumes from its predecessor.
pub trait SenderClosure<V: Send + 'static>: Send + 'static {
    /// The sender produced once a predecessor is attached.
    type Output<S: Sender<Value = V>>: Sender;

    /// Prepends `prev` as this algorithm's input.
    fn pipe_from<S: Sender<Value = V>>(self, prev: S) -> Self::Output<S>;
}

/// Every unit sender is a closure: piping onto it sequences it after the
/// predecessor's value completion.
impl<C: Sender> SenderClosure<()> for C {
    type Output<S: Sender<Value = ()>> = Piped<S, C>;

    fn pipe_from<S: Sender<Value = ()>>(self, prev: S) -> Piped<S, C> {
        Piped { prev, next: self }
    }
}

/// `prev` then `next`, propagating errors and stops.
pub struct Piped<S, C> {
    prev: S,
    next: C,
}

impl<S, C> Sender for Piped<S, C>
where
    S: Sender<Value = ()>,
    C: Sender,
{
    type Value = C::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = C::Value>,
    {
        self.prev.connect(PipedReceiver {
            next: self.next,
            receiver,
        })
    }
}

struct PipedReceiver<C, R> {
    next: C,
    receiver: R,
}

impl<C, R> Receiver for PipedReceiver<C, R>
where
    C: Sender,
    R: Receiver<Value = C::Value>,
{
    type Value = ();

    fn set_value(self, (): ()) {
        self.next.connect(self.receiver).start();
    }

    fn set_error(self, error: Error) {
        self.receiver.set_error(error);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}

/// Kernel of a value-consuming algorithm closure: turns the predecessor's
/// value into the algorithm's sender.
pub trait ApplyValue<V: Send + 'static>: Send + 'static {
    /// Sender realizing the algorithm for one input value.
    type Out: Sender;

    /// Builds the algorithm sender from the input value.
    fn apply(self, value: V) -> Self::Out;
}

/// `prev`'s value fed into an algorithm kernel.
pub struct PipedWith<S, K> {
    prev: S,
    kernel: K,
}

impl<S, K> PipedWith<S, K> {
    pub(crate) fn new(prev: S, kernel: K) -> Self {
        Self { prev, kernel }
    }
}

impl<S, K> Sender for PipedWith<S, K>
where
    S: Sender,
    K: ApplyValue<S::Value>,
{
    type Value = <K::Out as Sender>::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = Self::Value>,
    {
        self.prev.connect(KernelReceiver {
            kernel: self.kernel,
            receiver,
            _marker: PhantomData,
        })
    }
}

struct KernelReceiver<K, R, V> {
    kernel: K,
    receiver: R,
    _marker: PhantomData<fn(V)>,
}

impl<K, R, V> Receiver for KernelReceiver<K, R, V>
where
    V: Send + 'static,
    K: ApplyValue<V>,
    R: Receiver<Value = <K::Out as Sender>::Value>,
{
    type Value = V;

    fn set_value(self, value: V) {
        self.kernel.apply(value).connect(self.receiver).start();
    }

    fn set_error(self, error: Error) {
        self.receiver.set_error(error);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}
