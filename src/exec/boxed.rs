//! Type-erased senders and receivers.
//!
//! Erasure is what makes iterative chains expressible: a closure that keeps
//! re-entering itself through `let_value` would otherwise build an
//! infinitely recursive sender type. `BoxSender` flattens each round.

use crate::error::Error;
use crate::exec::sender::{Env, OperationState, Receiver, Sender};

trait DynReceiver<V>: Send {
    fn dyn_value(self: Box<Self>, value: V);
    fn dyn_error(self: Box<Self>, error: Error);
    fn dyn_stopped(self: Box<Self>);
    fn dyn_env(&self) -> Env;
}

impl<R: Receiver> DynReceiver<R::Value> for R {
    fn dyn_value(self: Box<Self>, value: R::Value) {
        (*self).set_value(value);
    }

    fn dyn_error(self: Box<Self>, error: Error) {
        (*self).set_error(error);
    }

    fn dyn_stopped(self: Box<Self>) {
        (*self).set_stopped();
    }

    fn dyn_env(&self) -> Env {
        self.env()
    }
}

/// A boxed receiver with the value type as its only static surface.
pub struct BoxReceiver<V> {
    inner: Box<dyn DynReceiver<V>>,
}

impl<V: Send + 'static> Receiver for BoxReceiver<V> {
    type Value = V;

    fn set_value(self, value: V) {
        self.inner.dyn_value(value);
    }

    fn set_error(self, error: Error) {
        self.inner.dyn_error(error);
    }

    fn set_stopped(self) {
        self.inner.dyn_stopped();
    }

    fn env(&self) -> Env {
        self.inner.dyn_env()
    }
}

type ConnectFn<V> = Box<dyn FnOnce(BoxReceiver<V>) + Send>;

/// A boxed sender. Created with [`SenderExt::boxed`](crate::SenderExt::boxed).
pub struct BoxSender<V> {
    connect_fn: ConnectFn<V>,
}

impl<V: Send + 'static> BoxSender<V> {
    pub(crate) fn new<S>(sender: S) -> Self
    where
        S: Sender<Value = V>,
    {
        Self {
            connect_fn: Box::new(move |receiver| sender.connect(receiver).start()),
        }
    }
}

struct BoxOp<V, R> {
    connect_fn: ConnectFn<V>,
    receiver: R,
}

impl<V, R> OperationState for BoxOp<V, R>
where
    V: Send + 'static,
    R: Receiver<Value = V>,
{
    fn start(self) {
        (self.connect_fn)(BoxReceiver {
            inner: Box::new(self.receiver),
        });
    }
}

impl<V: Send + 'static> Sender for BoxSender<V> {
    type Value = V;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = V>,
    {
        BoxOp {
            connect_fn: self.connect_fn,
            receiver,
        }
    }
}
