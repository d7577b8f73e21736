//! Asynchronous close.
//!
//! Closing is the only way to retire an OS handle: it runs on the loop
//! thread, removes any parked operation on the resource (completing it with
//! the cancellation error), retires the poller registration, closes the
//! descriptor, and only then completes — so the handle is gone before the
//! op-state becomes destructible. Closing twice is a bug and panics.

use std::sync::Arc;

use crate::event_loop::op::Operation;
use crate::event_loop::LoopShared;
use crate::exec::{OperationState, Receiver, Sender};

/// Resource that can retire its OS handle on the loop thread.
pub(crate) trait CloseableResource: Clone + Send + Sync + 'static {
    fn shared(&self) -> Arc<LoopShared>;
    /// Panics on double close.
    fn close_now(&self);
}

/// Sender closing a resource; completes with `()` once the handle is gone.
pub struct CloseSender<T> {
    resource: T,
}

impl<T> CloseSender<T> {
    pub(crate) fn new(resource: T) -> Self {
        Self { resource }
    }
}

struct CloseOp<T, R> {
    resource: T,
    receiver: R,
}

impl<T, R> OperationState for CloseOp<T, R>
where
    T: CloseableResource,
    R: Receiver<Value = ()>,
{
    fn start(self) {
        let shared = self.resource.shared();
        shared.submit(Box::new(self));
    }
}

impl<T, R> Operation for CloseOp<T, R>
where
    T: CloseableResource,
    R: Receiver<Value = ()>,
{
    fn apply(self: Box<Self>) {
        self.resource.close_now();
        self.receiver.set_value(());
    }
}

impl<T> Sender for CloseSender<T>
where
    T: CloseableResource,
{
    type Value = ();

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = ()>,
    {
        CloseOp {
            resource: self.resource,
            receiver,
        }
    }
}
