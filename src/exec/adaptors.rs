//! Sender combinators.
//!
//! Every combinator follows the same shape: `connect` wraps the downstream
//! receiver and defers to the child sender, so the op-state is whatever the
//! child produces. User closures are fenced with `catch_user` so a panic
//! surfaces on the error channel instead of unwinding through the loop.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{Error, PanicPayload};
use crate::exec::sender::{Completion, Env, OperationState, Receiver, Sender};
use crate::stop::StopToken;

/// Runs a user closure, converting a panic into [`Error::Panic`].
pub(crate) fn catch_user<T>(f: impl FnOnce() -> T) -> Result<T, Error> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|p| Error::Panic(PanicPayload::from_any(p)))
}

/// Sender that completes immediately with a value.
pub struct Just<V> {
    value: V,
}

/// Creates a sender that delivers `value` as soon as it is started.
pub fn just<V: Send + 'static>(value: V) -> Just<V> {
    Just { value }
}

struct JustOp<V, R> {
    value: V,
    receiver: R,
}

impl<V: Send + 'static, R: Receiver<Value = V>> OperationState for JustOp<V, R> {
    fn start(self) {
        self.receiver.set_value(self.value);
    }
}

impl<V: Send + 'static> Sender for Just<V> {
    type Value = V;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = V>,
    {
        JustOp {
            value: self.value,
            receiver,
        }
    }
}

/// Sender that completes immediately with an error.
pub struct Fail<V> {
    error: Error,
    _marker: PhantomData<fn() -> V>,
}

/// Creates a sender that delivers `error` as soon as it is started.
pub fn fail<V: Send + 'static>(error: Error) -> Fail<V> {
    Fail {
        error,
        _marker: PhantomData,
    }
}

struct FailOp<V, R> {
    error: Error,
    receiver: R,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Send + 'static, R: Receiver<Value = V>> OperationState for FailOp<V, R> {
    fn start(self) {
        self.receiver.set_error(self.error);
    }
}

impl<V: Send + 'static> Sender for Fail<V> {
    type Value = V;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = V>,
    {
        FailOp {
            error: self.error,
            receiver,
            _marker: PhantomData,
        }
    }
}

/// Maps the value channel through a closure. See [`SenderExt::then`].
pub struct Then<S, F> {
    sender: S,
    f: F,
}

struct ThenReceiver<F, R, V1> {
    f: F,
    receiver: R,
    _marker: PhantomData<fn(V1)>,
}

impl<F, R, V1, V2> Receiver for ThenReceiver<F, R, V1>
where
    V1: Send + 'static,
    V2: Send + 'static,
    F: FnOnce(V1) -> V2 + Send + 'static,
    R: Receiver<Value = V2>,
{
    type Value = V1;

    fn set_value(self, value: V1) {
        match catch_user(move || (self.f)(value)) {
            Ok(mapped) => self.receiver.set_value(mapped),
            Err(e) => self.receiver.set_error(e),
        }
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

impl<S, F, V2> Sender for Then<S, F>
where
    S: Sender,
    F: FnOnce(S::Value) -> V2 + Send + 'static,
    V2: Send + 'static,
{
    type Value = V2;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = V2>,
    {
        self.sender.connect(ThenReceiver {
            f: self.f,
            receiver,
            _marker: PhantomData,
        })
    }
}

/// Continues the chain with a sender produced from the value.
/// See [`SenderExt::let_value`].
pub struct LetValue<S, F> {
    sender: S,
    f: F,
}

struct LetValueReceiver<F, R, V1> {
    f: F,
    receiver: R,
    _marker: PhantomData<fn(V1)>,
}

impl<F, R, V1, S2> Receiver for LetValueReceiver<F, R, V1>
where
    V1: Send + 'static,
    S2: Sender,
    F: FnOnce(V1) -> S2 + Send + 'static,
    R: Receiver<Value = S2::Value>,
{
    type Value = V1;

    fn set_value(self, value: V1) {
        match catch_user(move || (self.f)(value)) {
            Ok(next) => next.connect(self.receiver).start(),
            Err(e) => self.receiver.set_error(e),
        }
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

impl<S, F, S2> Sender for LetValue<S, F>
where
    S: Sender,
    S2: Sender,
    F: FnOnce(S::Value) -> S2 + Send + 'static,
{
    type Value = S2::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = S2::Value>,
    {
        self.sender.connect(LetValueReceiver {
            f: self.f,
            receiver,
            _marker: PhantomData,
        })
    }
}

/// Recovers from the error channel by mapping the error to a value.
/// See [`SenderExt::upon_error`].
pub struct UponError<S, F> {
    sender: S,
    f: F,
}

struct UponErrorReceiver<F, R> {
    f: F,
    receiver: R,
}

impl<F, R, V> Receiver for UponErrorReceiver<F, R>
where
    V: Send + 'static,
    F: FnOnce(Error) -> V + Send + 'static,
    R: Receiver<Value = V>,
{
    type Value = V;

    fn set_value(self, value: V) {
        self.receiver.set_value(value);
    }

    fn set_error(self, error: Error) {
        match catch_user(move || (self.f)(error)) {
            Ok(mapped) => self.receiver.set_value(mapped),
            Err(e) => self.receiver.set_error(e),
        }
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}

impl<S, F> Sender for UponError<S, F>
where
    S: Sender,
    F: FnOnce(Error) -> S::Value + Send + 'static,
{
    type Value = S::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = S::Value>,
    {
        self.sender.connect(UponErrorReceiver {
            f: self.f,
            receiver,
        })
    }
}

/// Runs a cleanup sender after the body, then re-emits the body's
/// completion. The cleanup runs on every exit path and cannot be stopped;
/// a cleanup failure replaces the saved disposition.
/// See [`SenderExt::finally`].
pub struct Finally<S, C> {
    sender: S,
    cleanup: C,
}

struct FinallyReceiver<C, R, V> {
    cleanup: C,
    receiver: R,
    _marker: PhantomData<fn(V)>,
}

impl<C, R, V> FinallyReceiver<C, R, V>
where
    V: Send + 'static,
    C: Sender<Value = ()>,
    R: Receiver<Value = V>,
{
    fn run_cleanup(self, saved: Completion<V>) {
        self.cleanup
            .connect(CleanupReceiver {
                saved,
                receiver: self.receiver,
            })
            .start();
    }
}

impl<C, R, V> Receiver for FinallyReceiver<C, R, V>
where
    V: Send + 'static,
    C: Sender<Value = ()>,
    R: Receiver<Value = V>,
{
    type Value = V;

    fn set_value(self, value: V) {
        self.run_cleanup(Completion::Value(value));
    }

    fn set_error(self, error: Error) {
        self.run_cleanup(Completion::Error(error));
    }

    fn set_stopped(self) {
        self.run_cleanup(Completion::Stopped);
    }

    fn env(&self) -> Env {
        self.receiver.env()
    }
}

struct CleanupReceiver<R, V> {
    saved: Completion<V>,
    receiver: R,
}

impl<R, V> Receiver for CleanupReceiver<R, V>
where
    V: Send + 'static,
    R: Receiver<Value = V>,
{
    type Value = ();

    fn set_value(self, (): ()) {
        self.saved.send_to(self.receiver);
    }

    fn set_error(self, error: Error) {
        self.receiver.set_error(error);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }

    fn env(&self) -> Env {
        // Cleanup is not cancellable; it observes no stop requests.
        self.receiver.env().but_stop_token(StopToken::never())
    }
}

impl<S, C> Sender for Finally<S, C>
where
    S: Sender,
    C: Sender<Value = ()>,
{
    type Value = S::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = S::Value>,
    {
        self.sender.connect(FinallyReceiver {
            cleanup: self.cleanup,
            receiver,
            _marker: PhantomData,
        })
    }
}

/// One of two senders with the same value type.
pub(crate) enum Either<A, B> {
    Left(A),
    Right(B),
}

struct EitherOp<A, B, R> {
    inner: Either<A, B>,
    receiver: R,
}

impl<A, B, R> OperationState for EitherOp<A, B, R>
where
    A: Sender,
    B: Sender<Value = A::Value>,
    R: Receiver<Value = A::Value>,
{
    fn start(self) {
        match self.inner {
            Either::Left(a) => a.connect(self.receiver).start(),
            Either::Right(b) => b.connect(self.receiver).start(),
        }
    }
}

impl<A, B> Sender for Either<A, B>
where
    A: Sender,
    B: Sender<Value = A::Value>,
{
    type Value = A::Value;

    fn connect<R>(self, receiver: R) -> impl OperationState
    where
        R: Receiver<Value = A::Value>,
    {
        EitherOp {
            inner: self,
            receiver,
        }
    }
}

/// Chaining surface for senders.
pub trait SenderExt: Sender + Sized {
    /// Maps the value channel.
    fn then<F, V2>(self, f: F) -> Then<Self, F>
    where
        F: FnOnce(Self::Value) -> V2 + Send + 'static,
        V2: Send + 'static,
    {
        Then { sender: self, f }
    }

    /// Continues with a sender built from the value.
    fn let_value<F, S2>(self, f: F) -> LetValue<Self, F>
    where
        F: FnOnce(Self::Value) -> S2 + Send + 'static,
        S2: Sender,
    {
        LetValue { sender: self, f }
    }

    /// Recovers from the error channel.
    fn upon_error<F>(self, f: F) -> UponError<Self, F>
    where
        F: FnOnce(Error) -> Self::Value + Send + 'static,
    {
        UponError { sender: self, f }
    }

    /// Appends a cleanup sender that runs on every exit path, then
    /// re-emits the original completion.
    fn finally<C>(self, cleanup: C) -> Finally<Self, C>
    where
        C: Sender<Value = ()>,
    {
        Finally {
            sender: self,
            cleanup,
        }
    }

    /// Applies an algorithm closure, prepending this sender as its input.
    fn pipe<C>(self, closure: C) -> C::Output<Self>
    where
        C: crate::pipe::SenderClosure<Self::Value>,
    {
        closure.pipe_from(self)
    }

    /// Type-erases the sender.
    fn boxed(self) -> crate::exec::BoxSender<Self::Value> {
        crate::exec::BoxSender::new(self)
    }
}

impl<S: Sender> SenderExt for S {}
