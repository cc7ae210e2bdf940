//! A reusable single-shot coroutine abstraction rendered as an explicit
//! continuation object rather than a literal stackful fiber.
//!
//! A coroutine body is a tagged state machine: each call to [`Coroutine::resume`]
//! drives it forward until it either runs out of input/output room
//! (`Poll::Pending`) or completes (`Poll::Ready`). This mirrors `m17core::tnc::SoftTnc`'s
//! `State` enum more than it mirrors a classic fiber - there is no hidden
//! stack, only whatever state each `Stage` variant carries.
//!
//! The step function is generic over the cursor type via [`Step`], so the
//! same primitive backs both the demodulator (stepped with a read-only
//! [`crate::sample_stream::SampleCursor`]) and the modulator (stepped with a
//! write-only [`crate::sample_stream::SampleSink`]).

/// Outcome of driving a coroutine body forward by one `resume`.
pub enum Poll<T> {
    /// The body ran out of input/output room and must be resumed again once
    /// more is available.
    Pending,
    /// The body reached a terminal point. Carries whatever the body wants to report.
    Ready(T),
}

/// Lifecycle hooks every coroutine body provides, independent of what kind
/// of cursor steps it.
pub trait CoroutineBody {
    /// Fires exactly once when `poll` returns `Poll::Ready`.
    fn on_exit(&mut self) {}

    /// Fires before every fresh entry into the body, including the first one.
    fn on_reset(&mut self) {}

    /// Reinitialize all local state so the next `poll` call starts the body
    /// from its beginning.
    fn reset_state(&mut self);
}

/// The step function a body provides for a particular cursor type `C`.
/// Split from [`CoroutineBody`] because the cursor type differs between the
/// demodulator and modulator but the lifecycle hooks don't.
pub trait Step<C>: CoroutineBody {
    type Output;

    /// Advance as far as possible given what `cursor` currently allows,
    /// returning `Poll::Pending` if the cursor runs dry (or full) mid-step.
    fn poll(&mut self, cursor: &mut C) -> Poll<Self::Output>;
}

/// Drives a coroutine body to completion across however many `resume`
/// calls it takes, tracking whether the body has exited and needs a `reset`
/// before it can be entered again.
pub struct Coroutine<B: CoroutineBody> {
    body: B,
    exited: bool,
}

impl<B: CoroutineBody> Coroutine<B> {
    pub fn new(mut body: B) -> Self {
        body.on_reset();
        Coroutine {
            body,
            exited: false,
        }
    }

    /// If the body has not returned, drive it until it suspends or completes.
    /// No-op if the body already returned and is awaiting `reset`.
    pub fn resume<C>(&mut self, cursor: &mut C) -> Poll<B::Output>
    where
        B: Step<C>,
    {
        if self.exited {
            return Poll::Pending;
        }
        match self.body.poll(cursor) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(out) => {
                self.body.on_exit();
                self.exited = true;
                Poll::Ready(out)
            }
        }
    }

    /// Discard the current continuation and prepare to enter the body fresh
    /// on the next `resume`.
    pub fn reset(&mut self) {
        self.body.reset_state();
        self.body.on_reset();
        self.exited = false;
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }
}
