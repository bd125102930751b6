//! Cooperative state-machine runner.
//!
//! A machine is a set of states plus one [`StateMachine::step`] that performs
//! the work of the given state and names its successor. [`run`] drives the
//! machine one state at a time:
//!
//! ```text
//! loop:
//!   on_transition(active)        observer sees the state before it runs
//!   next = step(active, cancel)  the state's own work, may block
//!   None  -> return active       terminal state reached
//!   Some  -> active = next
//! ```
//!
//! Exactly one step is ever in flight, so a machine may mutate its own fields
//! from `step` without further synchronization.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// A state machine whose states decide their own successor.
#[async_trait]
pub trait StateMachine: Send {
    type State: Copy + fmt::Display + Send + 'static;
    type Error: Send;

    /// Run the logic of `state` and return the next state, or `None` when
    /// `state` is terminal.
    async fn step(
        &mut self,
        state: Self::State,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::State>, Self::Error>;
}

/// Drive `machine` from `initial` until a step yields no successor.
///
/// `on_transition` is invoked with every state before that state's step
/// runs. An error from the observer or from a step aborts the run and is
/// returned as is. On success the terminal state is returned.
pub async fn run<M, F>(
    machine: &mut M,
    initial: M::State,
    cancel: &CancellationToken,
    mut on_transition: F,
) -> Result<M::State, M::Error>
where
    M: StateMachine + ?Sized,
    F: FnMut(M::State) -> Result<(), M::Error> + Send,
{
    let mut active = initial;
    loop {
        on_transition(active)?;
        tracing::trace!(state = %active, "entering state");

        match machine.step(active, cancel).await? {
            Some(next) => active = next,
            None => return Ok(active),
        }
    }
}
