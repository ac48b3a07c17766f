//! Tasks with a command pipe, an event pipe and a start/stop handshake.
//!
//! An [`Actor`] runs a task function on its own tokio task. The caller talks
//! to it through two pipes: commands flow caller → task on the command pipe,
//! events flow task → caller on the event pipe (each pipe also carries
//! replies in the opposite direction).
//!
//! The handshake:
//!
//! - The task must send [`Signal::Start`] on its event pipe once it has
//!   initialized. [`Actor::start`] returns only after seeing it.
//! - When the task function returns (or fails, or panics) the actor sends
//!   [`Signal::Term`] on the event pipe. A task never sends `Term` itself.
//! - [`Actor::stop`] sends [`Signal::Term`] on the command pipe. The task
//!   must eventually return, and may emit further events before doing so.
//!
//! ```no_run
//! use service_discovery::actor::Actor;
//! use service_discovery::pipe::Signal;
//!
//! # async fn run() -> service_discovery::Result<()> {
//! let mut actor = Actor::<String, String>::start(|mut cmd, evt| async move {
//!     evt.send(Signal::Start).await?;
//!     while let Signal::Payload(line) = cmd.recv().await? {
//!         evt.send(Signal::Payload(line.to_uppercase())).await?;
//!     }
//!     Ok(())
//! })
//! .await?;
//!
//! actor.send("hello".into()).await?;
//! assert_eq!(actor.recv().await?, Signal::Payload("HELLO".into()));
//! actor.stop(true).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::pipe::{pipe, PipeEnd, Signal, DEFAULT_CAPACITY};
use crate::{Error, Result};

/// Lifecycle of an [`Actor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Spawned, start handshake not yet complete.
    Unstarted,
    /// Handshake complete, task running.
    Running,
    /// `Term` command sent, waiting for the `Term` event.
    Destroyed,
    /// `Term` event observed; the pipes are gone.
    Terminated,
}

/// The task's end of the command pipe.
pub type CommandPipe<C> = PipeEnd<Signal<C>>;

/// The task's end of the event pipe.
pub type EventPipe<E> = PipeEnd<Signal<E>>;

/// Handle to a running task.
pub struct Actor<C, E> {
    state: ActorState,
    cmd: Option<PipeEnd<Signal<C>>>,
    evt: Option<PipeEnd<Signal<E>>>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl<C, E> Actor<C, E>
where
    C: Send + 'static,
    E: Send + 'static,
{
    /// Spawn `task` with default pipe capacity and wait for it to signal start.
    pub async fn start<F, Fut>(task: F) -> Result<Self>
    where
        F: FnOnce(CommandPipe<C>, EventPipe<E>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::start_with_capacity(DEFAULT_CAPACITY, task).await
    }

    /// Spawn `task` and wait for it to signal start.
    ///
    /// Fails with [`Error::TaskFailed`] carrying the task's own error if it
    /// failed before signaling, or [`Error::ActorProtocol`] if it ended
    /// cleanly without signaling. A zero `capacity` is rejected with
    /// [`Error::InvalidConfig`] before anything is spawned.
    pub async fn start_with_capacity<F, Fut>(capacity: usize, task: F) -> Result<Self>
    where
        F: FnOnce(CommandPipe<C>, EventPipe<E>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if capacity == 0 {
            return Err(Error::InvalidConfig("pipe capacity must be non-zero".into()));
        }
        let (cmd, task_cmd) = pipe(capacity);
        let (evt, task_evt) = pipe(capacity);
        let term = task_evt.sender();

        let inner = tokio::spawn(async move { task(task_cmd, task_evt).await });
        let wrapper = tokio::spawn(async move {
            let outcome = match inner.await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!("actor task panicked: {e}")),
            };
            if let Err(e) = &outcome {
                debug!("actor task ended with error: {e:#}");
            }
            // nobody may be listening any more
            let _ = term.send(Signal::Term).await;
            outcome
        });

        let mut actor = Self {
            state: ActorState::Unstarted,
            cmd: Some(cmd),
            evt: Some(evt),
            task: Some(wrapper),
        };

        let first = match actor.evt.as_mut() {
            Some(evt) => evt.recv().await,
            None => Err(Error::ChannelClosed),
        };
        match first {
            Ok(Signal::Start) => {
                actor.state = ActorState::Running;
                debug!("actor started");
                Ok(actor)
            }
            Ok(Signal::Term) | Err(_) => {
                actor.mark_terminated();
                match actor.take_outcome().await {
                    Ok(()) => Err(Error::protocol("task did not signal start")),
                    Err(e) => Err(e),
                }
            }
            Ok(Signal::Payload(_)) => {
                // dropping a Running actor asks the task to terminate
                actor.state = ActorState::Running;
                Err(Error::protocol("task sent an event before signaling start"))
            }
        }
    }
}

impl<C, E> Actor<C, E> {
    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.state
    }

    /// The caller's end of the command pipe.
    ///
    /// Unavailable once [`stop`](Self::stop) was called or the actor terminated.
    pub fn cmd_pipe(&mut self) -> Result<&mut PipeEnd<Signal<C>>> {
        match self.state {
            ActorState::Running => self.cmd.as_mut().ok_or(Error::ChannelClosed),
            _ => Err(Error::ChannelClosed),
        }
    }

    /// The caller's end of the event pipe.
    ///
    /// Unavailable once the actor terminated.
    pub fn evt_pipe(&mut self) -> Result<&mut PipeEnd<Signal<E>>> {
        match self.state {
            ActorState::Terminated => Err(Error::ChannelClosed),
            _ => self.evt.as_mut().ok_or(Error::ChannelClosed),
        }
    }

    /// Send a command payload.
    pub async fn send(&mut self, cmd: C) -> Result<()> {
        self.cmd_pipe()?.send(Signal::Payload(cmd)).await
    }

    /// Receive the next event.
    ///
    /// Receiving [`Signal::Term`] terminates the actor; its outcome is then
    /// available from [`wait`](Self::wait).
    pub async fn recv(&mut self) -> Result<Signal<E>> {
        let signal = self.evt_pipe()?.recv().await;
        match signal {
            Ok(Signal::Term) => {
                self.mark_terminated();
                Ok(Signal::Term)
            }
            Ok(signal) => Ok(signal),
            Err(e) => {
                self.mark_terminated();
                Err(e)
            }
        }
    }

    /// Ask the task to terminate.
    ///
    /// With `block`, every event up to the task's `Term` is discarded and the
    /// task's outcome is returned. Without it, the caller keeps receiving
    /// events and is responsible for observing `Term` (or calling
    /// [`wait`](Self::wait)). Stopping a terminated actor does nothing.
    pub async fn stop(&mut self, block: bool) -> Result<()> {
        match self.state {
            ActorState::Terminated => return Ok(()),
            ActorState::Unstarted | ActorState::Running => {
                if let Some(cmd) = self.cmd.take() {
                    if cmd.send(Signal::Term).await.is_err() {
                        trace!("actor command pipe already closed");
                    }
                }
                self.state = ActorState::Destroyed;
                debug!(block, "actor stopping");
            }
            ActorState::Destroyed => {}
        }

        if block {
            self.wait().await
        } else {
            Ok(())
        }
    }

    /// Wait for the task to end on its own, discarding events until its
    /// `Term`, and return its outcome.
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(evt) = self.evt.as_mut() {
            loop {
                match evt.recv().await {
                    Ok(Signal::Term) | Err(_) => break,
                    Ok(_) => trace!("discarding actor event"),
                }
            }
        }
        self.mark_terminated();
        self.take_outcome().await
    }

    fn mark_terminated(&mut self) {
        if self.state != ActorState::Terminated {
            debug!("actor terminated");
        }
        self.state = ActorState::Terminated;
        self.cmd = None;
        self.evt = None;
    }

    async fn take_outcome(&mut self) -> Result<()> {
        match self.task.take() {
            Some(handle) => match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::TaskFailed(e)),
                Err(e) => Err(Error::TaskFailed(anyhow::anyhow!("actor wrapper failed: {e}"))),
            },
            None => Ok(()),
        }
    }
}

impl<C, E> Drop for Actor<C, E> {
    fn drop(&mut self) {
        if self.state != ActorState::Running {
            return;
        }
        if let Some(cmd) = self.cmd.take() {
            match cmd.try_send(Signal::Term) {
                Ok(()) => debug!("actor dropped while running, termination requested"),
                Err(e) => warn!("actor dropped while running, could not request termination: {e}"),
            }
        }
    }
}
