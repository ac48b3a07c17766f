//! Bounded, ordered, bidirectional pipes between two endpoints.
//!
//! A pipe is a pair of [`PipeEnd`]s wired crosswise: what one end sends, the
//! other end receives, in send order. Each direction holds at most
//! `capacity` pending messages; a full direction parks the sender until the
//! receiver catches up.
//!
//! Pipes carry whole messages, so a multipart message (see [`Frames`]) is
//! delivered exactly as it was grouped by the sender. Control values travel
//! as [`Signal::Start`] / [`Signal::Term`] and can never be mistaken for a
//! payload.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{Error, Result};

/// Default high-water mark for each pipe direction.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A multipart message: an ordered group of byte buffers.
pub type Frames = Vec<Bytes>;

/// Actor channel items: a payload, or one of the two reserved sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T> {
    /// The task finished initializing.
    Start,
    /// As a command: begin shutting down. As an event: the task has ended.
    Term,
    /// Application payload.
    Payload(T),
}

impl<T> Signal<T> {
    /// Whether this is the [`Signal::Term`] sentinel.
    pub fn is_term(&self) -> bool {
        matches!(self, Signal::Term)
    }

    /// The payload, if any.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Signal::Payload(payload) => Some(payload),
            Signal::Start | Signal::Term => None,
        }
    }
}

impl<T> From<T> for Signal<T> {
    fn from(payload: T) -> Self {
        Signal::Payload(payload)
    }
}

/// Create a connected pipe with [`DEFAULT_CAPACITY`].
pub fn default_pipe<T>() -> (PipeEnd<T>, PipeEnd<T>) {
    pipe(DEFAULT_CAPACITY)
}

/// Create a connected pipe; each direction buffers up to `capacity` messages.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn pipe<T>(capacity: usize) -> (PipeEnd<T>, PipeEnd<T>) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        PipeEnd { tx: a_tx, rx: a_rx },
        PipeEnd { tx: b_tx, rx: b_rx },
    )
}

/// One end of a pipe.
#[derive(Debug)]
pub struct PipeEnd<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

impl<T> PipeEnd<T> {
    /// Enqueue one message, waiting while the pipe is at capacity.
    pub async fn send(&self, msg: T) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::ChannelClosed)
    }

    /// Enqueue one message without waiting.
    pub fn try_send(&self, msg: T) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }

    /// Wait for the next message.
    ///
    /// Fails with [`Error::ChannelClosed`] once the other end is gone and
    /// everything it sent has been received.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.ok_or(Error::ChannelClosed)
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    /// Whether the other end has dropped its receiving half.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Turn the receiving half into a stream, dropping the sending half.
    pub fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream::new(self.rx)
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }
}
