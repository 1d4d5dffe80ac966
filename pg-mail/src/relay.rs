//! Chunk relays.
//!
//! A relay carries a bytestream between two independently scheduled contexts, e.g. a compose
//! surface and the seal orchestrator, as discrete [`RelayMessage`]s posted on a
//! [`MessageBus`]. The consuming end is an [`AsyncRead`], so it can be handed to the engine
//! directly.
//!
//! Every relay registers exactly one listener on the bus. The listener is removed when the
//! stream is finalized, and otherwise when the [`RelayReader`] is dropped, in which case the
//! producing [`RelaySender`] observes a cancellation.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::channel::mpsc as fmpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{ready, StreamExt};
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::error::Error;

/// Identifies the listener of a relay on the bus.
pub type RelayId = u64;

/// The messages that travel over a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// A piece of the stream, applied in the order it was sent.
    Chunk(Vec<u8>),
    /// The stream is complete. Always the last message.
    Finalize,
    /// The producer gave up.
    Cancel,
}

#[derive(Debug, Default)]
struct Listeners {
    next_id: RelayId,
    map: HashMap<RelayId, mpsc::UnboundedSender<RelayMessage>>,
}

/// The host's message bus, as far as relays use it.
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<Listeners>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message to the listener of relay `id`.
    ///
    /// Fails with [`Error::RelayCancelled`] if the relay no longer listens.
    pub fn post(&self, id: RelayId, msg: RelayMessage) -> Result<(), Error> {
        let listeners = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        listeners
            .map
            .get(&id)
            .ok_or(Error::RelayCancelled)?
            .send(msg)
            .map_err(|_| Error::RelayCancelled)
    }

    /// The number of registered listeners.
    pub fn listeners(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    fn register(&self, tx: mpsc::UnboundedSender<RelayMessage>) -> Listener {
        let mut listeners = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.map.insert(id, tx);

        debug!("relay {id}: listener registered");

        Listener {
            id,
            bus: self.clone(),
        }
    }

    fn deregister(&self, id: RelayId) {
        let mut listeners = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if listeners.map.remove(&id).is_some() {
            debug!("relay {id}: listener deregistered");
        }
    }
}

/// Removes the listener from the bus when dropped.
#[derive(Debug)]
struct Listener {
    id: RelayId,
    bus: MessageBus,
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.bus.deregister(self.id);
    }
}

/// Opens chunk relays.
#[derive(Debug)]
pub struct ChunkRelay;

impl ChunkRelay {
    /// Open a relay on `bus`, returning the producing and the consuming end.
    pub fn open(bus: &MessageBus) -> (RelaySender, RelayReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let listener = bus.register(tx);

        let sender = RelaySender {
            id: listener.id,
            bus: bus.clone(),
            cancelled: cancel_rx,
            finalized: Arc::default(),
        };

        let reader = RelayReader {
            listener: Some(listener),
            rx,
            buf: Vec::new(),
            pos: 0,
            state: ReaderState::Open,
            cancel: cancel_tx,
        };

        (sender, reader)
    }
}

/// The producing end of a relay.
///
/// Clones share the stream: once one of them finalized it, none of them can send.
#[derive(Debug, Clone)]
pub struct RelaySender {
    id: RelayId,
    bus: MessageBus,
    cancelled: watch::Receiver<bool>,
    finalized: Arc<AtomicBool>,
}

impl RelaySender {
    /// The id of the relay's listener.
    pub fn id(&self) -> RelayId {
        self.id
    }

    /// Send a chunk. Fails once the consumer has cancelled or the stream was finalized.
    pub fn send(&self, chunk: &[u8]) -> Result<(), Error> {
        if self.is_cancelled() || self.finalized.load(Ordering::Acquire) {
            return Err(Error::RelayCancelled);
        }

        self.bus.post(self.id, RelayMessage::Chunk(chunk.to_vec()))
    }

    /// Signal the end of the stream. Only the first finalize of all clones succeeds.
    pub fn finalize(self) -> Result<(), Error> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(Error::RelayCancelled);
        }

        self.bus.post(self.id, RelayMessage::Finalize)
    }

    /// Abort the stream. The consumer reads a [`Error::RelayCancelled`].
    ///
    /// Does nothing once the stream was finalized.
    pub fn cancel(self) {
        if !self.finalized.load(Ordering::Acquire) {
            let _ = self.bus.post(self.id, RelayMessage::Cancel);
        }
    }

    /// Whether the consumer has cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when the consumer goes away.
    ///
    /// Returns `true` if it cancelled, and `false` if it finished reading the stream.
    pub async fn closed(&self) -> bool {
        let mut rx = self.cancelled.clone();

        loop {
            if *rx.borrow() {
                return true;
            }

            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Open,
    Finalized,
    Cancelled,
}

/// The consuming end of a relay.
#[derive(Debug)]
pub struct RelayReader {
    listener: Option<Listener>,
    rx: mpsc::UnboundedReceiver<RelayMessage>,
    buf: Vec<u8>,
    pos: usize,
    state: ReaderState,
    cancel: watch::Sender<bool>,
}

pub(crate) fn cancelled_io() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, Error::RelayCancelled)
}

impl RelayReader {
    /// Abandon the stream: the producer observes the cancellation and the listener is removed.
    pub fn cancel(&mut self) {
        if self.state == ReaderState::Open {
            self.state = ReaderState::Cancelled;
            let _ = self.cancel.send(true);
        }

        self.listener.take();
    }
}

impl AsyncRead for RelayReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            if self.pos < self.buf.len() {
                let n = out.len().min(self.buf.len() - self.pos);
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;

                return Poll::Ready(Ok(n));
            }

            match self.state {
                ReaderState::Finalized => return Poll::Ready(Ok(0)),
                ReaderState::Cancelled => return Poll::Ready(Err(cancelled_io())),
                ReaderState::Open => {}
            }

            match ready!(self.rx.poll_recv(cx)) {
                Some(RelayMessage::Chunk(chunk)) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Some(RelayMessage::Finalize) => {
                    self.state = ReaderState::Finalized;
                    self.listener.take();
                }
                Some(RelayMessage::Cancel) | None => {
                    self.state = ReaderState::Cancelled;
                    self.listener.take();
                }
            }
        }
    }
}

impl Drop for RelayReader {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A bounded in-process pipe between the engine and a downstream transform.
///
/// The writing half is an [`AsyncWrite`]: closing it is the explicit "all written" signal.
pub(crate) fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = fmpsc::channel(capacity);

    (
        PipeWriter {
            tx,
            finalized: false,
        },
        PipeReader { rx, done: false },
    )
}

#[derive(Debug)]
pub(crate) struct PipeWriter {
    tx: fmpsc::Sender<RelayMessage>,
    finalized: bool,
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.finalized {
            return Poll::Ready(Err(cancelled_io()));
        }

        ready!(self.tx.poll_ready(cx)).map_err(|_| cancelled_io())?;
        self.tx
            .start_send(RelayMessage::Chunk(buf.to_vec()))
            .map_err(|_| cancelled_io())?;

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.finalized {
            ready!(self.tx.poll_ready(cx)).map_err(|_| cancelled_io())?;
            self.tx
                .start_send(RelayMessage::Finalize)
                .map_err(|_| cancelled_io())?;
            self.finalized = true;
            self.tx.close_channel();
        }

        Poll::Ready(Ok(()))
    }
}

#[derive(Debug)]
pub(crate) struct PipeReader {
    rx: fmpsc::Receiver<RelayMessage>,
    done: bool,
}

impl PipeReader {
    /// The next chunk, or `None` after the writer closed.
    ///
    /// A writer that goes away without closing cancels the pipe.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.done {
            return Ok(None);
        }

        match self.rx.next().await {
            Some(RelayMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Some(RelayMessage::Finalize) => {
                self.done = true;
                Ok(None)
            }
            Some(RelayMessage::Cancel) | None => Err(Error::RelayCancelled),
        }
    }
}
