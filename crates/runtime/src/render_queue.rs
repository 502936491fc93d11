use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

use crate::budget::UploadBudget;

/// The receiving end was dropped; the message was not delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "render queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Bounded multi-producer queue consumed on the render thread.
///
/// Producers (I/O and worker threads) post messages; the render thread drains
/// them once per pump before drawing. Posting blocks while the queue is full,
/// so producers are throttled by the render thread and never drop messages.
/// [`RenderQueue::close`] drops the receiving end, which fails any blocked or
/// later post with [`QueueClosed`].
#[derive(Debug)]
pub struct RenderQueue<T> {
    sender: Sender<T>,
    receiver: Option<Receiver<T>>,
}

impl<T> RenderQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver: Some(receiver),
        }
    }

    /// Discards queued messages and wakes producers blocked on a full queue.
    pub fn close(&mut self) {
        self.receiver = None;
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn sender(&self) -> RenderSender<T> {
        RenderSender {
            inner: self.sender.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.as_ref().map_or(0, Receiver::len)
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.as_ref().is_none_or(Receiver::is_empty)
    }

    pub fn try_recv(&self) -> Option<T> {
        match self.receiver.as_ref()?.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Hands queued messages to `handle` until the queue is empty or the
    /// budget is exhausted. Returns the number of messages handled.
    pub fn drain(
        &self,
        budget: &mut UploadBudget,
        mut handle: impl FnMut(T, &mut UploadBudget),
    ) -> usize {
        let mut handled = 0;
        while !budget.is_exhausted() {
            let Some(msg) = self.try_recv() else {
                break;
            };
            handle(msg, budget);
            handled += 1;
        }
        handled
    }
}

/// Producer handle; cheap to clone and `Send` when `T` is.
#[derive(Debug)]
pub struct RenderSender<T> {
    inner: Sender<T>,
}

impl<T> Clone for RenderSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RenderSender<T> {
    pub fn post(&self, msg: T) -> Result<(), QueueClosed> {
        self.inner.send(msg).map_err(|_| QueueClosed)
    }

    /// Posts without blocking; returns false if the queue is full or closed.
    pub fn try_post(&self, msg: T) -> bool {
        self.inner.try_send(msg).is_ok()
    }
}
