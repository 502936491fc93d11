use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use runtime::work_queue::WorkQueue;
use tracing::{debug, warn};

use crate::prioritizer::{RequestPrioritizer, default_request_order};
use crate::request::{ReadRequest, RequestId, TileIndex};
use crate::source::{SourceError, TileGeometry, TileSource, TileUpdate};

/// Callbacks for one asynchronous read.
///
/// Invoked on whichever thread services the read; implementations must not
/// touch GPU state and should hand the event to the render thread.
pub trait ReadListener: Send + Sync {
    fn request_created(&self, _request: &ReadRequest) {}
    fn request_started(&self, id: RequestId);
    fn request_update(&self, id: RequestId, update: TileUpdate);
    fn request_completed(&self, id: RequestId);
    fn request_canceled(&self, id: RequestId);
    fn request_error(&self, id: RequestId, error: SourceError);
}

struct PendingRead {
    request: ReadRequest,
    listener: Arc<dyn ReadListener>,
}

#[derive(Default)]
struct QueueState {
    queue: WorkQueue<PendingRead>,
    shutdown: bool,
}

struct Shared {
    source: Arc<dyn TileSource>,
    state: Mutex<QueueState>,
    ready: Condvar,
    prioritizer: RwLock<Option<Arc<dyn RequestPrioritizer>>>,
}

impl Shared {
    fn pop(&self, state: &mut QueueState) -> Option<PendingRead> {
        let prioritizer = self.prioritizer.read().clone();
        let (_, next) = match prioritizer {
            Some(p) => state
                .queue
                .pop_best_by(|a, b| p.compare(&a.request, &b.request)),
            None => state
                .queue
                .pop_best_by(|a, b| default_request_order(&a.request, &b.request)),
        }?;
        Some(next)
    }

    fn service(&self, pending: PendingRead) {
        let PendingRead { request, listener } = pending;
        let id = request.id;
        if request.is_canceled() {
            listener.request_canceled(id);
            return;
        }

        listener.request_started(id);
        let result = self.source.read(request.tile, &mut |update| {
            if !request.is_canceled() {
                listener.request_update(id, update);
            }
        });

        match result {
            Ok(()) if request.is_canceled() => listener.request_canceled(id),
            Ok(()) => listener.request_completed(id),
            Err(SourceError::Canceled) => listener.request_canceled(id),
            Err(err) => {
                let tile = request.tile;
                warn!("tile read failed: {tile} uri={} -> {err}", self.source.uri());
                listener.request_error(id, err);
            }
        }
    }
}

/// Asynchronous tile reads over a [`TileSource`].
///
/// Reads are queued and serviced one at a time, either by a worker thread
/// (`spawn_worker`) or by the host calling `run_pending`. Service order comes
/// from the installed prioritizer, falling back to finer level first, newest
/// first.
pub struct AsyncReader {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncReader {
    pub fn new(source: Arc<dyn TileSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                prioritizer: RwLock::new(None),
            }),
            next_id: AtomicU64::new(1),
            worker: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.shared.source
    }

    pub fn set_prioritizer(&self, prioritizer: Option<Arc<dyn RequestPrioritizer>>) {
        *self.shared.prioritizer.write() = prioritizer;
    }

    pub fn async_read(&self, tile: TileIndex, listener: Arc<dyn ReadListener>) -> ReadRequest {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let bounds = self.shared.source.tile_source_bounds(tile);
        let request = ReadRequest::new(id, tile, bounds);
        listener.request_created(&request);

        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            request.cancel();
            listener.request_canceled(id);
            return request;
        }
        state.queue.push(PendingRead {
            request: request.clone(),
            listener,
        });
        drop(state);
        self.shared.ready.notify_one();
        request
    }

    /// Reads still queued (including canceled ones not yet dequeued).
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Services one queued read on the calling thread.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut state = self.shared.state.lock();
            self.shared.pop(&mut state)
        };
        match next {
            Some(pending) => {
                self.shared.service(pending);
                true
            }
            None => false,
        }
    }

    /// Services queued reads on the calling thread until the queue is empty.
    pub fn run_pending(&self) -> usize {
        let mut n = 0;
        while self.run_next() {
            n += 1;
        }
        n
    }

    /// Starts the background worker. No-op if one is already running.
    pub fn spawn_worker(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("tile-reader".to_string())
            .spawn(move || {
                debug!("tile reader worker started: uri={}", shared.source.uri());
                loop {
                    let next = {
                        let mut state = shared.state.lock();
                        loop {
                            if state.shutdown {
                                debug!("tile reader worker stopped");
                                return;
                            }
                            if let Some(pending) = shared.pop(&mut state) {
                                break pending;
                            }
                            shared.ready.wait(&mut state);
                        }
                    };
                    shared.service(next);
                }
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the worker and cancels everything still queued. Later reads are
    /// canceled immediately.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.queue.drain_all()
        };
        self.shared.ready.notify_all();
        for pending in drained {
            pending.request.cancel();
            pending.listener.request_canceled(pending.request.id);
        }
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            warn!("tile reader worker panicked");
        }
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
