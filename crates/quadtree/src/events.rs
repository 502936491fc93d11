use runtime::RenderSender;
use streaming::{ReadListener, RequestId, SourceError, TileUpdate};
use tracing::debug;

use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadEvent {
    Started,
    Update(TileUpdate),
    Completed,
    Canceled,
    Error(SourceError),
}

/// Messages handed from I/O and worker threads to the render thread.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    Read {
        node: NodeId,
        request: RequestId,
        event: ReadEvent,
    },
    /// Precise vertex positions changed; every mesh should be re-sampled.
    VerticesInvalid,
}

impl TreeEvent {
    /// Bytes this event will upload when handled.
    pub fn upload_bytes(&self) -> usize {
        match self {
            TreeEvent::Read {
                event: ReadEvent::Update(update),
                ..
            } => update.byte_len(),
            _ => 0,
        }
    }
}

/// Forwards read callbacks for one node onto the render queue.
pub struct NodeListener {
    node: NodeId,
    sender: RenderSender<TreeEvent>,
}

impl NodeListener {
    pub fn new(node: NodeId, sender: RenderSender<TreeEvent>) -> Self {
        Self { node, sender }
    }

    fn post(&self, request: RequestId, event: ReadEvent) {
        let msg = TreeEvent::Read {
            node: self.node,
            request,
            event,
        };
        if self.sender.post(msg).is_err() {
            debug!("render queue closed, dropping read event for node {}", self.node);
        }
    }
}

impl ReadListener for NodeListener {
    fn request_started(&self, id: RequestId) {
        self.post(id, ReadEvent::Started);
    }

    fn request_update(&self, id: RequestId, update: TileUpdate) {
        self.post(id, ReadEvent::Update(update));
    }

    fn request_completed(&self, id: RequestId) {
        self.post(id, ReadEvent::Completed);
    }

    // the node has already let go of a canceled request
    fn request_canceled(&self, id: RequestId) {
        self.sender.try_post(TreeEvent::Read {
            node: self.node,
            request: id,
            event: ReadEvent::Canceled,
        });
    }

    fn request_error(&self, id: RequestId, error: SourceError) {
        self.post(id, ReadEvent::Error(error));
    }
}
