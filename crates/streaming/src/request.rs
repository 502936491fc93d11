use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foundation::Aabb2;
use serde::{Deserialize, Serialize};

/// Position of a tile in the pyramid.
///
/// Level 0 is full resolution; each level up halves the resolution, so the
/// children of `(col, row, level)` live at `level - 1`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TileIndex {
    pub col: u64,
    pub row: u64,
    pub level: u32,
}

impl TileIndex {
    pub const fn new(col: u64, row: u64, level: u32) -> Self {
        Self { col, row, level }
    }

    /// Child `i` in `[ul, ur, ll, lr]` order. `None` at level 0.
    pub fn child(self, i: usize) -> Option<TileIndex> {
        if self.level == 0 || i > 3 {
            return None;
        }
        Some(TileIndex::new(
            self.col * 2 + (i % 2) as u64,
            self.row * 2 + (i / 2) as u64,
            self.level - 1,
        ))
    }

    pub fn parent(self) -> TileIndex {
        TileIndex::new(self.col / 2, self.row / 2, self.level + 1)
    }
}

impl std::fmt::Display for TileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "z={} x={} y={}", self.level, self.col, self.row)
    }
}

/// Identifies one asynchronous read. Ids are never reused by a reader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Handle to an in-flight read.
///
/// Clones share the cancel flag; canceling any clone cancels the read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub id: RequestId,
    pub tile: TileIndex,
    /// Extent of the tile in full-resolution image pixels.
    pub src_bounds: Aabb2,
    canceled: Arc<AtomicBool>,
}

impl ReadRequest {
    pub fn new(id: RequestId, tile: TileIndex, src_bounds: Aabb2) -> Self {
        Self {
            id,
            tile,
            src_bounds,
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadRequest, RequestId, TileIndex};
    use foundation::Aabb2;

    #[test]
    fn children_follow_quadrant_order() {
        let parent = TileIndex::new(3, 5, 4);
        let kids: Vec<_> = (0..4).map(|i| parent.child(i).unwrap()).collect();
        assert_eq!(
            kids,
            vec![
                TileIndex::new(6, 10, 3),
                TileIndex::new(7, 10, 3),
                TileIndex::new(6, 11, 3),
                TileIndex::new(7, 11, 3),
            ]
        );
        assert!(kids.iter().all(|k| k.parent() == parent));
        assert!(TileIndex::new(0, 0, 0).child(0).is_none());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let req = ReadRequest::new(
            RequestId(1),
            TileIndex::new(0, 0, 0),
            Aabb2::from_origin_size(0.0, 0.0, 1.0, 1.0),
        );
        let clone = req.clone();
        assert!(!clone.is_canceled());
        req.cancel();
        assert!(clone.is_canceled());
    }
}
