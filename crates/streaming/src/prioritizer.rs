use core::cmp::Ordering;

use foundation::Aabb2;
use foundation::math::stable_total_cmp_f64;
use parking_lot::RwLock;

use crate::request::ReadRequest;

/// Orders pending reads; `Less` is serviced first.
///
/// Called from the reader's worker thread while the render thread may be
/// updating the prioritizer's state.
pub trait RequestPrioritizer: Send + Sync {
    fn compare(&self, a: &ReadRequest, b: &ReadRequest) -> Ordering;
}

/// Fallback order with no prioritizer: finer level first, then newest first.
pub fn default_request_order(a: &ReadRequest, b: &ReadRequest) -> Ordering {
    a.tile
        .level
        .cmp(&b.tile.level)
        .then_with(|| b.id.cmp(&a.id))
}

#[derive(Debug, Clone, Default)]
struct Focus {
    point: Option<[f64; 2]>,
    rois: Vec<Aabb2>,
}

/// Camera-focus/region-of-interest prioritizer.
///
/// Order:
/// 1. requests intersecting any region of interest first;
/// 2. both intersecting: finer level first (coarser when `prefer_coarse`);
/// 3. closer request center to the focus point (image space, squared);
/// 4. finer level.
///
/// Focus and regions are expressed in full-resolution image pixels and are
/// refreshed once per render pump via [`FocusPrioritizer::set_focus`].
#[derive(Debug, Default)]
pub struct FocusPrioritizer {
    focus: RwLock<Focus>,
    prefer_coarse: bool,
}

impl FocusPrioritizer {
    pub fn new(prefer_coarse: bool) -> Self {
        Self {
            focus: RwLock::new(Focus::default()),
            prefer_coarse,
        }
    }

    pub fn set_focus(&self, point: Option<[f64; 2]>, rois: Vec<Aabb2>) {
        let mut focus = self.focus.write();
        focus.point = point;
        focus.rois = rois;
    }

    pub fn focus_point(&self) -> Option<[f64; 2]> {
        self.focus.read().point
    }

    pub fn regions_of_interest(&self) -> Vec<Aabb2> {
        self.focus.read().rois.clone()
    }
}

fn distance_squared(point: [f64; 2], bounds: &Aabb2) -> f64 {
    let c = bounds.center();
    let dx = c[0] - point[0];
    let dy = c[1] - point[1];
    dx * dx + dy * dy
}

impl RequestPrioritizer for FocusPrioritizer {
    fn compare(&self, a: &ReadRequest, b: &ReadRequest) -> Ordering {
        let focus = self.focus.read();
        let a_roi = focus.rois.iter().any(|r| r.intersects(&a.src_bounds));
        let b_roi = focus.rois.iter().any(|r| r.intersects(&b.src_bounds));
        if a_roi != b_roi {
            return if a_roi { Ordering::Less } else { Ordering::Greater };
        }

        if a_roi && a.tile.level != b.tile.level {
            let finer_first = a.tile.level.cmp(&b.tile.level);
            return if self.prefer_coarse {
                finer_first.reverse()
            } else {
                finer_first
            };
        }

        if let Some(point) = focus.point {
            let ord = stable_total_cmp_f64(
                distance_squared(point, &a.src_bounds),
                distance_squared(point, &b.src_bounds),
            );
            if ord != Ordering::Equal {
                return ord;
            }
        }

        a.tile.level.cmp(&b.tile.level)
    }
}

#[cfg(test)]
mod tests {
    use super::{FocusPrioritizer, RequestPrioritizer, default_request_order};
    use crate::request::{ReadRequest, RequestId, TileIndex};
    use core::cmp::Ordering;
    use foundation::Aabb2;

    fn req(id: u64, col: u64, row: u64, level: u32) -> ReadRequest {
        let span = (256u64 << level) as f64;
        ReadRequest::new(
            RequestId(id),
            TileIndex::new(col, row, level),
            Aabb2::from_origin_size(col as f64 * span, row as f64 * span, span, span),
        )
    }

    #[test]
    fn roi_intersection_wins_over_level() {
        let p = FocusPrioritizer::new(false);
        p.set_focus(None, vec![Aabb2::from_origin_size(0.0, 0.0, 256.0, 256.0)]);
        let inside = req(1, 0, 0, 3);
        let outside = req(2, 5, 5, 0);
        assert_eq!(p.compare(&inside, &outside), Ordering::Less);
        assert_eq!(p.compare(&outside, &inside), Ordering::Greater);
    }

    #[test]
    fn intersecting_requests_prefer_finer_unless_inverted() {
        let roi = vec![Aabb2::from_origin_size(0.0, 0.0, 4096.0, 4096.0)];
        let fine = req(1, 0, 0, 0);
        let coarse = req(2, 0, 0, 2);

        let p = FocusPrioritizer::new(false);
        p.set_focus(None, roi.clone());
        assert_eq!(p.compare(&fine, &coarse), Ordering::Less);

        let p = FocusPrioritizer::new(true);
        p.set_focus(None, roi);
        assert_eq!(p.compare(&fine, &coarse), Ordering::Greater);
    }

    #[test]
    fn proximity_breaks_ties_outside_roi() {
        let p = FocusPrioritizer::new(false);
        p.set_focus(Some([2000.0, 2000.0]), Vec::new());
        let near = req(1, 7, 7, 0);
        let far = req(2, 0, 0, 0);
        assert_eq!(p.compare(&near, &far), Ordering::Less);
    }

    #[test]
    fn default_order_is_finer_then_newest() {
        let old_fine = req(1, 0, 0, 0);
        let new_fine = req(2, 1, 0, 0);
        let coarse = req(3, 0, 0, 1);
        assert_eq!(default_request_order(&old_fine, &coarse), Ordering::Less);
        assert_eq!(default_request_order(&new_fine, &old_fine), Ordering::Less);
    }
}
