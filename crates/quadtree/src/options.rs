use serde::{Deserialize, Serialize};

/// Tuning knobs for one quadtree instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeOptions {
    /// Composite parent textures from resolved children.
    pub texture_copy_enabled: bool,
    /// A parent composited from all-resolved children counts as resolved.
    pub child_texture_copy_resolves_parent: bool,
    /// Draw partially received tiles while their read is still running.
    pub progressive_load: bool,
    /// Bias added to the computed pyramid level.
    pub level_transition_adjustment: f64,
    pub texture_borrow_enabled: bool,
    /// Draw a checkerboard under tiles that have nothing to borrow.
    pub loading_texture_enabled: bool,
    pub version_check_enabled: bool,
    pub min_grid_size: u32,
    pub max_grid_size: u32,
    /// Degrees of latitude/longitude per mesh cell before subdivision.
    pub grid_sample_distance_deg: f64,
    /// Fade-in duration for completed tiles; 0 disables.
    pub fade_timer_limit_ms: u64,
    /// Precise projections further than `tile diagonal / divisor` pixels
    /// from the imprecise one are rejected.
    pub discrepancy_divisor: f64,
    /// Grid width ceiling for precise refinement at level 0; halves twice
    /// per level.
    pub precise_grid_refine_cap: u32,
    pub precise_vertices_enabled: bool,
    pub render_queue_capacity: usize,
    /// Bytes of tile data uploaded per pump; `None` for no limit.
    pub upload_budget_bytes: Option<usize>,
}

impl Default for QuadtreeOptions {
    fn default() -> Self {
        Self {
            texture_copy_enabled: true,
            child_texture_copy_resolves_parent: true,
            progressive_load: true,
            level_transition_adjustment: 0.0,
            texture_borrow_enabled: true,
            loading_texture_enabled: false,
            version_check_enabled: true,
            min_grid_size: 1,
            max_grid_size: 32,
            grid_sample_distance_deg: 0.125,
            fade_timer_limit_ms: 0,
            discrepancy_divisor: 8.0,
            precise_grid_refine_cap: 16,
            precise_vertices_enabled: true,
            render_queue_capacity: 4096,
            upload_budget_bytes: None,
        }
    }
}

impl QuadtreeOptions {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::QuadtreeOptions;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_take_defaults() {
        let opts = QuadtreeOptions::from_json_str(r#"{"max_grid_size": 8}"#).unwrap();
        assert_eq!(opts.max_grid_size, 8);
        assert_eq!(opts.discrepancy_divisor, 8.0);
        assert!(opts.texture_copy_enabled);
        assert_eq!(opts.upload_budget_bytes, None);
    }

    #[test]
    fn json_round_trip() {
        let opts = QuadtreeOptions {
            fade_timer_limit_ms: 250,
            upload_budget_bytes: Some(1 << 20),
            ..QuadtreeOptions::default()
        };
        let json = opts.to_json_string().unwrap();
        assert_eq!(QuadtreeOptions::from_json_str(&json).unwrap(), opts);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(QuadtreeOptions::from_json_str(r#"{"min_grid_size": "big"}"#).is_err());
    }
}
