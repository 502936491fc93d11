/// One iteration of the render loop.
///
/// Every draw happens inside a pump; nodes stamp the pump index they were last
/// visited in and anything not stamped in the latest pump is released.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderPump {
    /// Monotonic pump counter, starting at 0.
    pub index: u64,
    /// Time since the previous pump (seconds).
    pub dt_s: f64,
    /// Accumulated time at the start of this pump (seconds).
    pub time_s: f64,
}

impl RenderPump {
    pub fn new(index: u64, dt_s: f64) -> Self {
        Self {
            index,
            dt_s,
            time_s: index as f64 * dt_s,
        }
    }

    /// Next pump with the same delta.
    pub fn next(self) -> Self {
        self.advance(self.dt_s)
    }

    /// Next pump with an explicit delta (variable frame times).
    pub fn advance(self, dt_s: f64) -> Self {
        Self {
            index: self.index + 1,
            dt_s,
            time_s: self.time_s + self.dt_s,
        }
    }

    pub fn dt_ms(&self) -> f64 {
        self.dt_s * 1000.0
    }
}

impl Default for RenderPump {
    fn default() -> Self {
        Self::new(0, 1.0 / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::RenderPump;

    #[test]
    fn next_advances_index_and_time() {
        let p0 = RenderPump::new(0, 0.5);
        let p1 = p0.next();
        assert_eq!(p1.index, 1);
        assert_eq!(p1.time_s, 0.5);
        assert_eq!(p1.dt_ms(), 500.0);
    }

    #[test]
    fn advance_accumulates_variable_deltas() {
        let p = RenderPump::new(0, 0.25).advance(0.1).advance(0.2);
        assert_eq!(p.index, 2);
        assert_eq!(p.time_s, 0.35);
        assert_eq!(p.dt_s, 0.2);
    }
}
