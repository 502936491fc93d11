use serde::{Deserialize, Serialize};

/// Per-node resolution state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    Unresolved,
    Resolving,
    Resolved,
    Unresolvable,
    Suspended,
}

impl TileState {
    fn bit(self) -> u8 {
        match self {
            TileState::Unresolved => 0x01,
            TileState::Resolving => 0x02,
            TileState::Resolved => 0x04,
            TileState::Unresolvable => 0x08,
            TileState::Suspended => 0x10,
        }
    }
}

/// Union of the states of every terminal node drawn in one pump.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct StateMask(u8);

impl StateMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, state: TileState) {
        self.0 |= state.bit();
    }

    pub fn contains(self, state: TileState) -> bool {
        self.0 & state.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Collapses the mask into one state, in order of precedence.
    pub fn aggregate(self) -> TileState {
        [
            TileState::Resolving,
            TileState::Unresolved,
            TileState::Unresolvable,
            TileState::Resolved,
            TileState::Suspended,
        ]
        .into_iter()
        .find(|s| self.contains(*s))
        .unwrap_or(TileState::Unresolved)
    }
}
