/// Identifier of an automaton state. State 0 is always the start state.
pub type StateId = u32;

/// Identifier of a vocabulary token, dense in `0..vocab_size`.
pub type TokenId = u32;

/// Sentinel for "no transition". Never handed out as a live state.
pub const DEAD_STATE: StateId = StateId::MAX;
