//! Regula pattern compiler: regular expression -> Thompson NFA -> byte DFA.
//!
//! The automaton consumes bytes. Unicode classes are lowered to UTF-8
//! sequences, so a byte walk accepts exactly the encodings of matching
//! strings, and a token holding half of a multi-byte character is simply a
//! walk that stops between two bytes of that character.

pub mod dfa;
pub mod nfa;

use tracing::info;

use regula_core::{CompileConfig, Result, StateId};

pub use dfa::{ByteClasses, Dfa};
pub use nfa::{Anchor, Nfa, NfaState};

/// A byte-consuming deterministic automaton, as seen by the token indexer.
pub trait ByteAutomaton {
    fn start_state(&self) -> StateId;

    fn state_count(&self) -> usize;

    /// Follow one byte. `None` means the input can no longer match.
    fn next_state(&self, state: StateId, byte: u8) -> Option<StateId>;

    fn is_accepting(&self, state: StateId) -> bool;

    /// Outgoing transitions of `state`. Two states with equal rows accept
    /// exactly the same non-empty continuations.
    fn row(&self, state: StateId) -> &[StateId];

    /// Follow every byte of `bytes` from `state`.
    fn walk(&self, state: StateId, bytes: &[u8]) -> Option<StateId> {
        bytes
            .iter()
            .try_fold(state, |current, &byte| self.next_state(current, byte))
    }
}

/// Compile a pattern into a pruned DFA.
///
/// Matching is always against the whole generated sequence: a leading `^`
/// and a trailing `$` are implied.
pub fn compile(pattern: &str, config: &CompileConfig) -> Result<Dfa> {
    let nfa = Nfa::new(pattern, config)?;
    let dfa = Dfa::from_nfa(&nfa, config)?;
    info!(
        "Compiled pattern ({} bytes): {} NFA states, {} DFA states",
        pattern.len(),
        nfa.len(),
        dfa.state_count()
    );
    Ok(dfa)
}
