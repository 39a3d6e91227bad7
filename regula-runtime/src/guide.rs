//! The runtime guide: allowed tokens per state and token-driven transitions.

use std::time::Instant;

use tracing::info;

use regula_automata::{ByteAutomaton, Dfa};
use regula_core::{Config, IndexConfig, RegulaError, Result, StateId, TokenId};

use crate::index::{build_tables, StateTokenTable, TokenTransitionTable};
use crate::vocab::VocabIndex;

/// Token-level view of a constraint.
///
/// Implementations are immutable; per-sequence progress is the `StateId`
/// held by the caller, so one guide can serve any number of concurrent
/// sequences.
pub trait TokenGuide: Send + Sync {
    fn initial_state(&self) -> StateId;

    /// Tokens legal from `state`, in ascending order.
    fn allowed_tokens(&self, state: StateId) -> &[TokenId];

    /// Follow `token_id` from `state`. The token must be one of
    /// `allowed_tokens(state)`. End-of-sequence leads to a terminal state
    /// from which only end-of-sequence is allowed.
    fn advance(&self, state: StateId, token_id: TokenId) -> Result<StateId>;

    /// Whether the sequence may end in `state`.
    fn is_final(&self, state: StateId) -> bool;

    fn eos_token_id(&self) -> TokenId;

    /// Set the logits of every token not allowed from `state` to -inf.
    fn mask_logits(&self, state: StateId, logits: &mut [f32]) {
        let mut allowed = self.allowed_tokens(state).iter().peekable();
        for (id, logit) in logits.iter_mut().enumerate() {
            match allowed.peek() {
                Some(&&token) if token as usize == id => {
                    allowed.next();
                }
                _ => *logit = f32::NEG_INFINITY,
            }
        }
    }

    /// Fill `mask[id]` with whether token `id` is allowed from `state`.
    fn allowed_mask(&self, state: StateId, mask: &mut [bool]) {
        mask.fill(false);
        for &token in self.allowed_tokens(state) {
            if let Some(slot) = mask.get_mut(token as usize) {
                *slot = true;
            }
        }
    }
}

/// A compiled pattern indexed against one vocabulary.
#[derive(Debug, Clone)]
pub struct Guide {
    pattern: String,
    dfa: Dfa,
    eos_token_id: TokenId,
    vocab_size: usize,
    states: StateTokenTable,
    transitions: TokenTransitionTable,
}

impl Guide {
    /// Compile `pattern` and index it against `vocab`.
    pub fn new(pattern: &str, vocab: &VocabIndex, config: &Config) -> Result<Self> {
        let dfa = regula_automata::compile(pattern, &config.compile)?;
        Self::from_parts(pattern, dfa, vocab, &config.index)
    }

    /// Index an already compiled automaton against `vocab`.
    pub fn from_parts(
        pattern: impl Into<String>,
        dfa: Dfa,
        vocab: &VocabIndex,
        config: &IndexConfig,
    ) -> Result<Self> {
        let started = Instant::now();
        let (states, transitions) = build_tables(&dfa, vocab, config)?;
        let guide = Self {
            pattern: pattern.into(),
            dfa,
            eos_token_id: vocab.eos_token_id(),
            vocab_size: vocab.len(),
            states,
            transitions,
        };
        info!(
            "Guide ready: {} automaton states, {} token transitions, vocabulary of {} in {:?}",
            guide.state_count(),
            guide.transition_count(),
            guide.vocab_size,
            started.elapsed()
        );
        Ok(guide)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn automaton(&self) -> &Dfa {
        &self.dfa
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Indexed states, the terminal state included.
    pub fn state_count(&self) -> usize {
        self.states.state_count()
    }

    /// State reached by end-of-sequence.
    pub fn terminal_state(&self) -> StateId {
        self.states.terminal_state()
    }

    /// Number of `(state, token)` transitions, end-of-sequence included.
    pub fn transition_count(&self) -> usize {
        self.transitions.transition_count()
    }

    pub fn state_tokens(&self) -> &StateTokenTable {
        &self.states
    }

    pub fn token_transitions(&self) -> &TokenTransitionTable {
        &self.transitions
    }

    /// States the guide can reach from its initial state.
    pub fn reachable_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.reachable_states()
    }
}

impl TokenGuide for Guide {
    fn initial_state(&self) -> StateId {
        self.dfa.start_state()
    }

    #[inline]
    fn allowed_tokens(&self, state: StateId) -> &[TokenId] {
        self.states.allowed(state)
    }

    #[inline]
    fn advance(&self, state: StateId, token_id: TokenId) -> Result<StateId> {
        self.transitions
            .next_state(state, token_id)
            .ok_or(RegulaError::InvalidTransition { state, token_id })
    }

    fn is_final(&self, state: StateId) -> bool {
        if state == self.states.terminal_state() {
            return true;
        }
        // States dropped by token pruning have no row and are never final.
        self.dfa.is_accepting(state) && !self.states.allowed(state).is_empty()
    }

    fn eos_token_id(&self) -> TokenId {
        self.eos_token_id
    }
}
