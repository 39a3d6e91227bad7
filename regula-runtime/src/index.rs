//! State-to-token indexing.
//!
//! For every automaton state we need the set of vocabulary tokens whose bytes
//! can be consumed from that state, and where each of them leads. Doing this
//! per (state, token) pair is `states x vocabulary x token length`; instead:
//!
//! - states with identical transition rows accept identical continuations, so
//!   only one representative per row is walked;
//! - each walk is a depth-first traversal of the vocabulary trie guided by the
//!   automaton, so a shared prefix is consumed once and a dead prefix prunes
//!   every token below it;
//! - representatives are walked in parallel with rayon.
//!
//! The resulting token graph is then pruned to states that are reachable from
//! the start state and can still reach an accepting state through tokens.
//!
//! Both tables carry one state past the automaton's own: the terminal state
//! entered by end-of-sequence, whose only legal token is end-of-sequence.

use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use regula_automata::ByteAutomaton;
use regula_core::{IndexConfig, RegulaError, Result, StateId, TokenId};

use crate::vocab::{TokenTrie, VocabIndex};

/// `state -> tokens legal from that state`, each slice in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTokenTable {
    allowed: Vec<Box<[TokenId]>>,
    terminal: StateId,
}

impl StateTokenTable {
    /// Allowed tokens of `state`; empty for unreachable or unknown states.
    pub fn allowed(&self, state: StateId) -> &[TokenId] {
        self.allowed
            .get(state as usize)
            .map(|tokens| &tokens[..])
            .unwrap_or(&[])
    }

    /// Automaton states plus the terminal state.
    pub fn state_count(&self) -> usize {
        self.allowed.len()
    }

    /// State entered once end-of-sequence has been emitted.
    pub fn terminal_state(&self) -> StateId {
        self.terminal
    }

    /// States with at least one allowed token.
    pub fn reachable_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.allowed
            .iter()
            .enumerate()
            .filter(|(_, tokens)| !tokens.is_empty())
            .map(|(state, _)| state as StateId)
    }

    pub fn entry_count(&self) -> usize {
        self.allowed.iter().map(|tokens| tokens.len()).sum()
    }
}

/// `(state, token) -> next state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransitionTable {
    rows: Vec<HashMap<TokenId, StateId>>,
}

impl TokenTransitionTable {
    #[inline]
    pub fn next_state(&self, state: StateId, token_id: TokenId) -> Option<StateId> {
        self.rows.get(state as usize)?.get(&token_id).copied()
    }

    pub fn transition_count(&self) -> usize {
        self.rows.iter().map(HashMap::len).sum()
    }
}

/// Build the state-token and token-transition tables for `automaton`.
///
/// The end-of-sequence token is legal exactly in accepting states and leads
/// to the terminal state, numbered `automaton.state_count()`. Empty-text
/// tokens are no-op self transitions unless `config.skip_empty_tokens` is
/// set. Fails with `UnsatisfiablePattern` when no token sequence from the
/// start state completes a match.
pub fn build_tables<A>(
    automaton: &A,
    vocab: &VocabIndex,
    config: &IndexConfig,
) -> Result<(StateTokenTable, TokenTransitionTable)>
where
    A: ByteAutomaton + Sync,
{
    let started = Instant::now();
    let state_count = automaton.state_count();

    // Group states sharing a transition row.
    let mut representatives: Vec<StateId> = Vec::new();
    let mut group_of: Vec<usize> = Vec::with_capacity(state_count);
    {
        let mut by_row: HashMap<&[StateId], usize> = HashMap::new();
        for state in 0..state_count as StateId {
            let group = *by_row.entry(automaton.row(state)).or_insert_with(|| {
                representatives.push(state);
                representatives.len() - 1
            });
            group_of.push(group);
        }
    }

    let trie = vocab.trie();
    let walk = |&state: &StateId| walk_trie(automaton, trie, state);
    let walks: Vec<Vec<(TokenId, StateId)>> = if config.parallel {
        representatives.par_iter().map(walk).collect()
    } else {
        representatives.iter().map(walk).collect()
    };
    debug!(
        "Walked {} row groups for {} states in {:?}",
        representatives.len(),
        state_count,
        started.elapsed()
    );

    let eos = vocab.eos_token_id();
    let empty_tokens: &[TokenId] = if config.skip_empty_tokens {
        &[]
    } else {
        vocab.empty_tokens()
    };
    let mut edges: Vec<Vec<(TokenId, StateId)>> = (0..state_count)
        .map(|s| {
            let state = s as StateId;
            let mut row = walks[group_of[s]].clone();
            row.extend(empty_tokens.iter().map(|&token| (token, state)));
            if automaton.is_accepting(state) {
                row.push((eos, state));
            }
            row.sort_unstable_by_key(|&(token, _)| token);
            row
        })
        .collect();

    let start = automaton.start_state();
    let live = token_live_states(automaton, &edges, start);
    if !live[start as usize] {
        return Err(RegulaError::UnsatisfiablePattern(format!(
            "no sequence of tokens from a vocabulary of {} can complete a match",
            vocab.len()
        )));
    }

    let terminal = state_count as StateId;
    for (state, row) in edges.iter_mut().enumerate() {
        if live[state] {
            row.retain(|&(_, next)| live[next as usize]);
            for edge in row.iter_mut().filter(|(token, _)| *token == eos) {
                edge.1 = terminal;
            }
        } else {
            row.clear();
        }
    }
    edges.push(vec![(eos, terminal)]);

    let allowed = edges
        .iter()
        .map(|row| row.iter().map(|&(token, _)| token).collect())
        .collect();
    let rows = edges
        .into_iter()
        .map(|row| row.into_iter().collect())
        .collect();
    let states = StateTokenTable { allowed, terminal };
    let transitions = TokenTransitionTable { rows };

    info!(
        "Indexed {} reachable states, {} transitions in {:?}",
        states.reachable_states().count(),
        transitions.transition_count(),
        started.elapsed()
    );
    Ok((states, transitions))
}

/// Follow the vocabulary trie from `state`, returning every token whose bytes
/// the automaton consumes completely, with the state it ends in.
fn walk_trie<A: ByteAutomaton>(
    automaton: &A,
    trie: &TokenTrie,
    state: StateId,
) -> Vec<(TokenId, StateId)> {
    let mut found = Vec::new();
    let mut stack = vec![(TokenTrie::ROOT, state)];
    while let Some((node, current)) = stack.pop() {
        found.extend(trie.tokens(node).iter().map(|&token| (token, current)));
        for &(byte, child) in trie.children(node) {
            if let Some(next) = automaton.next_state(current, byte) {
                stack.push((child, next));
            }
        }
    }
    found
}

/// States reachable from `start` through token edges that can also reach an
/// accepting state through token edges.
fn token_live_states<A: ByteAutomaton>(
    automaton: &A,
    edges: &[Vec<(TokenId, StateId)>],
    start: StateId,
) -> Vec<bool> {
    let count = edges.len();

    let mut reachable = vec![false; count];
    reachable[start as usize] = true;
    let mut stack = vec![start];
    while let Some(state) = stack.pop() {
        for &(_, next) in &edges[state as usize] {
            if !reachable[next as usize] {
                reachable[next as usize] = true;
                stack.push(next);
            }
        }
    }

    let mut predecessors: Vec<Vec<StateId>> = vec![Vec::new(); count];
    for (state, row) in edges.iter().enumerate() {
        if !reachable[state] {
            continue;
        }
        for &(_, next) in row {
            if next as usize != state {
                predecessors[next as usize].push(state as StateId);
            }
        }
    }

    let mut live = vec![false; count];
    let mut stack: Vec<StateId> = (0..count as StateId)
        .filter(|&s| reachable[s as usize] && automaton.is_accepting(s))
        .collect();
    for &state in &stack {
        live[state as usize] = true;
    }
    while let Some(state) = stack.pop() {
        for &pred in &predecessors[state as usize] {
            if !live[pred as usize] {
                live[pred as usize] = true;
                stack.push(pred);
            }
        }
    }
    live
}
