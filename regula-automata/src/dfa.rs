//! Subset construction and dead-state pruning.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use regula_core::{ComplexityBound, CompileConfig, RegulaError, Result, StateId, DEAD_STATE};

use crate::nfa::{Anchor, Nfa, NfaState};
use crate::ByteAutomaton;

/// Partition of the 256 byte values into classes the automaton never
/// distinguishes. Transition rows are indexed by class, not by byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteClasses {
    map: [u8; 256],
    len: usize,
}

impl ByteClasses {
    /// Derive classes from the byte ranges used by an NFA.
    pub fn from_nfa(nfa: &Nfa) -> Self {
        let mut boundary = [false; 256];
        for state in nfa.states() {
            if let NfaState::Range { start, end, .. } = *state {
                if start > 0 {
                    boundary[start as usize - 1] = true;
                }
                boundary[end as usize] = true;
            }
        }

        let mut map = [0u8; 256];
        let mut class = 0usize;
        for byte in 0..256usize {
            map[byte] = class as u8;
            if boundary[byte] && byte < 255 {
                class += 1;
            }
        }
        Self {
            map,
            len: class + 1,
        }
    }

    #[inline]
    pub fn get(&self, byte: u8) -> usize {
        self.map[byte as usize] as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The smallest byte of every class, in class order.
    pub fn representatives(&self) -> Vec<u8> {
        let mut reps = Vec::with_capacity(self.len);
        for byte in 0..=255u8 {
            if reps.len() == self.get(byte) {
                reps.push(byte);
            }
        }
        reps
    }
}

/// A deterministic automaton over bytes.
///
/// State 0 is the start state. Every state can reach an accepting state;
/// missing transitions are stored as [`DEAD_STATE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dfa {
    classes: ByteClasses,
    /// Row-major `state * classes.len() + class` table.
    transitions: Vec<StateId>,
    accepting: Vec<bool>,
}

impl Dfa {
    /// Determinize `nfa` and prune states that cannot reach a match.
    pub fn from_nfa(nfa: &Nfa, config: &CompileConfig) -> Result<Self> {
        let dfa = determinize(nfa, config)?;
        let before = dfa.state_count();
        let dfa = dfa.prune()?;
        debug!(
            "DFA built: {} states ({} pruned), {} byte classes",
            dfa.state_count(),
            before - dfa.state_count(),
            dfa.classes.len()
        );
        Ok(dfa)
    }

    pub fn byte_classes(&self) -> &ByteClasses {
        &self.classes
    }

    pub fn accepting_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.accepting
            .iter()
            .enumerate()
            .filter(|(_, &accepting)| accepting)
            .map(|(id, _)| id as StateId)
    }

    /// Number of defined (non-dead) transitions, counted per byte class.
    pub fn transition_count(&self) -> usize {
        self.transitions.iter().filter(|&&t| t != DEAD_STATE).count()
    }

    /// Whether the whole input is matched by the pattern.
    pub fn is_match(&self, bytes: &[u8]) -> bool {
        self.walk(self.start_state(), bytes)
            .is_some_and(|state| self.is_accepting(state))
    }

    fn stride(&self) -> usize {
        self.classes.len()
    }

    /// Drop states with no path to an accepting state and renumber the rest
    /// breadth-first from the start state.
    fn prune(self) -> Result<Self> {
        let count = self.state_count();
        let stride = self.stride();

        let mut predecessors: Vec<Vec<StateId>> = vec![Vec::new(); count];
        for (state, row) in self.transitions.chunks(stride).enumerate() {
            for &next in row {
                if next != DEAD_STATE {
                    predecessors[next as usize].push(state as StateId);
                }
            }
        }

        let mut live = self.accepting.clone();
        let mut stack: Vec<StateId> = self.accepting_states().collect();
        while let Some(state) = stack.pop() {
            for &pred in &predecessors[state as usize] {
                if !live[pred as usize] {
                    live[pred as usize] = true;
                    stack.push(pred);
                }
            }
        }
        if !live[0] {
            return Err(RegulaError::UnsatisfiablePattern(
                "the pattern does not match any string".into(),
            ));
        }

        let mut remap = vec![DEAD_STATE; count];
        let mut order = vec![0 as StateId];
        remap[0] = 0;
        let mut queue = VecDeque::from([0 as StateId]);
        while let Some(state) = queue.pop_front() {
            for &next in self.row(state) {
                if next != DEAD_STATE && live[next as usize] && remap[next as usize] == DEAD_STATE {
                    remap[next as usize] = order.len() as StateId;
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }

        let mut transitions = Vec::with_capacity(order.len() * stride);
        let mut accepting = Vec::with_capacity(order.len());
        for &old in &order {
            transitions.extend(self.row(old).iter().map(|&next| {
                if next == DEAD_STATE {
                    DEAD_STATE
                } else {
                    remap[next as usize]
                }
            }));
            accepting.push(self.accepting[old as usize]);
        }

        Ok(Self {
            classes: self.classes,
            transitions,
            accepting,
        })
    }
}

impl ByteAutomaton for Dfa {
    fn start_state(&self) -> StateId {
        0
    }

    fn state_count(&self) -> usize {
        self.accepting.len()
    }

    #[inline]
    fn next_state(&self, state: StateId, byte: u8) -> Option<StateId> {
        if state as usize >= self.state_count() {
            return None;
        }
        let next = self.transitions[state as usize * self.stride() + self.classes.get(byte)];
        (next != DEAD_STATE).then_some(next)
    }

    fn is_accepting(&self, state: StateId) -> bool {
        self.accepting.get(state as usize).copied().unwrap_or(false)
    }

    fn row(&self, state: StateId) -> &[StateId] {
        let start = state as usize * self.stride();
        self.transitions.get(start..start + self.stride()).unwrap_or(&[])
    }
}

/// The identity of a DFA state: the byte-consuming NFA states it contains,
/// plus whether the sequence may end here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateSet {
    states: Vec<StateId>,
    accepting: bool,
}

impl StateSet {
    fn is_dead(&self) -> bool {
        self.states.is_empty() && !self.accepting
    }
}

/// Reusable scratch space for epsilon closures.
struct Closure {
    stamp: u32,
    /// `seen[after_end][nfa_state] == stamp` once visited in this closure.
    seen: [Vec<u32>; 2],
    stack: Vec<(StateId, bool)>,
}

impl Closure {
    fn new(nfa_len: usize) -> Self {
        Self {
            stamp: 0,
            seen: [vec![0; nfa_len], vec![0; nfa_len]],
            stack: Vec::new(),
        }
    }

    /// Follow epsilon edges from `seeds`.
    ///
    /// `^` is crossed only when `at_start`. Crossing `$` leaves the closure in
    /// "after end" mode, where no byte can be consumed any more but reaching
    /// the match state still makes the set accepting.
    fn compute(&mut self, nfa: &Nfa, seeds: &[StateId], at_start: bool) -> StateSet {
        self.stamp += 1;
        let stamp = self.stamp;
        let mut states = Vec::new();
        let mut accepting = false;

        self.stack.extend(seeds.iter().map(|&s| (s, false)));
        while let Some((id, after_end)) = self.stack.pop() {
            let seen = &mut self.seen[after_end as usize][id as usize];
            if *seen == stamp {
                continue;
            }
            *seen = stamp;

            match nfa.state(id) {
                NfaState::Range { .. } => {
                    if !after_end {
                        states.push(id);
                    }
                }
                NfaState::Epsilon(next) => self.stack.push((*next, after_end)),
                NfaState::Union(alternatives) => {
                    self.stack
                        .extend(alternatives.iter().rev().map(|&alt| (alt, after_end)));
                }
                NfaState::Anchor {
                    anchor: Anchor::Start,
                    next,
                } => {
                    if at_start {
                        self.stack.push((*next, after_end));
                    }
                }
                NfaState::Anchor {
                    anchor: Anchor::End,
                    next,
                } => self.stack.push((*next, true)),
                NfaState::Match => accepting = true,
            }
        }

        states.sort_unstable();
        StateSet { states, accepting }
    }
}

fn determinize(nfa: &Nfa, config: &CompileConfig) -> Result<Dfa> {
    let classes = ByteClasses::from_nfa(nfa);
    let representatives = classes.representatives();
    let stride = classes.len();
    let mut closure = Closure::new(nfa.len());

    let start = closure.compute(nfa, &[nfa.start()], true);
    if start.is_dead() {
        return Err(RegulaError::UnsatisfiablePattern(
            "the pattern does not match any string".into(),
        ));
    }

    let mut ids: HashMap<StateSet, StateId> = HashMap::new();
    let mut sets: Vec<StateSet> = Vec::new();
    let mut transitions: Vec<StateId> = Vec::new();
    let mut accepting: Vec<bool> = Vec::new();
    let mut queue: VecDeque<StateId> = VecDeque::new();

    ids.insert(start.clone(), 0);
    accepting.push(start.accepting);
    transitions.resize(stride, DEAD_STATE);
    sets.push(start);
    queue.push_back(0);

    let mut targets = Vec::new();
    while let Some(current) = queue.pop_front() {
        for (class, &byte) in representatives.iter().enumerate() {
            targets.clear();
            for &id in &sets[current as usize].states {
                if let NfaState::Range { start, end, next } = *nfa.state(id) {
                    if start <= byte && byte <= end {
                        targets.push(next);
                    }
                }
            }
            if targets.is_empty() {
                continue;
            }

            let set = closure.compute(nfa, &targets, false);
            if set.is_dead() {
                continue;
            }
            let next = match ids.get(&set) {
                Some(&id) => id,
                None => {
                    if sets.len() >= config.max_dfa_states {
                        return Err(RegulaError::too_complex(
                            ComplexityBound::DfaStates,
                            config.max_dfa_states,
                        ));
                    }
                    let id = sets.len() as StateId;
                    ids.insert(set.clone(), id);
                    accepting.push(set.accepting);
                    transitions.resize(transitions.len() + stride, DEAD_STATE);
                    sets.push(set);
                    queue.push_back(id);
                    id
                }
            };
            transitions[current as usize * stride + class] = next;
        }
    }

    Ok(Dfa {
        classes,
        transitions,
        accepting,
    })
}
