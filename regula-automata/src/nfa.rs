//! Thompson construction over byte ranges.
//!
//! Patterns are parsed with `regex-syntax` into its high-level IR, then
//! lowered into an arena of NFA states. Unicode classes are expanded into
//! their UTF-8 byte sequences so the resulting automaton consumes bytes and
//! recognizes exactly the UTF-8 encodings of matching strings.

use regex_syntax::hir::{Class, Hir, HirKind, Look};
use regex_syntax::utf8::Utf8Sequences;
use regex_syntax::ParserBuilder;

use regula_core::{ComplexityBound, CompileConfig, RegulaError, Result, StateId};

/// Placeholder target for a transition that has not been patched yet.
const UNSET: StateId = StateId::MAX;

/// Zero-width assertions that survive into the automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// `^` / `\A`: holds only before the first byte.
    Start,
    /// `$` / `\z`: holds only once the sequence ends.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfaState {
    /// Consume one byte in `start..=end`.
    Range { start: u8, end: u8, next: StateId },
    Epsilon(StateId),
    Union(Vec<StateId>),
    Anchor { anchor: Anchor, next: StateId },
    Match,
}

/// A non-deterministic automaton with a single match state.
#[derive(Debug, Clone)]
pub struct Nfa {
    states: Vec<NfaState>,
    start: StateId,
}

impl Nfa {
    /// Parse `pattern` and build its Thompson NFA.
    pub fn new(pattern: &str, config: &CompileConfig) -> Result<Self> {
        let hir = parse(pattern, config)?;
        let mut builder = Builder {
            states: Vec::new(),
            config,
        };
        let body = builder.compile(&hir)?;
        let matched = builder.add(NfaState::Match)?;
        builder.patch(body.end, matched);
        Ok(Self {
            states: builder.states,
            start: body.start,
        })
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn state(&self, id: StateId) -> &NfaState {
        &self.states[id as usize]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[NfaState] {
        &self.states
    }
}

/// Parse a pattern into `regex-syntax`'s IR, enforcing the length bound.
///
/// Backreferences and look-around are rejected by the parser itself.
pub fn parse(pattern: &str, config: &CompileConfig) -> Result<Hir> {
    if pattern.len() > config.max_pattern_len {
        return Err(RegulaError::too_complex(
            ComplexityBound::PatternLength,
            config.max_pattern_len,
        ));
    }
    ParserBuilder::new()
        .utf8(true)
        .build()
        .parse(pattern)
        .map_err(|e| RegulaError::Pattern(e.to_string()))
}

/// A partially built sub-automaton: `end` still has a dangling transition.
#[derive(Debug, Clone, Copy)]
struct Fragment {
    start: StateId,
    end: StateId,
}

struct Builder<'c> {
    states: Vec<NfaState>,
    config: &'c CompileConfig,
}

impl Builder<'_> {
    fn add(&mut self, state: NfaState) -> Result<StateId> {
        if self.states.len() >= self.config.max_nfa_states {
            return Err(RegulaError::too_complex(
                ComplexityBound::NfaStates,
                self.config.max_nfa_states,
            ));
        }
        let id = self.states.len() as StateId;
        self.states.push(state);
        Ok(id)
    }

    /// Point the dangling transition of `from` at `to`.
    fn patch(&mut self, from: StateId, to: StateId) {
        match &mut self.states[from as usize] {
            NfaState::Range { next, .. }
            | NfaState::Epsilon(next)
            | NfaState::Anchor { next, .. } => *next = to,
            NfaState::Union(alternatives) => alternatives.push(to),
            NfaState::Match => {}
        }
    }

    fn empty(&mut self) -> Result<Fragment> {
        let id = self.add(NfaState::Epsilon(UNSET))?;
        Ok(Fragment { start: id, end: id })
    }

    fn compile(&mut self, hir: &Hir) -> Result<Fragment> {
        match hir.kind() {
            HirKind::Empty => self.empty(),
            HirKind::Literal(literal) => {
                let ranges: Vec<(u8, u8)> = literal.0.iter().map(|&b| (b, b)).collect();
                self.sequence(&ranges)
            }
            HirKind::Class(Class::Unicode(class)) => {
                let mut sequences = Vec::new();
                for range in class.ranges() {
                    for seq in Utf8Sequences::new(range.start(), range.end()) {
                        sequences.push(seq.as_slice().iter().map(|r| (r.start, r.end)).collect());
                    }
                }
                self.union_of_sequences(&sequences)
            }
            HirKind::Class(Class::Bytes(class)) => {
                let sequences: Vec<Vec<(u8, u8)>> = class
                    .ranges()
                    .iter()
                    .map(|r| vec![(r.start(), r.end())])
                    .collect();
                self.union_of_sequences(&sequences)
            }
            HirKind::Look(look) => self.look(*look),
            HirKind::Repetition(rep) => self.repetition(&rep.sub, rep.min, rep.max),
            HirKind::Capture(capture) => self.compile(&capture.sub),
            HirKind::Concat(subs) => self.concat(subs),
            HirKind::Alternation(subs) => self.alternation(subs),
        }
    }

    fn sequence(&mut self, ranges: &[(u8, u8)]) -> Result<Fragment> {
        let Some((&(lo, hi), rest)) = ranges.split_first() else {
            return self.empty();
        };
        let start = self.add(NfaState::Range {
            start: lo,
            end: hi,
            next: UNSET,
        })?;
        let mut end = start;
        for &(lo, hi) in rest {
            let id = self.add(NfaState::Range {
                start: lo,
                end: hi,
                next: UNSET,
            })?;
            self.patch(end, id);
            end = id;
        }
        Ok(Fragment { start, end })
    }

    fn union_of_sequences(&mut self, sequences: &[Vec<(u8, u8)>]) -> Result<Fragment> {
        if let [only] = sequences {
            return self.sequence(only);
        }
        // An empty class yields a union with no alternatives: it matches nothing.
        let start = self.add(NfaState::Union(Vec::new()))?;
        let end = self.add(NfaState::Epsilon(UNSET))?;
        for seq in sequences {
            let branch = self.sequence(seq)?;
            self.patch(start, branch.start);
            self.patch(branch.end, end);
        }
        Ok(Fragment { start, end })
    }

    fn look(&mut self, look: Look) -> Result<Fragment> {
        let anchor = match look {
            Look::Start => Anchor::Start,
            Look::End => Anchor::End,
            other => {
                return Err(RegulaError::Pattern(format!(
                    "unsupported assertion {other:?}: only ^ and $ anchors can be compiled"
                )))
            }
        };
        let id = self.add(NfaState::Anchor { anchor, next: UNSET })?;
        Ok(Fragment { start: id, end: id })
    }

    fn concat(&mut self, subs: &[Hir]) -> Result<Fragment> {
        let mut iter = subs.iter();
        let Some(first) = iter.next() else {
            return self.empty();
        };
        let mut fragment = self.compile(first)?;
        for sub in iter {
            let next = self.compile(sub)?;
            self.patch(fragment.end, next.start);
            fragment.end = next.end;
        }
        Ok(fragment)
    }

    fn alternation(&mut self, subs: &[Hir]) -> Result<Fragment> {
        let start = self.add(NfaState::Union(Vec::new()))?;
        let end = self.add(NfaState::Epsilon(UNSET))?;
        for sub in subs {
            let branch = self.compile(sub)?;
            self.patch(start, branch.start);
            self.patch(branch.end, end);
        }
        Ok(Fragment { start, end })
    }

    /// Expand `sub{min,max}`: `min` mandatory copies followed by either a
    /// Kleene loop (unbounded) or `max - min` optional copies.
    fn repetition(&mut self, sub: &Hir, min: u32, max: Option<u32>) -> Result<Fragment> {
        let limit = self.config.max_repetition;
        if min > limit || max.is_some_and(|max| max > limit) {
            return Err(RegulaError::too_complex(
                ComplexityBound::Repetition,
                limit as usize,
            ));
        }

        let mut fragment = self.empty()?;
        for _ in 0..min {
            let copy = self.compile(sub)?;
            self.patch(fragment.end, copy.start);
            fragment.end = copy.end;
        }

        match max {
            None => {
                let split = self.add(NfaState::Union(Vec::new()))?;
                let exit = self.add(NfaState::Epsilon(UNSET))?;
                let body = self.compile(sub)?;
                self.patch(fragment.end, split);
                self.patch(split, body.start);
                self.patch(body.end, split);
                self.patch(split, exit);
                fragment.end = exit;
            }
            Some(max) if max > min => {
                let exit = self.add(NfaState::Epsilon(UNSET))?;
                for _ in min..max {
                    let split = self.add(NfaState::Union(Vec::new()))?;
                    self.patch(fragment.end, split);
                    self.patch(split, exit);
                    let copy = self.compile(sub)?;
                    self.patch(split, copy.start);
                    fragment.end = copy.end;
                }
                self.patch(fragment.end, exit);
                fragment.end = exit;
            }
            Some(_) => {}
        }
        Ok(fragment)
    }
}
