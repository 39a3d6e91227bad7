//! Per-sequence guide cursors and batch logits processing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use regula_core::{RegulaError, Result, StateId, TokenId};

use crate::guide::TokenGuide;

/// Decoding progress of one sequence through a shared guide.
///
/// Once the end-of-sequence token has been chosen the sequence is finished
/// and the guide allows only end-of-sequence from then on.
#[derive(Clone)]
pub struct SequenceGuide {
    guide: Arc<dyn TokenGuide>,
    state: StateId,
    finished: bool,
}

impl SequenceGuide {
    pub fn new(guide: Arc<dyn TokenGuide>) -> Self {
        Self {
            state: guide.initial_state(),
            finished: false,
            guide,
        }
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether choosing end-of-sequence now would produce a full match.
    pub fn can_terminate(&self) -> bool {
        self.guide.is_final(self.state)
    }

    pub fn allowed_tokens(&self) -> &[TokenId] {
        self.guide.allowed_tokens(self.state)
    }

    pub fn advance(&mut self, token_id: TokenId) -> Result<StateId> {
        self.state = self.guide.advance(self.state, token_id)?;
        if token_id == self.guide.eos_token_id() {
            self.finished = true;
        }
        Ok(self.state)
    }

    pub fn mask_logits(&self, logits: &mut [f32]) {
        self.guide.mask_logits(self.state, logits);
    }

    pub fn reset(&mut self) {
        self.state = self.guide.initial_state();
        self.finished = false;
    }
}

impl std::fmt::Debug for SequenceGuide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceGuide")
            .field("state", &self.state)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Masks model logits so that every sequence in a batch stays within the
/// guide's language.
///
/// Each call passes the token sampled for a sequence at the previous step
/// (`None` on the first step) together with that sequence's next-token
/// logits.
pub struct RegexLogitsProcessor {
    guide: Arc<dyn TokenGuide>,
    sequences: HashMap<u64, SequenceGuide>,
}

impl RegexLogitsProcessor {
    pub fn new(guide: Arc<dyn TokenGuide>) -> Self {
        Self {
            guide,
            sequences: HashMap::new(),
        }
    }

    pub fn guide(&self) -> &Arc<dyn TokenGuide> {
        &self.guide
    }

    /// Advance sequence `seq_id` with `last_token` and mask `logits`.
    pub fn process(
        &mut self,
        seq_id: u64,
        last_token: Option<TokenId>,
        logits: &mut [f32],
    ) -> Result<()> {
        let guide = &self.guide;
        let sequence = self
            .sequences
            .entry(seq_id)
            .or_insert_with(|| SequenceGuide::new(Arc::clone(guide)));
        if let Some(token) = last_token {
            sequence.advance(token)?;
        }
        sequence.mask_logits(logits);
        Ok(())
    }

    /// Process a batch whose logits are laid out row-major, one row of equal
    /// width per entry of `batch`.
    ///
    /// Every token is checked before any sequence moves, so a rejected batch
    /// leaves all sequences where they were.
    pub fn process_batch(
        &mut self,
        batch: &[(u64, Option<TokenId>)],
        logits: &mut [f32],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if logits.is_empty() || logits.len() % batch.len() != 0 {
            return Err(RegulaError::InvalidArgument(format!(
                "{} logits cannot be split into {} equal rows",
                logits.len(),
                batch.len()
            )));
        }

        let mut seen = HashSet::with_capacity(batch.len());
        for &(seq_id, last_token) in batch {
            if !seen.insert(seq_id) {
                return Err(RegulaError::InvalidArgument(format!(
                    "sequence {seq_id} appears more than once in the batch"
                )));
            }
            if let Some(token) = last_token {
                let state = self
                    .sequences
                    .get(&seq_id)
                    .map_or_else(|| self.guide.initial_state(), SequenceGuide::state);
                self.guide.advance(state, token)?;
            }
        }

        let width = logits.len() / batch.len();
        for (&(seq_id, last_token), row) in batch.iter().zip(logits.chunks_mut(width)) {
            self.process(seq_id, last_token, row)?;
        }
        Ok(())
    }

    pub fn sequence(&self, seq_id: u64) -> Option<&SequenceGuide> {
        self.sequences.get(&seq_id)
    }

    pub fn is_finished(&self, seq_id: u64) -> bool {
        self.sequences
            .get(&seq_id)
            .is_some_and(SequenceGuide::is_finished)
    }

    /// Forget a sequence, returning its final cursor.
    pub fn finish(&mut self, seq_id: u64) -> Option<SequenceGuide> {
        let sequence = self.sequences.remove(&seq_id);
        if sequence.is_some() {
            debug!("Sequence {} released ({} active)", seq_id, self.sequences.len());
        }
        sequence
    }

    pub fn active_sequences(&self) -> usize {
        self.sequences.len()
    }
}
