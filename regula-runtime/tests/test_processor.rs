//! Tests for sequence cursors, logits processing, and backend dispatch.

use std::sync::Arc;

use regula_core::{Config, RegulaError, TokenId};
use regula_runtime::{
    regex, GeneratorAdapter, Guide, GuideCache, ModelBackend, RegexLogitsProcessor, SequenceGuide,
    TokenGuide, VocabIndex, Vocabulary,
};

const NEG_INF: f32 = f32::NEG_INFINITY;

/// 0="a", 1="b", 2="ab", 3=EOS
fn test_vocab() -> VocabIndex {
    VocabIndex::from(Vocabulary::from_strs(3, &["a", "b", "ab", ""]).unwrap())
}

fn test_guide() -> Arc<dyn TokenGuide> {
    Arc::new(Guide::new("a|ab", &test_vocab(), &Config::default()).unwrap())
}

fn allowed_ids(logits: &[f32]) -> Vec<TokenId> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, &l)| l != NEG_INF)
        .map(|(id, _)| id as TokenId)
        .collect()
}

// ===== SequenceGuide =====

#[test]
fn test_sequence_guide_walk() {
    let mut seq = SequenceGuide::new(test_guide());
    assert_eq!(seq.allowed_tokens(), &[0, 2]);
    assert!(!seq.can_terminate());

    seq.advance(0).unwrap();
    assert!(seq.can_terminate());
    assert_eq!(seq.allowed_tokens(), &[1, 3]);

    seq.advance(3).unwrap();
    assert!(seq.is_finished());
    assert_eq!(seq.allowed_tokens(), &[3]);
    // Padding with end-of-sequence after finishing is fine, anything else is not.
    assert!(seq.advance(3).is_ok());
    assert!(matches!(
        seq.advance(1),
        Err(RegulaError::InvalidTransition { token_id: 1, .. })
    ));

    seq.reset();
    assert!(!seq.is_finished());
    assert_eq!(seq.allowed_tokens(), &[0, 2]);
}

#[test]
fn test_finished_sequence_masks_all_but_eos() {
    let mut seq = SequenceGuide::new(test_guide());
    seq.advance(2).unwrap();
    seq.advance(3).unwrap();
    let mut logits = vec![0.5f32; 6];
    seq.mask_logits(&mut logits);
    assert_eq!(allowed_ids(&logits), vec![3]);
}

// ===== RegexLogitsProcessor =====

#[test]
fn test_processor_tracks_sequences_independently() {
    let mut processor = RegexLogitsProcessor::new(test_guide());

    let mut first = vec![0.0f32; 4];
    processor.process(7, None, &mut first).unwrap();
    assert_eq!(allowed_ids(&first), vec![0, 2]);

    let mut second = vec![0.0f32; 4];
    processor.process(9, None, &mut second).unwrap();
    let mut first = vec![0.0f32; 4];
    processor.process(7, Some(2), &mut first).unwrap();
    assert_eq!(allowed_ids(&first), vec![3]);

    let mut second = vec![0.0f32; 4];
    processor.process(9, Some(0), &mut second).unwrap();
    assert_eq!(allowed_ids(&second), vec![1, 3]);

    assert_eq!(processor.active_sequences(), 2);
    let mut first = vec![0.0f32; 4];
    processor.process(7, Some(3), &mut first).unwrap();
    assert!(processor.is_finished(7));
    assert!(!processor.is_finished(9));

    let finished = processor.finish(7).unwrap();
    assert!(finished.is_finished());
    assert_eq!(processor.active_sequences(), 1);
}

#[test]
fn test_process_batch_masks_each_row() {
    let mut processor = RegexLogitsProcessor::new(test_guide());
    let mut logits = vec![1.0f32; 8];
    processor.process_batch(&[(1, None), (2, None)], &mut logits).unwrap();

    let mut logits = vec![1.0f32; 8];
    processor
        .process_batch(&[(1, Some(0)), (2, Some(2))], &mut logits)
        .unwrap();
    assert_eq!(allowed_ids(&logits[..4]), vec![1, 3]);
    assert_eq!(allowed_ids(&logits[4..]), vec![3]);
}

#[test]
fn test_process_batch_rejects_ragged_rows() {
    let mut processor = RegexLogitsProcessor::new(test_guide());
    let mut logits = vec![0.0f32; 7];
    let err = processor
        .process_batch(&[(1, None), (2, None)], &mut logits)
        .unwrap_err();
    assert!(matches!(err, RegulaError::InvalidArgument(_)));
}

#[test]
fn test_process_batch_rejects_empty_logits() {
    let mut processor = RegexLogitsProcessor::new(test_guide());
    let err = processor
        .process_batch(&[(1, None), (2, None)], &mut [])
        .unwrap_err();
    assert!(matches!(err, RegulaError::InvalidArgument(_)));
    assert_eq!(processor.active_sequences(), 0);
}

#[test]
fn test_failed_batch_leaves_every_sequence_unchanged() {
    // 0="a", 1="b", 2=EOS
    let vocab = VocabIndex::from(Vocabulary::from_strs(2, &["a", "b", ""]).unwrap());
    let guide: Arc<dyn TokenGuide> =
        Arc::new(Guide::new("a+", &vocab, &Config::default()).unwrap());
    let start = guide.initial_state();
    let mut processor = RegexLogitsProcessor::new(guide);

    let mut logits = vec![0.0f32; 6];
    processor.process_batch(&[(1, None), (2, None)], &mut logits).unwrap();

    let mut logits = vec![0.0f32; 6];
    let err = processor
        .process_batch(&[(1, Some(0)), (2, Some(1))], &mut logits)
        .unwrap_err();
    assert!(matches!(err, RegulaError::InvalidTransition { token_id: 1, .. }));
    assert_eq!(processor.sequence(1).unwrap().state(), start);
    assert_eq!(processor.sequence(2).unwrap().state(), start);
    assert_eq!(logits, vec![0.0f32; 6]);

    // Retrying the legal half advances sequence 1 exactly once.
    let mut logits = vec![0.0f32; 3];
    processor.process_batch(&[(1, Some(0))], &mut logits).unwrap();
    assert_eq!(allowed_ids(&logits), vec![0, 2]);
}

#[test]
fn test_process_batch_rejects_repeated_sequence() {
    let mut processor = RegexLogitsProcessor::new(test_guide());
    let mut logits = vec![0.0f32; 8];
    let err = processor
        .process_batch(&[(1, None), (1, None)], &mut logits)
        .unwrap_err();
    assert!(matches!(err, RegulaError::InvalidArgument(_)));
}

#[test]
fn test_processor_rejects_illegal_token() {
    let mut processor = RegexLogitsProcessor::new(test_guide());
    let mut logits = vec![0.0f32; 4];
    processor.process(1, None, &mut logits).unwrap();
    let err = processor.process(1, Some(1), &mut logits).unwrap_err();
    assert!(matches!(err, RegulaError::InvalidTransition { .. }));
}

// ===== Backend dispatch =====

#[test]
fn test_local_backends_share_cached_guide() {
    let vocab = test_vocab();
    let cache = GuideCache::unbounded();
    let config = Config::default();

    let text = regex(ModelBackend::Transformers, "a|ab", &vocab, &cache, &config).unwrap();
    assert_eq!(text.adapter(), GeneratorAdapter::Text);
    assert!(!text.is_multimodal());

    let vision = regex(ModelBackend::TransformersVision, "a|ab", &vocab, &cache, &config).unwrap();
    assert!(vision.is_multimodal());
    assert!(Arc::ptr_eq(text.guide(), vision.guide()));
    assert_eq!(cache.build_count(), 1);

    for backend in [ModelBackend::LlamaCpp, ModelBackend::Mlx, ModelBackend::Vllm] {
        let generator = regex(backend, "a|ab", &vocab, &cache, &config).unwrap();
        assert_eq!(generator.backend(), backend);
        assert_eq!(generator.adapter(), GeneratorAdapter::Text);
    }
    assert_eq!(cache.build_count(), 1);
}

#[test]
fn test_generator_processor_enforces_pattern() {
    let vocab = test_vocab();
    let cache = GuideCache::unbounded();
    let mut generator =
        regex(ModelBackend::Vllm, "a|ab", &vocab, &cache, &Config::default()).unwrap();
    let mut logits = vec![0.0f32; 4];
    generator.processor_mut().process(0, None, &mut logits).unwrap();
    assert_eq!(allowed_ids(&logits), vec![0, 2]);
    assert_eq!(generator.processor().active_sequences(), 1);
    assert_eq!(generator.into_processor().active_sequences(), 1);
}

#[test]
fn test_openai_backend_is_unsupported() {
    let vocab = test_vocab();
    let cache = GuideCache::unbounded();
    let result = regex(ModelBackend::OpenAi, "a|ab", &vocab, &cache, &Config::default());
    assert!(matches!(result, Err(RegulaError::UnsupportedBackend(_))));
    assert!(!ModelBackend::OpenAi.supports_logits_processing());
    assert_eq!(cache.build_count(), 0);
}

#[test]
fn test_backend_names_round_trip() {
    for backend in ModelBackend::ALL {
        assert_eq!(backend.name().parse::<ModelBackend>().unwrap(), backend);
    }
    assert_eq!("LLAMA_CPP".parse::<ModelBackend>().unwrap(), ModelBackend::LlamaCpp);
    assert!(matches!(
        "anthropic".parse::<ModelBackend>(),
        Err(RegulaError::InvalidArgument(_))
    ));
}
