//! Regula CLI: compile a pattern against a tokenizer and exercise the guide.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokenizers::Tokenizer as HfTokenizer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use regula_automata::ByteAutomaton;
use regula_core::{Config, TokenId};
use regula_runtime::{regex, Guide, GuideCache, ModelBackend, TokenGuide, VocabIndex, Vocabulary};

#[derive(Parser)]
#[command(name = "regula", about = "Regex-constrained decoding tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Path to a Hugging Face `tokenizer.json`
    #[arg(long)]
    tokenizer: PathBuf,

    /// Regular expression the generated text must match
    #[arg(long)]
    pattern: String,

    /// JSON configuration file (compile limits, indexing and cache options)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the end-of-sequence token id
    #[arg(long)]
    eos_token_id: Option<TokenId>,
}

#[derive(Subcommand)]
enum Command {
    /// Build the guide and print automaton and index statistics
    Compile {
        #[command(flatten)]
        common: Common,
    },
    /// List the tokens allowed after a prefix of token ids
    Allowed {
        #[command(flatten)]
        common: Common,

        /// Comma-separated token ids already generated
        #[arg(long, value_delimiter = ',')]
        prefix: Vec<TokenId>,

        /// Maximum number of tokens to print
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Tokenize a string and check that the guide accepts it
    Check {
        #[command(flatten)]
        common: Common,

        /// Text to tokenize and check
        text: String,
    },
    /// Random walk through the guide, printing the produced text
    Sample {
        #[command(flatten)]
        common: Common,

        /// RNG seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Stop after this many tokens
        #[arg(long, default_value = "64")]
        max_tokens: usize,

        /// Model backend to build the generator for
        #[arg(long, default_value = "transformers")]
        backend: ModelBackend,
    },
}

/// Everything loaded from the command line before a guide is built.
struct Session {
    vocab: VocabIndex,
    config: Config,
}

impl Session {
    fn load(common: &Common) -> anyhow::Result<Self> {
        let config = match &common.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        let vocab = Vocabulary::from_tokenizer_file(&common.tokenizer, common.eos_token_id)
            .with_context(|| format!("Failed to load vocabulary {}", common.tokenizer.display()))?;
        let vocab = VocabIndex::from(vocab);
        info!(
            "Vocabulary ready: {} tokens, eos {}, {} partial UTF-8 tokens",
            vocab.len(),
            vocab.eos_token_id(),
            vocab.partial_utf8_tokens()
        );
        Ok(Self { vocab, config })
    }

    fn guide(&self, pattern: &str) -> anyhow::Result<Guide> {
        Ok(Guide::new(pattern, &self.vocab, &self.config)?)
    }

    fn describe(&self, token_id: TokenId) -> String {
        if token_id == self.vocab.eos_token_id() {
            return "<eos>".to_string();
        }
        let bytes = self.vocab.vocabulary().token_bytes(token_id);
        format!("{:?}", String::from_utf8_lossy(bytes))
    }
}

fn compile(common: &Common) -> anyhow::Result<()> {
    let session = Session::load(common)?;
    let started = Instant::now();
    let guide = session.guide(&common.pattern)?;
    let elapsed = started.elapsed();

    let dfa = guide.automaton();
    println!("pattern:            {:?}", guide.pattern());
    println!("byte classes:       {}", dfa.byte_classes().len());
    println!("automaton states:   {}", dfa.state_count());
    println!("accepting states:   {}", dfa.accepting_states().count());
    println!("reachable states:   {}", guide.reachable_states().count());
    println!("token transitions:  {}", guide.transition_count());
    println!("vocabulary size:    {}", guide.vocab_size());
    println!("build time:         {elapsed:?}");
    Ok(())
}

fn allowed(common: &Common, prefix: &[TokenId], limit: usize) -> anyhow::Result<()> {
    let session = Session::load(common)?;
    let guide = session.guide(&common.pattern)?;

    let mut state = guide.initial_state();
    for &token in prefix {
        state = guide
            .advance(state, token)
            .with_context(|| format!("Prefix token {token} ({}) is not allowed", session.describe(token)))?;
    }

    let tokens = guide.allowed_tokens(state);
    println!(
        "state {state}: {} allowed tokens{}",
        tokens.len(),
        if guide.is_final(state) { " (final)" } else { "" }
    );
    for &token in tokens.iter().take(limit) {
        println!("{token:>8}  {}", session.describe(token));
    }
    if tokens.len() > limit {
        println!("... {} more", tokens.len() - limit);
    }
    Ok(())
}

fn check(common: &Common, text: &str) -> anyhow::Result<()> {
    let session = Session::load(common)?;
    let guide = session.guide(&common.pattern)?;
    let tokenizer = HfTokenizer::from_file(&common.tokenizer)
        .map_err(|e| anyhow!("Failed to load tokenizer {}: {e}", common.tokenizer.display()))?;
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow!("Failed to tokenize input: {e}"))?;

    let mut state = guide.initial_state();
    for (position, &token) in encoding.get_ids().iter().enumerate() {
        state = match guide.advance(state, token) {
            Ok(next) => next,
            Err(_) => bail!(
                "Rejected at token {position}: {token} ({}) is not allowed",
                session.describe(token)
            ),
        };
    }
    if !guide.is_final(state) {
        bail!(
            "Rejected: input ends after {} tokens in a non-final state",
            encoding.get_ids().len()
        );
    }
    println!("accepted ({} tokens)", encoding.get_ids().len());
    Ok(())
}

fn sample(
    common: &Common,
    seed: u64,
    max_tokens: usize,
    backend: ModelBackend,
) -> anyhow::Result<()> {
    let session = Session::load(common)?;
    let cache = GuideCache::new(&session.config.cache);
    let generator = regex(backend, &common.pattern, &session.vocab, &cache, &session.config)?;
    let mut processor = generator.into_processor();
    let eos = session.vocab.eos_token_id();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut tokens = Vec::new();
    let mut last = None;
    let mut finished = false;
    for _ in 0..max_tokens {
        // Uniform random scores stand in for model logits.
        let mut logits: Vec<f32> = (0..session.vocab.len()).map(|_| rng.gen()).collect();
        processor.process(0, last, &mut logits)?;
        let token = logits
            .iter()
            .enumerate()
            .filter(|(_, logit)| logit.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(id, _)| id as TokenId)
            .context("No token is allowed")?;
        if token == eos {
            finished = true;
            break;
        }
        tokens.push(token);
        last = Some(token);
    }

    let text = session.vocab.vocabulary().decode(&tokens);
    println!("{}", String::from_utf8_lossy(&text));
    info!(
        "Sampled {} tokens ({})",
        tokens.len(),
        if finished { "complete" } else { "truncated" }
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Compile { common } => compile(common),
        Command::Allowed {
            common,
            prefix,
            limit,
        } => allowed(common, prefix, *limit),
        Command::Check { common, text } => check(common, text),
        Command::Sample {
            common,
            seed,
            max_tokens,
            backend,
        } => sample(common, *seed, *max_tokens, *backend),
    }
}
