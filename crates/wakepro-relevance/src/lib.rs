//! Wakepro Topic Relevance
//!
//! Incremental, per-group bag-of-words similarity between a user message and
//! the agent's recent replies.

mod corpus;
mod tokenizer;

pub use corpus::TopicCorpus;
pub use tokenizer::{Tokenizer, DEFAULT_STOPWORDS};

use tracing::debug;
use wakepro_config::{RelevanceConfig, RelevanceModel};

/// A message and its comparison targets, already segmented.
#[derive(Debug, Clone, Default)]
pub struct PreparedQuery {
    pub doc: Vec<String>,
    pub candidates: Vec<Vec<String>>,
}

/// Tokenization and corpus construction shared by every group of one
/// deployment, so all groups score with the same model.
#[derive(Debug, Clone)]
pub struct RelevanceEngine {
    tokenizer: Tokenizer,
    model: RelevanceModel,
    history_limit: usize,
    template_threshold: usize,
}

impl RelevanceEngine {
    pub fn new(config: &RelevanceConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(config.stopwords.as_deref()),
            model: config.model,
            history_limit: config.history_limit,
            template_threshold: config.template_threshold,
        }
    }

    pub fn new_corpus(&self) -> TopicCorpus {
        TopicCorpus::new(self.model, self.history_limit)
    }

    pub fn model(&self) -> RelevanceModel {
        self.model
    }

    /// Segments `text` and the candidates. Candidates at or below the
    /// template threshold (in characters) are boilerplate and skipped.
    pub fn prepare(&self, text: &str, candidates: &[String]) -> PreparedQuery {
        let doc = self.tokenizer.tokenize(text);
        let candidates = candidates
            .iter()
            .filter(|c| c.chars().count() > self.template_threshold)
            .map(|c| self.tokenizer.tokenize(c))
            .filter(|tokens| !tokens.is_empty())
            .collect();
        PreparedQuery { doc, candidates }
    }

    pub fn similarity(&self, corpus: &mut TopicCorpus, text: &str, candidates: &[String]) -> f64 {
        let prepared = self.prepare(text, candidates);
        let score = corpus.score(&prepared.doc, &prepared.candidates);
        debug!(
            "relevance {:.3} over {} candidate(s) for {:?}",
            score,
            prepared.candidates.len(),
            prepared.doc
        );
        score
    }
}

impl Default for RelevanceEngine {
    fn default() -> Self {
        Self::new(&RelevanceConfig::default())
    }
}
