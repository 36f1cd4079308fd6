use std::collections::{HashMap, HashSet, VecDeque};
use wakepro_config::RelevanceModel;

const BIGRAM_WEIGHT: f64 = 0.5;
const IMPORTANCE_DECAY: f64 = 0.9;
const IMPORTANCE_FLOOR: f64 = 0.01;
const SIGMOID_STEEPNESS: f64 = 8.0;
const SIGMOID_MIDPOINT: f64 = 0.6;

type TermVector = HashMap<String, f64>;

/// Per-group document statistics over a bounded sliding window.
///
/// Evicting a document removes its contribution to the document
/// frequencies, so the statistics always describe exactly the window.
#[derive(Debug, Clone)]
pub struct TopicCorpus {
    model: RelevanceModel,
    capacity: usize,
    window: VecDeque<Vec<String>>,
    doc_freq: HashMap<String, usize>,
    total_docs: usize,
    /// Decayed term importance; only maintained by `DecayedBigram`.
    importance: HashMap<String, f64>,
}

impl TopicCorpus {
    pub fn new(model: RelevanceModel, capacity: usize) -> Self {
        Self {
            model,
            capacity: capacity.max(1),
            window: VecDeque::new(),
            doc_freq: HashMap::new(),
            total_docs: 0,
            importance: HashMap::new(),
        }
    }

    pub fn model(&self) -> RelevanceModel {
        self.model
    }

    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    pub fn importance(&self, term: &str) -> f64 {
        self.importance.get(term).copied().unwrap_or(0.0)
    }

    /// Scores `doc` against every candidate and returns the best match.
    ///
    /// The query and every candidate are weighted with the statistics as
    /// they were before this call; `doc` is committed to the corpus
    /// afterwards. Candidates never touch the counts.
    pub fn score(&mut self, doc: &[String], candidates: &[Vec<String>]) -> f64 {
        if doc.is_empty() {
            return 0.0;
        }

        let query = self.vectorize(doc);
        let best = candidates
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| {
                let candidate = self.vectorize(c);
                self.compare(&query, &candidate)
            })
            .fold(0.0, f64::max);
        self.commit(doc);

        best
    }

    fn idf(&self, term: &str) -> f64 {
        let total = self.total_docs as f64;
        let df = self.document_frequency(term) as f64;
        ((total + 1.0) / (df + 1.0)).ln() + 1.0
    }

    fn vectorize(&self, tokens: &[String]) -> TermVector {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for t in tokens {
            *counts.entry(t.as_str()).or_default() += 1;
        }

        let mut vector: TermVector = counts
            .into_iter()
            .map(|(term, count)| (term.to_string(), count as f64 * self.idf(term)))
            .collect();

        if self.model == RelevanceModel::DecayedBigram {
            for pair in tokens.windows(2) {
                *vector
                    .entry(format!("{} {}", pair[0], pair[1]))
                    .or_default() += BIGRAM_WEIGHT;
            }
        }

        vector
    }

    fn commit(&mut self, doc: &[String]) {
        let distinct: HashSet<&String> = doc.iter().collect();
        for term in &distinct {
            *self.doc_freq.entry((*term).clone()).or_default() += 1;
        }
        self.total_docs += 1;

        if self.model == RelevanceModel::DecayedBigram {
            self.importance.retain(|_, w| {
                *w *= IMPORTANCE_DECAY;
                *w >= IMPORTANCE_FLOOR
            });
            for term in &distinct {
                *self.importance.entry((*term).clone()).or_default() += 1.0;
            }
        }

        self.window.push_back(doc.to_vec());
        while self.window.len() > self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.forget(&evicted);
            }
        }
    }

    fn forget(&mut self, doc: &[String]) {
        let distinct: HashSet<&String> = doc.iter().collect();
        for term in distinct {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_docs = self.total_docs.saturating_sub(1);
    }

    fn compare(&self, a: &TermVector, b: &TermVector) -> f64 {
        match self.model {
            RelevanceModel::Tfidf => cosine(a, b, |_| 1.0).clamp(0.0, 1.0),
            RelevanceModel::DecayedBigram => {
                if a.is_empty() || b.is_empty() {
                    return 0.0;
                }
                let raw = cosine(a, b, |term| 2.0 + self.importance(term));
                sigmoid(raw)
            }
        }
    }
}

fn cosine(a: &TermVector, b: &TermVector, boost: impl Fn(&str) -> f64) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb * boost(term)))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sigmoid(raw: f64) -> f64 {
    1.0 / (1.0 + (-SIGMOID_STEEPNESS * (raw - SIGMOID_MIDPOINT)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn identical_document_scores_one_on_empty_corpus() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        let text = doc(&["today", "sunny"]);
        let score = corpus.score(&text, &[text.clone()]);
        assert!((score - 1.0).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn identical_document_scores_one_on_populated_corpus() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        corpus.score(&doc(&["weather"]), &[]);
        corpus.score(&doc(&["lunch", "menu"]), &[]);

        let text = doc(&["weather", "paris"]);
        let score = corpus.score(&text, &[text.clone()]);
        assert!((score - 1.0).abs() < 1e-9, "score was {}", score);
        assert_eq!(corpus.document_frequency("paris"), 1);
        assert_eq!(corpus.total_docs(), 3);
    }

    #[test]
    fn disjoint_documents_score_zero() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        let score = corpus.score(&doc(&["today", "sunny"]), &[doc(&["unrelated", "topic"])]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn empty_query_or_no_candidates_score_zero() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        assert_eq!(corpus.score(&[], &[doc(&["x"])]), 0.0);
        assert_eq!(corpus.total_docs(), 0);
        assert_eq!(corpus.score(&doc(&["x"]), &[]), 0.0);
        assert_eq!(corpus.score(&doc(&["x"]), &[Vec::new()]), 0.0);
    }

    #[test]
    fn query_weights_use_statistics_before_commit() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        assert_eq!(corpus.idf("rain"), 1.0);
        corpus.score(&doc(&["rain", "rain"]), &[]);
        assert_eq!(corpus.document_frequency("rain"), 1);
        assert_eq!(corpus.total_docs(), 1);
    }

    #[test]
    fn best_candidate_wins() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        let score = corpus.score(
            &doc(&["rust", "borrow", "checker"]),
            &[doc(&["lunch", "menu"]), doc(&["borrow", "checker", "errors"])],
        );
        assert!(score > 0.0 && score < 1.0, "score was {}", score);
    }

    #[test]
    fn rare_shared_term_outweighs_common_one() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        for _ in 0..5 {
            corpus.score(&doc(&["hello", "everyone"]), &[]);
        }
        let common = corpus.score(&doc(&["hello", "compiler"]), &[doc(&["hello", "dinner"])]);
        let rare = corpus.score(&doc(&["hello", "compiler"]), &[doc(&["compiler", "dinner"])]);
        assert!(rare > common, "rare {} common {}", rare, common);
    }

    #[test]
    fn eviction_removes_document_frequencies() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 2);
        corpus.score(&doc(&["alpha"]), &[]);
        corpus.score(&doc(&["beta"]), &[]);
        corpus.score(&doc(&["gamma"]), &[]);
        assert_eq!(corpus.total_docs(), 2);
        assert_eq!(corpus.document_frequency("alpha"), 0);
        assert_eq!(corpus.document_frequency("gamma"), 1);
    }

    #[test]
    fn repeated_term_counts_once_per_document() {
        let mut corpus = TopicCorpus::new(RelevanceModel::Tfidf, 20);
        corpus.score(&doc(&["echo", "echo", "echo"]), &[]);
        assert_eq!(corpus.document_frequency("echo"), 1);
    }

    #[test]
    fn decayed_model_squashes_into_open_unit_interval() {
        let mut corpus = TopicCorpus::new(RelevanceModel::DecayedBigram, 20);
        let same = corpus.score(&doc(&["today", "sunny"]), &[doc(&["today", "sunny"])]);
        let other = corpus.score(&doc(&["today", "sunny"]), &[doc(&["unrelated", "topic"])]);
        assert!(same > 0.0 && same < 1.0, "same {}", same);
        assert!(other > 0.0 && other < 1.0, "other {}", other);
        assert!(same > other);
        assert!((other - sigmoid(0.0)).abs() < 1e-12);
    }

    #[test]
    fn decayed_importance_fades_without_reinforcement() {
        let mut corpus = TopicCorpus::new(RelevanceModel::DecayedBigram, 20);
        corpus.score(&doc(&["kite"]), &[]);
        assert_eq!(corpus.importance("kite"), 1.0);
        corpus.score(&doc(&["boat"]), &[]);
        assert!((corpus.importance("kite") - IMPORTANCE_DECAY).abs() < 1e-12);
        corpus.score(&doc(&["kite"]), &[]);
        assert!(corpus.importance("kite") > 1.0);
    }

    #[test]
    fn bigrams_reward_shared_word_order() {
        let mut corpus = TopicCorpus::new(RelevanceModel::DecayedBigram, 20);
        let ordered = corpus.score(
            &doc(&["machine", "learning", "rocks"]),
            &[doc(&["machine", "learning", "talk"])],
        );
        let mut fresh = TopicCorpus::new(RelevanceModel::DecayedBigram, 20);
        let shuffled = fresh.score(
            &doc(&["machine", "learning", "rocks"]),
            &[doc(&["learning", "machine", "talk"])],
        );
        assert!(ordered > shuffled, "ordered {} shuffled {}", ordered, shuffled);
    }
}
