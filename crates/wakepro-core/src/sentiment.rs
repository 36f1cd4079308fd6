//! Sentiment scores consumed by the wake and silence stages.
//!
//! The engine only compares these numbers with configured thresholds; how
//! they are produced is up to the deployment.

use wakepro_config::SentimentConfig;

pub trait SentimentScorer: Send + Sync {
    /// Likelihood the message asks a question worth answering.
    fn ask(&self, text: &str) -> f64;
    /// Likelihood the sender is bored and wants company.
    fn bored(&self, text: &str) -> f64;
    /// Rudeness aimed at the agent, e.g. telling it to shut up.
    fn shut(&self, text: &str) -> f64;
    /// Insults aimed at the agent or other users.
    fn insult(&self, text: &str) -> f64;
    /// Likelihood the sender is itself a bot.
    fn is_ai(&self, text: &str) -> f64;
}

/// Scores every message as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralSentiment;

impl SentimentScorer for NeutralSentiment {
    fn ask(&self, _text: &str) -> f64 {
        0.0
    }

    fn bored(&self, _text: &str) -> f64 {
        0.0
    }

    fn shut(&self, _text: &str) -> f64 {
        0.0
    }

    fn insult(&self, _text: &str) -> f64 {
        0.0
    }

    fn is_ai(&self, _text: &str) -> f64 {
        0.0
    }
}

/// One point per configured phrase found in the message.
#[derive(Debug, Clone, Default)]
pub struct LexiconSentiment {
    ask: Vec<String>,
    bored: Vec<String>,
    shut: Vec<String>,
    insult: Vec<String>,
    ai: Vec<String>,
}

impl LexiconSentiment {
    pub fn new(config: &SentimentConfig) -> Self {
        let clean = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            ask: clean(&config.ask_words),
            bored: clean(&config.bored_words),
            shut: clean(&config.shut_words),
            insult: clean(&config.insult_words),
            ai: clean(&config.ai_words),
        }
    }

    fn hits(words: &[String], text: &str) -> f64 {
        let text = text.to_lowercase();
        words.iter().filter(|w| text.contains(w.as_str())).count() as f64
    }
}

impl SentimentScorer for LexiconSentiment {
    fn ask(&self, text: &str) -> f64 {
        Self::hits(&self.ask, text)
    }

    fn bored(&self, text: &str) -> f64 {
        Self::hits(&self.bored, text)
    }

    fn shut(&self, text: &str) -> f64 {
        Self::hits(&self.shut, text)
    }

    fn insult(&self, text: &str) -> f64 {
        Self::hits(&self.insult, text)
    }

    fn is_ai(&self, text: &str) -> f64 {
        Self::hits(&self.ai, text)
    }
}
