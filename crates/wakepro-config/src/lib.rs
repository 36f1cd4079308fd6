//! Wakepro Configuration
//!
//! TOML configuration loading. Every optional knob follows the same rule:
//! missing, zero or negative means the feature is disabled.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Commands reserved by the host that `block_builtin` refuses from
/// non-privileged senders.
pub const DEFAULT_BUILTIN_COMMANDS: &[&str] = &[
    "llm",
    "t2i",
    "tts",
    "sid",
    "op",
    "wl",
    "dashboard_update",
    "alter_cmd",
    "provider",
    "model",
    "plugin",
    "plugin ls",
    "new",
    "switch",
    "rename",
    "del",
    "reset",
    "history",
    "persona",
    "tool ls",
    "key",
    "websearch",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub silence: SilenceConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// When non-empty, only these groups are handled at all.
    #[serde(default)]
    pub group_whitelist: Vec<String>,
    #[serde(default)]
    pub group_blacklist: Vec<String>,
    #[serde(default)]
    pub user_blacklist: Vec<String>,
    #[serde(default)]
    pub forbidden_words: Vec<String>,
    #[serde(default)]
    pub block_builtin: bool,
    #[serde(default = "default_builtin_commands")]
    pub builtin_commands: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            group_whitelist: Vec::new(),
            group_blacklist: Vec::new(),
            user_blacklist: Vec::new(),
            forbidden_words: Vec::new(),
            block_builtin: false,
            builtin_commands: default_builtin_commands(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// Only the wake-extend window is used; `wake_cooldown_secs` is ignored.
    #[default]
    ExtendOnly,
    /// Implicit wakes are refused (and the message consumed) while the
    /// user's last wake is younger than `wake_cooldown_secs`.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtendAnchor {
    #[default]
    LastWake,
    LastResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WakeConfig {
    #[serde(default)]
    pub mention_keywords: Vec<String>,
    #[serde(default)]
    pub cooldown_policy: CooldownPolicy,
    pub wake_cooldown_secs: Option<f64>,
    pub extend_secs: Option<f64>,
    #[serde(default)]
    pub extend_anchor: ExtendAnchor,
    pub relevance_threshold: Option<f64>,
    pub ask_threshold: Option<f64>,
    pub bored_threshold: Option<f64>,
    pub probability: Option<f64>,
    pub empty_mention_prompt: Option<String>,
}

impl WakeConfig {
    pub fn wake_cooldown(&self) -> Option<Duration> {
        match self.cooldown_policy {
            CooldownPolicy::ExtendOnly => None,
            CooldownPolicy::Hard => active_secs(self.wake_cooldown_secs),
        }
    }

    pub fn extend_window(&self) -> Option<Duration> {
        active_secs(self.extend_secs)
    }

    pub fn keywords(&self) -> Vec<String> {
        self.mention_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect()
    }

    pub fn empty_mention_prompt(&self) -> Option<&str> {
        self.empty_mention_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceConfig {
    pub shutup_threshold: Option<f64>,
    pub insult_threshold: Option<f64>,
    pub ai_threshold: Option<f64>,
    /// Seconds of silence per point of triggering score.
    #[serde(default = "default_silence_multiple")]
    pub silence_multiple: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            shutup_threshold: None,
            insult_threshold: None,
            ai_threshold: None,
            silence_multiple: default_silence_multiple(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Debounce window. Unset or zero disables merging.
    pub delay_secs: Option<f64>,
    pub request_cooldown_secs: Option<f64>,
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            delay_secs: None,
            request_cooldown_secs: None,
            max_buffered: default_max_buffered(),
            separator: default_separator(),
        }
    }
}

impl MergeConfig {
    pub fn delay(&self) -> Option<Duration> {
        active_secs(self.delay_secs)
    }

    pub fn request_cooldown(&self) -> Option<Duration> {
        active_secs(self.request_cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceModel {
    /// Plain TF-IDF cosine in [0, 1].
    #[default]
    Tfidf,
    /// Decayed term importance, bigram dimensions and a logistic squash into (0, 1).
    DecayedBigram,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default)]
    pub model: RelevanceModel,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_template_threshold")]
    pub template_threshold: usize,
    #[serde(default = "default_recent_bot_messages")]
    pub recent_bot_messages: usize,
    pub stopwords: Option<Vec<String>>,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            model: RelevanceModel::default(),
            history_limit: default_history_limit(),
            template_threshold: default_template_threshold(),
            recent_bot_messages: default_recent_bot_messages(),
            stopwords: None,
        }
    }
}

/// Phrase lists for the bundled lexicon scorer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentimentConfig {
    #[serde(default)]
    pub ask_words: Vec<String>,
    #[serde(default)]
    pub bored_words: Vec<String>,
    #[serde(default)]
    pub shut_words: Vec<String>,
    #[serde(default)]
    pub insult_words: Vec<String>,
    #[serde(default)]
    pub ai_words: Vec<String>,
}

impl SentimentConfig {
    pub fn is_empty(&self) -> bool {
        self.ask_words.is_empty()
            && self.bored_words.is_empty()
            && self.shut_words.is_empty()
            && self.insult_words.is_empty()
            && self.ai_words.is_empty()
    }
}

/// Maps an optional threshold to `Some` only when it is a positive number.
pub fn active(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

pub fn active_secs(value: Option<f64>) -> Option<Duration> {
    active(value).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn default_builtin_commands() -> Vec<String> {
    DEFAULT_BUILTIN_COMMANDS
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_silence_multiple() -> f64 {
    500.0
}

fn default_max_buffered() -> usize {
    10
}

fn default_separator() -> String {
    " ".to_string()
}

fn default_history_limit() -> usize {
    120
}

fn default_template_threshold() -> usize {
    2
}

fn default_recent_bot_messages() -> usize {
    5
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wakepro").join("config.toml"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let thresholds = [
            ("wake.wake_cooldown_secs", self.wake.wake_cooldown_secs),
            ("wake.extend_secs", self.wake.extend_secs),
            ("wake.relevance_threshold", self.wake.relevance_threshold),
            ("wake.ask_threshold", self.wake.ask_threshold),
            ("wake.bored_threshold", self.wake.bored_threshold),
            ("silence.shutup_threshold", self.silence.shutup_threshold),
            ("silence.insult_threshold", self.silence.insult_threshold),
            ("silence.ai_threshold", self.silence.ai_threshold),
            ("merge.delay_secs", self.merge.delay_secs),
            ("merge.request_cooldown_secs", self.merge.request_cooldown_secs),
        ];
        for (name, value) in thresholds {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    anyhow::bail!("{} must be a non-negative number, got {}", name, v);
                }
            }
        }

        if let Some(p) = self.wake.probability {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("wake.probability must be within [0, 1], got {}", p);
            }
        }

        if !self.silence.silence_multiple.is_finite() || self.silence.silence_multiple < 0.0 {
            anyhow::bail!(
                "silence.silence_multiple must be a non-negative number, got {}",
                self.silence.silence_multiple
            );
        }

        if self.merge.max_buffered == 0 {
            anyhow::bail!("merge.max_buffered must be at least 1");
        }

        if self.relevance.history_limit == 0 {
            anyhow::bail!("relevance.history_limit must be at least 1");
        }

        if self.relevance.recent_bot_messages == 0 {
            anyhow::bail!("relevance.recent_bot_messages must be at least 1");
        }

        if let Some(level) = self.core.log_level.as_deref() {
            if level.trim().is_empty() {
                anyhow::bail!("core.log_level cannot be empty");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, CooldownPolicy, ExtendAnchor, RelevanceModel};
    use std::time::Duration;

    fn parse_config(input: &str) -> Config {
        let cfg: Config = toml::from_str(input).expect("valid TOML");
        cfg
    }

    #[test]
    fn empty_config_disables_every_feature() {
        let cfg = parse_config("");
        assert!(cfg.validate().is_ok());
        assert!(cfg.wake.wake_cooldown().is_none());
        assert!(cfg.wake.extend_window().is_none());
        assert!(cfg.merge.delay().is_none());
        assert!(cfg.merge.request_cooldown().is_none());
        assert!(cfg.wake.empty_mention_prompt().is_none());
        assert_eq!(cfg.merge.max_buffered, 10);
        assert_eq!(cfg.merge.separator, " ");
        assert_eq!(cfg.relevance.history_limit, 120);
        assert_eq!(cfg.relevance.recent_bot_messages, 5);
        assert!(cfg.filters.builtin_commands.iter().any(|c| c == "reset"));
    }

    #[test]
    fn full_config_parses_named_policies() {
        let cfg = parse_config(
            r#"
[core]
log_level = "debug"

[filters]
group_whitelist = ["G1"]
forbidden_words = ["spoiler"]
block_builtin = true

[wake]
mention_keywords = ["", "bot"]
cooldown_policy = "hard"
wake_cooldown_secs = 3
extend_secs = 30
extend_anchor = "last_response"
relevance_threshold = 0.4
probability = 0.05

[silence]
shutup_threshold = 0.6
insult_threshold = 0.7
ai_threshold = 0.8
silence_multiple = 100

[merge]
delay_secs = 2
request_cooldown_secs = 1
max_buffered = 4
separator = "。"

[relevance]
model = "decayed_bigram"
history_limit = 40
"#,
        );
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.wake.cooldown_policy, CooldownPolicy::Hard);
        assert_eq!(cfg.wake.wake_cooldown(), Some(Duration::from_secs(3)));
        assert_eq!(cfg.wake.extend_anchor, ExtendAnchor::LastResponse);
        assert_eq!(cfg.wake.keywords(), vec!["bot".to_string()]);
        assert_eq!(cfg.merge.delay(), Some(Duration::from_secs(2)));
        assert_eq!(cfg.merge.separator, "。");
        assert_eq!(cfg.relevance.model, RelevanceModel::DecayedBigram);
    }

    #[test]
    fn extend_only_policy_ignores_wake_cooldown() {
        let cfg = parse_config(
            r#"
[wake]
wake_cooldown_secs = 10
"#,
        );
        assert_eq!(cfg.wake.cooldown_policy, CooldownPolicy::ExtendOnly);
        assert!(cfg.wake.wake_cooldown().is_none());
    }

    #[test]
    fn zero_values_mean_disabled() {
        let cfg = parse_config(
            r#"
[wake]
extend_secs = 0

[merge]
delay_secs = 0.0
"#,
        );
        assert!(cfg.validate().is_ok());
        assert!(cfg.wake.extend_window().is_none());
        assert!(cfg.merge.delay().is_none());
    }

    #[test]
    fn validate_rejects_probability_above_one() {
        let cfg = parse_config(
            r#"
[wake]
probability = 1.5
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_threshold() {
        let cfg = parse_config(
            r#"
[silence]
insult_threshold = -1
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_merge_cap() {
        let cfg = parse_config(
            r#"
[merge]
delay_secs = 2
max_buffered = 0
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_and_validates_file() {
        let path = std::env::temp_dir().join(format!(
            "wakepro-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[wake]\nprobability = 2.0\n").expect("write config");
        assert!(Config::load(&path).is_err());

        std::fs::write(&path, "[wake]\nprobability = 0.2\n").expect("write config");
        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.wake.probability, Some(0.2));

        let _ = std::fs::remove_file(path);
    }
}
