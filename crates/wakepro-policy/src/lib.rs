//! Wakepro Policy Engine
//!
//! Allowlist, denylists, forbidden words and reserved commands, applied in a
//! fixed order before any wake arbitration happens.

use std::collections::HashSet;
use tracing::debug;
use wakepro_config::FilterConfig;
use wakepro_ipc::InboundMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Pass,
    /// Leave the message alone; nothing is consumed and no state is touched.
    Ignore(IgnoreReason),
    /// Stop the message here.
    Consume(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    NotWhitelisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    GroupBlacklisted,
    UserBlacklisted,
    ForbiddenWord(String),
    BuiltinCommand,
}

impl IgnoreReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::OwnMessage => "own_message",
            Self::NotWhitelisted => "not_whitelisted",
        }
    }
}

impl DropReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::GroupBlacklisted => "group_blacklisted",
            Self::UserBlacklisted => "user_blacklisted",
            Self::ForbiddenWord(_) => "forbidden_word",
            Self::BuiltinCommand => "builtin_command",
        }
    }
}

#[derive(Clone)]
pub struct PolicyEngine {
    group_whitelist: HashSet<String>,
    group_blacklist: HashSet<String>,
    user_blacklist: HashSet<String>,
    forbidden_words: Vec<String>,
    builtin_commands: Option<HashSet<String>>,
}

impl PolicyEngine {
    pub fn new(config: &FilterConfig) -> Self {
        let forbidden_words = config
            .forbidden_words
            .iter()
            .filter(|w| !w.is_empty())
            .cloned()
            .collect();

        let builtin_commands = config
            .block_builtin
            .then(|| config.builtin_commands.iter().cloned().collect());

        Self {
            group_whitelist: config.group_whitelist.iter().cloned().collect(),
            group_blacklist: config.group_blacklist.iter().cloned().collect(),
            user_blacklist: config.user_blacklist.iter().cloned().collect(),
            forbidden_words,
            builtin_commands,
        }
    }

    /// Runs the filter chain. The first matching rule decides.
    pub fn screen(&self, msg: &InboundMessage) -> Screening {
        if msg.sender_id == msg.agent_id {
            return Screening::Ignore(IgnoreReason::OwnMessage);
        }

        if !self.is_group_allowed(&msg.group_id) {
            return Screening::Ignore(IgnoreReason::NotWhitelisted);
        }

        if self.group_blacklist.contains(&msg.group_id) && !msg.sender_is_privileged {
            debug!("group {} is blacklisted", msg.group_id);
            return Screening::Consume(DropReason::GroupBlacklisted);
        }

        if self.user_blacklist.contains(&msg.sender_id) {
            debug!("user {} is blacklisted", msg.sender_id);
            return Screening::Consume(DropReason::UserBlacklisted);
        }

        if !msg.sender_is_privileged {
            if let Some(word) = self.forbidden_word_in(&msg.text) {
                debug!("{} used forbidden word '{}'", msg.sender_id, word);
                return Screening::Consume(DropReason::ForbiddenWord(word.to_string()));
            }

            if self.is_builtin_command(&msg.text) {
                debug!("{} sent reserved command '{}'", msg.sender_id, msg.text);
                return Screening::Consume(DropReason::BuiltinCommand);
            }
        }

        Screening::Pass
    }

    pub fn is_group_allowed(&self, group_id: &str) -> bool {
        self.group_whitelist.is_empty() || self.group_whitelist.contains(group_id)
    }

    fn forbidden_word_in(&self, text: &str) -> Option<&str> {
        self.forbidden_words
            .iter()
            .find(|w| text.contains(w.as_str()))
            .map(String::as_str)
    }

    fn is_builtin_command(&self, text: &str) -> bool {
        self.builtin_commands
            .as_ref()
            .is_some_and(|cmds| cmds.contains(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> FilterConfig {
        FilterConfig::default()
    }

    fn msg(group: &str, sender: &str, text: &str) -> InboundMessage {
        InboundMessage::new(group, sender, "bot", text)
    }

    #[test]
    fn empty_config_passes_everything_but_own_messages() {
        let policy = PolicyEngine::new(&filters());
        assert_eq!(policy.screen(&msg("G1", "u1", "hello")), Screening::Pass);
        assert_eq!(
            policy.screen(&msg("G1", "bot", "hello")),
            Screening::Ignore(IgnoreReason::OwnMessage)
        );
    }

    #[test]
    fn whitelist_miss_is_ignored_not_consumed() {
        let mut cfg = filters();
        cfg.group_whitelist = vec!["G1".to_string()];
        cfg.user_blacklist = vec!["u1".to_string()];
        let policy = PolicyEngine::new(&cfg);

        assert_eq!(
            policy.screen(&msg("G2", "u1", "hello")),
            Screening::Ignore(IgnoreReason::NotWhitelisted)
        );
        assert_eq!(
            policy.screen(&msg("G1", "u1", "hello")),
            Screening::Consume(DropReason::UserBlacklisted)
        );
    }

    #[test]
    fn blacklisted_group_lets_privileged_sender_through() {
        let mut cfg = filters();
        cfg.group_blacklist = vec!["G1".to_string()];
        let policy = PolicyEngine::new(&cfg);

        assert_eq!(
            policy.screen(&msg("G1", "u1", "hello")),
            Screening::Consume(DropReason::GroupBlacklisted)
        );
        assert_eq!(
            policy.screen(&msg("G1", "admin", "hello").privileged()),
            Screening::Pass
        );
    }

    #[test]
    fn user_blacklist_applies_to_privileged_senders() {
        let mut cfg = filters();
        cfg.user_blacklist = vec!["admin".to_string()];
        let policy = PolicyEngine::new(&cfg);
        assert_eq!(
            policy.screen(&msg("G1", "admin", "hello").privileged()),
            Screening::Consume(DropReason::UserBlacklisted)
        );
    }

    #[test]
    fn forbidden_word_wins_over_explicit_address() {
        let mut cfg = filters();
        cfg.forbidden_words = vec![String::new(), "spoiler".to_string()];
        let policy = PolicyEngine::new(&cfg);

        let addressed = msg("G1", "u1", "@bot tell me the spoiler").addressed();
        assert_eq!(
            policy.screen(&addressed),
            Screening::Consume(DropReason::ForbiddenWord("spoiler".to_string()))
        );
        assert_eq!(policy.screen(&addressed.privileged()), Screening::Pass);
        assert_eq!(policy.screen(&msg("G1", "u1", "no words here")), Screening::Pass);
    }

    #[test]
    fn builtin_commands_blocked_only_on_exact_match_when_enabled() {
        let mut cfg = filters();
        let open = PolicyEngine::new(&cfg);
        assert_eq!(open.screen(&msg("G1", "u1", "reset")), Screening::Pass);

        cfg.block_builtin = true;
        let policy = PolicyEngine::new(&cfg);
        assert_eq!(
            policy.screen(&msg("G1", "u1", "reset")),
            Screening::Consume(DropReason::BuiltinCommand)
        );
        assert_eq!(
            policy.screen(&msg("G1", "u1", "plugin ls")),
            Screening::Consume(DropReason::BuiltinCommand)
        );
        assert_eq!(policy.screen(&msg("G1", "u1", "reset please")), Screening::Pass);
        assert_eq!(
            policy.screen(&msg("G1", "admin", "reset").privileged()),
            Screening::Pass
        );
    }
}
