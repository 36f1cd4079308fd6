//! Wake arbitration.
//!
//! One inbound message runs through: policy screen, suppression gate, wake
//! signals, sentiment triggers, optional merge wait and a final suppression
//! re-check before it is forwarded.

use crate::error::WakeError;
use crate::history::HistorySource;
use crate::merge::{DropCause, MergeBuffer, MergeOutcome, MergeSettings, PendingMerge};
use crate::sentiment::SentimentScorer;
use crate::silence::{SilencePolicy, Suppression, Trigger};
use crate::state::{since, GroupState, MemberState, StateStore};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use wakepro_config::{active, Config, ExtendAnchor, WakeConfig};
use wakepro_ipc::{Action, Disposition, InboundMessage};
use wakepro_policy::{DropReason, PolicyEngine, Screening};

#[derive(Debug, Clone, PartialEq)]
pub enum WakeReason {
    /// Platform mention or explicit command.
    Explicit,
    /// Follow-up while the sender's merge session is open.
    Merging,
    Mention(String),
    Extend,
    Relevance(f64),
    Ask(f64),
    Bored(f64),
    Probability,
    None,
}

impl WakeReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Merging => "merging",
            Self::Mention(_) => "mention",
            Self::Extend => "extend",
            Self::Relevance(_) => "relevance",
            Self::Ask(_) => "ask",
            Self::Bored(_) => "bored",
            Self::Probability => "probability",
            Self::None => "none",
        }
    }
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mention(keyword) => write!(f, "mention({})", keyword),
            Self::Relevance(score) | Self::Ask(score) | Self::Bored(score) => {
                write!(f, "{}({:.3})", self.tag(), score)
            }
            _ => f.write_str(self.tag()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WakeDecision {
    pub woken: bool,
    pub reason: WakeReason,
}

impl WakeDecision {
    fn woken(reason: WakeReason) -> Self {
        Self {
            woken: true,
            reason,
        }
    }

    fn asleep() -> Self {
        Self {
            woken: false,
            reason: WakeReason::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Policy(wakepro_policy::IgnoreReason),
    EmptyText,
}

impl IgnoreReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Policy(reason) => reason.tag(),
            Self::EmptyText => "empty_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeReason {
    Policy(DropReason),
    ShutUp,
    Silenced,
    WakeCooldown,
    ShutUpTriggered,
    AiDetected,
    MergeOverflow,
    RequestCooldown,
    SessionLost,
}

impl ConsumeReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Policy(reason) => reason.tag(),
            Self::ShutUp => "shut_up",
            Self::Silenced => "silenced",
            Self::WakeCooldown => "wake_cooldown",
            Self::ShutUpTriggered => "shut_up_triggered",
            Self::AiDetected => "ai_detected",
            Self::MergeOverflow => "merge_overflow",
            Self::RequestCooldown => "request_cooldown",
            Self::SessionLost => "session_lost",
        }
    }
}

impl From<Suppression> for ConsumeReason {
    fn from(suppression: Suppression) -> Self {
        match suppression {
            Suppression::ShutUp { .. } => Self::ShutUp,
            Suppression::Silenced { .. } => Self::Silenced,
        }
    }
}

/// What the host should do with one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Ignore(IgnoreReason),
    Consume(ConsumeReason),
    Forward {
        wake: bool,
        text: String,
        reason: WakeReason,
    },
    /// Folded into an earlier message's merge session.
    Absorbed,
    /// Empty mention; reply with `prompt`, using `history` as context.
    ReplyPrompt { prompt: String, history: Vec<String> },
}

impl Verdict {
    /// Whether the host should stop processing the message.
    pub fn is_consumed(&self) -> bool {
        matches!(
            self,
            Self::Consume(_) | Self::Absorbed | Self::ReplyPrompt { .. }
        )
    }

    pub fn wake(&self) -> bool {
        matches!(self, Self::Forward { wake: true, .. })
    }

    /// Replacement text for a forwarded message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Forward { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn to_disposition(&self) -> Disposition {
        let (action, reason, history) = match self {
            Self::Ignore(r) => (Action::Ignore, r.tag().to_string(), Vec::new()),
            Self::Consume(r) => (Action::Consume, r.tag().to_string(), Vec::new()),
            Self::Forward { reason, .. } => (Action::Forward, reason.to_string(), Vec::new()),
            Self::Absorbed => (Action::Absorbed, "merged".to_string(), Vec::new()),
            Self::ReplyPrompt { history, .. } => {
                (Action::ReplyPrompt, "empty_mention".to_string(), history.clone())
            }
        };
        let text = match self {
            Self::Forward { text, .. } => Some(text.clone()),
            Self::ReplyPrompt { prompt, .. } => Some(prompt.clone()),
            _ => None,
        };
        Disposition {
            action,
            wake: self.wake(),
            text,
            reason,
            history,
        }
    }
}

/// Outcome of [`WakeEngine::admit`].
pub enum Admission {
    Decided(Verdict),
    /// The message opened a merge session; [`WakeEngine::settle`] waits it
    /// out.
    Merging(MergeWait),
}

pub struct MergeWait {
    pending: PendingMerge,
    group: Arc<GroupState>,
    member: Arc<MemberState>,
    privileged: bool,
    reason: WakeReason,
}

pub struct WakeEngine {
    policy: PolicyEngine,
    wake: WakeConfig,
    keywords: Vec<String>,
    silence: SilencePolicy,
    merge: Option<MergeBuffer>,
    store: Arc<StateStore>,
    sentiment: Arc<dyn SentimentScorer>,
    history: Option<Arc<dyn HistorySource>>,
    history_count: usize,
}

impl WakeEngine {
    pub fn new(
        config: &Config,
        store: Arc<StateStore>,
        sentiment: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            policy: PolicyEngine::new(&config.filters),
            keywords: config.wake.keywords(),
            wake: config.wake.clone(),
            silence: SilencePolicy::new(&config.silence),
            merge: MergeSettings::from_config(&config.merge).map(MergeBuffer::new),
            store,
            sentiment,
            history: None,
            history_count: config.relevance.recent_bot_messages.max(1),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Runs the whole pipeline for one message, waiting out any merge
    /// session it opens.
    pub async fn evaluate(&self, msg: &InboundMessage) -> Verdict {
        let admission = self.admit(msg).await;
        self.settle(admission).await
    }

    /// Everything up to and including the merge buffer. Admitting messages
    /// of one sender one at a time, in arrival order, keeps merged text in
    /// arrival order.
    pub async fn admit(&self, msg: &InboundMessage) -> Admission {
        match self.policy.screen(msg) {
            Screening::Pass => {}
            Screening::Ignore(reason) => {
                return Admission::Decided(Verdict::Ignore(IgnoreReason::Policy(reason)))
            }
            Screening::Consume(reason) => {
                return Admission::Decided(Verdict::Consume(ConsumeReason::Policy(reason)))
            }
        }

        let now = Instant::now();
        let group = self.store.get_or_create_group(&msg.group_id).await;
        let member = group.get_or_create_member(&msg.sender_id).await;

        if let Some(suppression) = self
            .silence
            .check(&group, &member, msg.sender_is_privileged, now)
            .await
        {
            debug!(
                "group {} user {} suppressed: {:?}",
                msg.group_id, msg.sender_id, suppression
            );
            return Admission::Decided(Verdict::Consume(suppression.into()));
        }

        let text = msg.text.trim();
        if text.is_empty() {
            return Admission::Decided(self.empty_text(msg).await);
        }

        let decision = if msg.has_explicit_address {
            WakeDecision::woken(WakeReason::Explicit)
        } else if member.lock().await.in_merging() {
            WakeDecision::woken(WakeReason::Merging)
        } else if self.in_wake_cooldown(&member, now).await {
            debug!(
                "group {} user {} inside wake cooldown",
                msg.group_id, msg.sender_id
            );
            return Admission::Decided(Verdict::Consume(ConsumeReason::WakeCooldown));
        } else {
            self.arbitrate(&group, &member, text, now).await
        };

        let trigger = self
            .silence
            .apply(&group, &member, text, self.sentiment.as_ref(), now)
            .await;
        match trigger {
            Some(Trigger::ShutUp { .. }) => {
                return Admission::Decided(Verdict::Consume(ConsumeReason::ShutUpTriggered))
            }
            Some(Trigger::Ai { .. }) => {
                return Admission::Decided(Verdict::Consume(ConsumeReason::AiDetected))
            }
            _ => {}
        }

        let privileged = msg.sender_is_privileged;
        if !decision.woken {
            let verdict = self
                .forward(&group, &member, privileged, false, text.to_string(), decision.reason)
                .await;
            return Admission::Decided(verdict);
        }

        info!(
            "group {} user {} woken ({}): {}",
            msg.group_id, msg.sender_id, decision.reason, text
        );
        member.lock().await.last_wake = Some(now);

        let Some(merge) = self.merge.as_ref().filter(|_| !msg.is_command) else {
            let verdict = self
                .forward(&group, &member, privileged, true, text.to_string(), decision.reason)
                .await;
            return Admission::Decided(verdict);
        };

        let cause = match merge.on_candidate_message(&member, text, now).await {
            MergeOutcome::Opened(pending) => {
                return Admission::Merging(MergeWait {
                    pending,
                    group,
                    member,
                    privileged,
                    reason: decision.reason,
                })
            }
            MergeOutcome::Buffered => return Admission::Decided(Verdict::Absorbed),
            MergeOutcome::Dropped(cause) => cause,
        };

        // The rebuttal this message earned leaves with it.
        if matches!(trigger, Some(Trigger::Insult { .. })) {
            member.lock().await.rebuttal_pending = false;
        }
        Admission::Decided(Verdict::Consume(match cause {
            DropCause::Overflow => ConsumeReason::MergeOverflow,
            DropCause::Cooldown => ConsumeReason::RequestCooldown,
        }))
    }

    /// Waits for the merge session an admitted message opened, then runs
    /// the forward-time suppression check on the merged text.
    pub async fn settle(&self, admission: Admission) -> Verdict {
        let wait = match admission {
            Admission::Decided(verdict) => return verdict,
            Admission::Merging(wait) => wait,
        };

        match wait.pending.wait().await {
            Ok(merged) => {
                self.forward(
                    &wait.group,
                    &wait.member,
                    wait.privileged,
                    true,
                    merged.text,
                    wait.reason,
                )
                .await
            }
            Err(e) => {
                error!("{}", e);
                Verdict::Consume(ConsumeReason::SessionLost)
            }
        }
    }

    async fn forward(
        &self,
        group: &GroupState,
        member: &MemberState,
        privileged: bool,
        wake: bool,
        text: String,
        reason: WakeReason,
    ) -> Verdict {
        if let Some(suppression) = self
            .silence
            .check_forward(group, member, privileged, Instant::now())
            .await
        {
            debug!(
                "group {} user {} suppressed at forward: {:?}",
                group.gid(),
                member.uid(),
                suppression
            );
            return Verdict::Consume(suppression.into());
        }

        Verdict::Forward { wake, text, reason }
    }

    /// Records an agent reply: feeds relevance candidates and the
    /// last-response timestamp.
    pub async fn on_response_sent(&self, group_id: &str, user_id: &str, text: &str) {
        if !self.policy.is_group_allowed(group_id) {
            return;
        }
        let group = self.store.get_or_create_group(group_id).await;
        group.lock().await.push_bot_message(text);
        let member = group.get_or_create_member(user_id).await;
        member.lock().await.last_response = Some(Instant::now());
    }

    /// Signals (b) through (g), first match wins.
    async fn arbitrate(
        &self,
        group: &GroupState,
        member: &MemberState,
        text: &str,
        now: Instant,
    ) -> WakeDecision {
        if let Some(keyword) = self.keywords.iter().find(|k| text.contains(k.as_str())) {
            return WakeDecision::woken(WakeReason::Mention(keyword.clone()));
        }

        if let Some(window) = self.wake.extend_window() {
            let anchor = {
                let inner = member.lock().await;
                match self.wake.extend_anchor {
                    ExtendAnchor::LastWake => inner.last_wake,
                    ExtendAnchor::LastResponse => inner.last_response,
                }
            };
            if since(now, anchor).is_some_and(|elapsed| elapsed <= window) {
                return WakeDecision::woken(WakeReason::Extend);
            }
        }

        if let Some(threshold) = active(self.wake.relevance_threshold) {
            let score = self.relevance(group, text).await;
            if score > threshold {
                return WakeDecision::woken(WakeReason::Relevance(score));
            }
        }

        if let Some(threshold) = active(self.wake.ask_threshold) {
            let score = self.sentiment.ask(text);
            if score > threshold {
                return WakeDecision::woken(WakeReason::Ask(score));
            }
        }

        if let Some(threshold) = active(self.wake.bored_threshold) {
            let score = self.sentiment.bored(text);
            if score > threshold {
                return WakeDecision::woken(WakeReason::Bored(score));
            }
        }

        if let Some(p) = active(self.wake.probability) {
            if rand::random::<f64>() < p {
                return WakeDecision::woken(WakeReason::Probability);
            }
        }

        WakeDecision::asleep()
    }

    async fn in_wake_cooldown(&self, member: &MemberState, now: Instant) -> bool {
        let Some(cooldown) = self.wake.wake_cooldown() else {
            return false;
        };
        let last_wake = member.lock().await.last_wake;
        since(now, last_wake).is_some_and(|elapsed| elapsed < cooldown)
    }

    async fn relevance(&self, group: &GroupState, text: &str) -> f64 {
        let candidates = self.relevance_candidates(group).await;
        if candidates.is_empty() {
            return 0.0;
        }
        let query = self.store.relevance().prepare(text, &candidates);
        let score = group
            .lock()
            .await
            .corpus
            .score(&query.doc, &query.candidates);
        debug!("group {} relevance {:.3}", group.gid(), score);
        score
    }

    async fn relevance_candidates(&self, group: &GroupState) -> Vec<String> {
        if let Some(history) = &self.history {
            match history.recent_replies(group.gid(), self.history_count).await {
                Ok(replies) => return newest(replies, self.history_count),
                Err(e) => {
                    let err = WakeError::History {
                        group_id: group.gid().to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{}, using recent bot messages", err);
                }
            }
        }
        group.lock().await.recent_bot_messages()
    }

    async fn empty_text(&self, msg: &InboundMessage) -> Verdict {
        let prompt = match self.wake.empty_mention_prompt() {
            Some(prompt) if msg.has_explicit_address => prompt,
            _ => return Verdict::Ignore(IgnoreReason::EmptyText),
        };

        let history = match &self.history {
            Some(source) => source
                .recent_replies(&msg.group_id, self.history_count)
                .await
                .map(|replies| newest(replies, self.history_count))
                .unwrap_or_else(|e| {
                    let err = WakeError::History {
                        group_id: msg.group_id.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}, replying without history", err);
                    Vec::new()
                }),
            None => Vec::new(),
        };

        Verdict::ReplyPrompt {
            prompt: prompt.replace("{username}", msg.display_name()),
            history,
        }
    }
}

/// Keeps the last `count` of an oldest-first list. Sources may return more
/// than they were asked for.
fn newest(replies: Vec<String>, count: usize) -> Vec<String> {
    let skip = replies.len().saturating_sub(count);
    replies.into_iter().skip(skip).collect()
}
