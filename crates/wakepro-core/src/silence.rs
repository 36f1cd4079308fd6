//! Group-wide shutup and per-user silence.
//!
//! Both axes are timed suppressions stored as absolute deadlines. A new
//! trigger overwrites the deadline, it never extends it.

use crate::sentiment::SentimentScorer;
use crate::state::{GroupState, MemberState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use wakepro_config::{active, SilenceConfig};

const MAX_SUPPRESSION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Suppression {
    /// The whole group told the agent to be quiet. No one bypasses this.
    ShutUp { remaining: Duration },
    /// This sender is silenced. Privileged senders bypass this.
    Silenced { remaining: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    ShutUp { score: f64, duration: Duration },
    /// Silences the sender from the next message on; this one still goes
    /// through so the agent can answer back once.
    Insult { score: f64, duration: Duration },
    Ai { score: f64, duration: Duration },
}

impl Trigger {
    /// Whether the triggering message itself is consumed.
    pub fn consumes(&self) -> bool {
        !matches!(self, Self::Insult { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SilencePolicy {
    shutup_threshold: Option<f64>,
    insult_threshold: Option<f64>,
    ai_threshold: Option<f64>,
    multiple: f64,
}

impl SilencePolicy {
    pub fn new(config: &SilenceConfig) -> Self {
        Self {
            shutup_threshold: active(config.shutup_threshold),
            insult_threshold: active(config.insult_threshold),
            ai_threshold: active(config.ai_threshold),
            multiple: config.silence_multiple,
        }
    }

    /// Entry gate: group shutup first, then the sender's own silence.
    pub async fn check(
        &self,
        group: &GroupState,
        member: &MemberState,
        privileged: bool,
        now: Instant,
    ) -> Option<Suppression> {
        if let Some(s) = Self::group_suppression(group, now).await {
            return Some(s);
        }
        if privileged {
            return None;
        }
        let inner = member.lock().await;
        Self::member_suppression(inner.silence_until, now)
    }

    /// Gate on the forwarding path, run again after any merge wait. A
    /// pending insult rebuttal is spent here instead of being suppressed.
    pub async fn check_forward(
        &self,
        group: &GroupState,
        member: &MemberState,
        privileged: bool,
        now: Instant,
    ) -> Option<Suppression> {
        if let Some(s) = Self::group_suppression(group, now).await {
            return Some(s);
        }
        let mut inner = member.lock().await;
        if std::mem::take(&mut inner.rebuttal_pending) || privileged {
            return None;
        }
        Self::member_suppression(inner.silence_until, now)
    }

    /// Evaluates shutup, insult and AI triggers in that order; the first one
    /// that fires is applied and returned.
    pub async fn apply(
        &self,
        group: &GroupState,
        member: &MemberState,
        text: &str,
        sentiment: &dyn SentimentScorer,
        now: Instant,
    ) -> Option<Trigger> {
        if let Some(threshold) = self.shutup_threshold {
            let score = sentiment.shut(text);
            if score > threshold {
                let duration = self.duration(score);
                group.lock().await.shutup_until = Some(deadline(now, duration));
                info!(
                    "group {} shut up for {:.0}s: {}",
                    group.gid(),
                    duration.as_secs_f64(),
                    text
                );
                return Some(Trigger::ShutUp { score, duration });
            }
        }

        if let Some(threshold) = self.insult_threshold {
            let score = sentiment.insult(text);
            if score > threshold {
                let duration = self.duration(score);
                let mut inner = member.lock().await;
                inner.silence_until = Some(deadline(now, duration));
                inner.rebuttal_pending = true;
                info!(
                    "group {} user {} silenced for {:.0}s (insult): {}",
                    group.gid(),
                    member.uid(),
                    duration.as_secs_f64(),
                    text
                );
                return Some(Trigger::Insult { score, duration });
            }
        }

        if let Some(threshold) = self.ai_threshold {
            let score = sentiment.is_ai(text);
            if score > threshold {
                let duration = self.duration(score);
                let mut inner = member.lock().await;
                inner.silence_until = Some(deadline(now, duration));
                inner.rebuttal_pending = false;
                info!(
                    "group {} user {} silenced for {:.0}s (ai): {}",
                    group.gid(),
                    member.uid(),
                    duration.as_secs_f64(),
                    text
                );
                return Some(Trigger::Ai { score, duration });
            }
        }

        None
    }

    fn duration(&self, score: f64) -> Duration {
        Duration::try_from_secs_f64(score * self.multiple)
            .unwrap_or(MAX_SUPPRESSION)
            .min(MAX_SUPPRESSION)
    }

    async fn group_suppression(group: &GroupState, now: Instant) -> Option<Suppression> {
        let inner = group.lock().await;
        inner
            .shutup_until
            .filter(|until| *until > now)
            .map(|until| Suppression::ShutUp {
                remaining: until - now,
            })
    }

    fn member_suppression(silence_until: Option<Instant>, now: Instant) -> Option<Suppression> {
        silence_until
            .filter(|until| *until > now)
            .map(|until| Suppression::Silenced {
                remaining: until - now,
            })
    }
}

fn deadline(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration).unwrap_or(now)
}
