//! Debounce merge buffer.
//!
//! The first woken message from a user opens a session and waits; follow-up
//! messages inside the debounce window are folded into it. Every session
//! resolves exactly once, either when its timer elapses or when the buffer
//! cap forces it shut.

use crate::error::WakeError;
use crate::state::{since, MemberInner, MemberState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use wakepro_config::MergeConfig;

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub delay: Duration,
    pub request_cooldown: Option<Duration>,
    pub max_buffered: usize,
    pub separator: String,
}

impl MergeSettings {
    /// `None` when merging is disabled.
    pub fn from_config(config: &MergeConfig) -> Option<Self> {
        Some(Self {
            delay: config.delay()?,
            request_cooldown: config.request_cooldown(),
            max_buffered: config.max_buffered.max(1),
            separator: config.separator.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The debounce window passed without another accepted message.
    Elapsed,
    /// The buffer cap was hit.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedText {
    pub text: String,
    pub parts: usize,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    Overflow,
    Cooldown,
}

#[derive(Debug)]
pub enum MergeOutcome {
    /// This message opened a session; its caller forwards the merged text.
    Opened(PendingMerge),
    /// Folded into the open session.
    Buffered,
    Dropped(DropCause),
}

/// The opener's handle on a session's single result.
#[derive(Debug)]
pub struct PendingMerge {
    user_id: String,
    rx: oneshot::Receiver<MergedText>,
}

impl PendingMerge {
    pub async fn wait(self) -> Result<MergedText, WakeError> {
        self.rx.await.map_err(|_| WakeError::SessionLost {
            user_id: self.user_id,
        })
    }
}

/// Delayed finalizer task; dropping the handle cancels it.
pub(crate) struct DebounceTimer {
    handle: JoinHandle<()>,
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) struct MergeSession {
    pub(crate) texts: Vec<String>,
    timer_id: u64,
    timer: DebounceTimer,
    result: oneshot::Sender<MergedText>,
}

impl MergeSession {
    fn close(self, uid: &str, separator: &str, resolution: Resolution) {
        let MergeSession {
            texts,
            timer,
            result,
            ..
        } = self;
        let merged = MergedText {
            text: texts.join(separator),
            parts: texts.len(),
            resolution,
        };
        debug!(
            "merge session for {} closed ({:?}, {} parts)",
            uid, resolution, merged.parts
        );
        if result.send(merged).is_err() {
            debug!("merge result for {} had no waiter", uid);
        }
        drop(timer);
    }
}

enum Step {
    Open,
    Rearm,
    Overflow,
    Cooldown,
    Append,
}

pub struct MergeBuffer {
    settings: MergeSettings,
}

impl MergeBuffer {
    pub fn new(settings: MergeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    /// Routes one woken message into the member's session. The member lock is
    /// held for the whole decision and mutation.
    pub async fn on_candidate_message(
        &self,
        member: &Arc<MemberState>,
        text: &str,
        now: Instant,
    ) -> MergeOutcome {
        let mut guard = member.lock().await;
        let state = &mut *guard;

        let step = match &state.session {
            None => Step::Open,
            Some(s) if s.texts.first().is_some_and(|first| first == text) => Step::Rearm,
            Some(s) if s.texts.len() >= self.settings.max_buffered => Step::Overflow,
            Some(_) if self.cooling_down(state.last_request, now) => Step::Cooldown,
            Some(_) => Step::Append,
        };

        match step {
            Step::Open => {
                let (tx, rx) = oneshot::channel();
                let (timer_id, timer) = self.arm(member, state);
                state.session = Some(MergeSession {
                    texts: vec![text.to_string()],
                    timer_id,
                    timer,
                    result: tx,
                });
                state.last_request = Some(now);
                debug!("merge session opened for {}", member.uid());
                MergeOutcome::Opened(PendingMerge {
                    user_id: member.uid().to_string(),
                    rx,
                })
            }
            Step::Rearm => {
                self.rearm(member, state);
                debug!("duplicate delivery from {}, timer re-armed", member.uid());
                MergeOutcome::Buffered
            }
            Step::Overflow => {
                if let Some(session) = state.session.take() {
                    session.close(member.uid(), &self.settings.separator, Resolution::Forced);
                }
                MergeOutcome::Dropped(DropCause::Overflow)
            }
            Step::Cooldown => {
                debug!("{} is inside request cooldown, message dropped", member.uid());
                MergeOutcome::Dropped(DropCause::Cooldown)
            }
            Step::Append => {
                if let Some(session) = state.session.as_mut() {
                    session.texts.push(text.to_string());
                }
                state.last_request = Some(now);
                self.rearm(member, state);
                MergeOutcome::Buffered
            }
        }
    }

    fn cooling_down(&self, last_request: Option<Instant>, now: Instant) -> bool {
        match (self.settings.request_cooldown, since(now, last_request)) {
            (Some(cooldown), Some(elapsed)) => elapsed < cooldown,
            _ => false,
        }
    }

    fn rearm(&self, member: &Arc<MemberState>, state: &mut MemberInner) {
        let (timer_id, timer) = self.arm(member, state);
        if let Some(session) = state.session.as_mut() {
            session.timer_id = timer_id;
            // Replacing the old timer aborts it.
            session.timer = timer;
        }
    }

    fn arm(&self, member: &Arc<MemberState>, state: &mut MemberInner) -> (u64, DebounceTimer) {
        let timer_id = state.next_timer_id();
        let member = Arc::clone(member);
        let delay = self.settings.delay;
        let separator = self.settings.separator.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = member.lock().await;
            let current = inner
                .session
                .as_ref()
                .is_some_and(|s| s.timer_id == timer_id);
            if !current {
                return;
            }
            if let Some(session) = inner.session.take() {
                session.close(member.uid(), &separator, Resolution::Elapsed);
            }
        });

        (timer_id, DebounceTimer { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn buffer(delay_secs: u64, cooldown_secs: Option<u64>, cap: usize) -> MergeBuffer {
        MergeBuffer::new(MergeSettings {
            delay: Duration::from_secs(delay_secs),
            request_cooldown: cooldown_secs.map(Duration::from_secs),
            max_buffered: cap,
            separator: " ".to_string(),
        })
    }

    fn member() -> Arc<MemberState> {
        Arc::new(MemberState::new("u1"))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_forwarded_once_after_quiet_period() {
        let buffer = buffer(2, None, 10);
        let member = member();
        let start = Instant::now();

        let MergeOutcome::Opened(pending) =
            buffer.on_candidate_message(&member, "a", Instant::now()).await
        else {
            panic!("first message should open a session");
        };
        sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            buffer.on_candidate_message(&member, "b", Instant::now()).await,
            MergeOutcome::Buffered
        ));
        sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            buffer.on_candidate_message(&member, "c", Instant::now()).await,
            MergeOutcome::Buffered
        ));

        let merged = pending.wait().await.expect("merged");
        assert_eq!(merged.text, "a b c");
        assert_eq!(merged.parts, 3);
        assert_eq!(merged.resolution, Resolution::Elapsed);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_millis(4100));
        assert!(!member.lock().await.in_merging());
    }

    #[tokio::test(start_paused = true)]
    async fn flood_force_flushes_at_cap_without_waiting() {
        let buffer = buffer(2, None, 10);
        let member = member();
        let start = Instant::now();

        let MergeOutcome::Opened(pending) =
            buffer.on_candidate_message(&member, "m0", start).await
        else {
            panic!("first message should open a session");
        };
        for i in 1..10 {
            let outcome = buffer
                .on_candidate_message(&member, &format!("m{}", i), start)
                .await;
            assert!(matches!(outcome, MergeOutcome::Buffered));
        }
        let outcome = buffer.on_candidate_message(&member, "m10", start).await;
        assert!(matches!(outcome, MergeOutcome::Dropped(DropCause::Overflow)));

        let merged = pending.wait().await.expect("merged");
        assert_eq!(merged.parts, 10);
        assert_eq!(merged.resolution, Resolution::Forced);
        assert!(merged.text.starts_with("m0 m1"));
        assert!(!merged.text.contains("m10"));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!member.lock().await.in_merging());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocked_message_neither_buffers_nor_extends() {
        let buffer = buffer(2, Some(5), 10);
        let member = member();
        let start = Instant::now();

        let MergeOutcome::Opened(pending) =
            buffer.on_candidate_message(&member, "a", start).await
        else {
            panic!("first message should open a session");
        };
        sleep(Duration::from_secs(1)).await;
        let outcome = buffer.on_candidate_message(&member, "b", Instant::now()).await;
        assert!(matches!(outcome, MergeOutcome::Dropped(DropCause::Cooldown)));
        assert_eq!(member.lock().await.buffered(), ["a".to_string()]);

        let merged = pending.wait().await.expect("merged");
        assert_eq!(merged.text, "a");
        assert!(start.elapsed() < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_delivery_rearms_without_growing() {
        let buffer = buffer(2, None, 10);
        let member = member();
        let start = Instant::now();

        let MergeOutcome::Opened(pending) =
            buffer.on_candidate_message(&member, "hello", start).await
        else {
            panic!("first message should open a session");
        };
        sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            buffer.on_candidate_message(&member, "hello", Instant::now()).await,
            MergeOutcome::Buffered
        ));

        let merged = pending.wait().await.expect("merged");
        assert_eq!(merged.text, "hello");
        assert_eq!(merged.parts, 1);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_messages_open_exactly_one_session() {
        let buffer = Arc::new(buffer(2, None, 10));
        let member = member();

        let mut handles = Vec::new();
        for i in 0..8 {
            let buffer = Arc::clone(&buffer);
            let member = Arc::clone(&member);
            handles.push(tokio::spawn(async move {
                buffer
                    .on_candidate_message(&member, &format!("msg {}", i), Instant::now())
                    .await
            }));
        }

        let mut pending = Vec::new();
        for handle in handles {
            if let MergeOutcome::Opened(p) = handle.await.expect("join") {
                pending.push(p);
            }
        }
        assert_eq!(pending.len(), 1);

        let merged = pending.remove(0).wait().await.expect("merged");
        assert_eq!(merged.parts, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_still_closes_session() {
        let buffer = buffer(2, None, 10);
        let member = member();

        let outcome = buffer.on_candidate_message(&member, "a", Instant::now()).await;
        drop(outcome);
        assert!(member.lock().await.in_merging());

        sleep(Duration::from_secs(3)).await;
        assert!(!member.lock().await.in_merging());
    }

    #[test]
    fn zero_delay_disables_merging() {
        let config = MergeConfig {
            delay_secs: Some(0.0),
            ..MergeConfig::default()
        };
        assert!(MergeSettings::from_config(&config).is_none());

        let config = MergeConfig {
            delay_secs: Some(2.0),
            max_buffered: 0,
            ..MergeConfig::default()
        };
        let settings = MergeSettings::from_config(&config).expect("enabled");
        assert_eq!(settings.delay, Duration::from_secs(2));
        assert_eq!(settings.max_buffered, 1);
    }
}
