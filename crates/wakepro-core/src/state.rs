//! In-memory group and member state.
//!
//! Entries are created on first contact and live for the process lifetime.
//! Only their inner buffers are bounded.

use crate::merge::MergeSession;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use wakepro_config::Config;
use wakepro_relevance::{RelevanceEngine, TopicCorpus};

pub struct StateStore {
    groups: Mutex<HashMap<String, Arc<GroupState>>>,
    relevance: RelevanceEngine,
    bot_message_capacity: usize,
}

impl StateStore {
    pub fn new(relevance: RelevanceEngine, bot_message_capacity: usize) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            relevance,
            bot_message_capacity: bot_message_capacity.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RelevanceEngine::new(&config.relevance),
            config.relevance.recent_bot_messages,
        )
    }

    pub fn relevance(&self) -> &RelevanceEngine {
        &self.relevance
    }

    /// First caller creates the group; everyone else gets the same instance.
    pub async fn get_or_create_group(&self, gid: &str) -> Arc<GroupState> {
        let mut groups = self.groups.lock().await;
        groups
            .entry(gid.to_string())
            .or_insert_with(|| {
                Arc::new(GroupState::new(
                    gid,
                    self.relevance.new_corpus(),
                    self.bot_message_capacity,
                ))
            })
            .clone()
    }

    pub async fn group(&self, gid: &str) -> Option<Arc<GroupState>> {
        self.groups.lock().await.get(gid).cloned()
    }

    pub async fn group_count(&self) -> usize {
        self.groups.lock().await.len()
    }
}

pub struct GroupState {
    gid: String,
    members: Mutex<HashMap<String, Arc<MemberState>>>,
    inner: Mutex<GroupInner>,
}

pub struct GroupInner {
    pub shutup_until: Option<Instant>,
    bot_messages: VecDeque<String>,
    bot_message_capacity: usize,
    pub corpus: TopicCorpus,
}

impl GroupInner {
    pub fn is_shut_up(&self, now: Instant) -> bool {
        self.shutup_until.is_some_and(|until| until > now)
    }

    /// Ring buffer of the agent's latest replies, oldest dropped first.
    pub fn push_bot_message(&mut self, text: &str) {
        self.bot_messages.push_back(text.to_string());
        while self.bot_messages.len() > self.bot_message_capacity {
            self.bot_messages.pop_front();
        }
    }

    pub fn recent_bot_messages(&self) -> Vec<String> {
        self.bot_messages.iter().cloned().collect()
    }
}

impl GroupState {
    fn new(gid: &str, corpus: TopicCorpus, bot_message_capacity: usize) -> Self {
        Self {
            gid: gid.to_string(),
            members: Mutex::new(HashMap::new()),
            inner: Mutex::new(GroupInner {
                shutup_until: None,
                bot_messages: VecDeque::with_capacity(bot_message_capacity),
                bot_message_capacity,
                corpus,
            }),
        }
    }

    pub fn gid(&self) -> &str {
        &self.gid
    }

    pub async fn get_or_create_member(&self, uid: &str) -> Arc<MemberState> {
        let mut members = self.members.lock().await;
        members
            .entry(uid.to_string())
            .or_insert_with(|| Arc::new(MemberState::new(uid)))
            .clone()
    }

    pub async fn member(&self, uid: &str) -> Option<Arc<MemberState>> {
        self.members.lock().await.get(uid).cloned()
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn lock(&self) -> MutexGuard<'_, GroupInner> {
        self.inner.lock().await
    }
}

/// Per-user state. The single mutex serializes merge-buffer mutation with
/// every other read-modify-write on the member.
pub struct MemberState {
    uid: String,
    inner: Mutex<MemberInner>,
}

#[derive(Default)]
pub struct MemberInner {
    pub silence_until: Option<Instant>,
    pub last_wake: Option<Instant>,
    pub last_request: Option<Instant>,
    pub last_response: Option<Instant>,
    pub(crate) rebuttal_pending: bool,
    pub(crate) session: Option<MergeSession>,
    pub(crate) timer_seq: u64,
}

impl MemberInner {
    pub fn is_silenced(&self, now: Instant) -> bool {
        self.silence_until.is_some_and(|until| until > now)
    }

    /// At most one merge session per member; this is true while it is open.
    pub fn in_merging(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffered(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.texts.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn next_timer_id(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }
}

impl MemberState {
    pub(crate) fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            inner: Mutex::new(MemberInner::default()),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub async fn lock(&self) -> MutexGuard<'_, MemberInner> {
        self.inner.lock().await
    }
}

/// Time elapsed since `then`, or `None` if it never happened.
pub(crate) fn since(now: Instant, then: Option<Instant>) -> Option<Duration> {
    then.map(|t| now.saturating_duration_since(t))
}
