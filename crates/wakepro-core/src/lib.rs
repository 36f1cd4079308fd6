//! Wakepro Core
//!
//! Per-group wake, silence and merge state machines, and the runtime that
//! feeds them from the event bus.

mod error;
mod history;
mod merge;
mod sentiment;
mod silence;
mod state;
mod wake;

pub use error::WakeError;
pub use history::HistorySource;
pub use merge::{
    DropCause, MergeBuffer, MergeOutcome, MergeSettings, MergedText, PendingMerge, Resolution,
};
pub use sentiment::{LexiconSentiment, NeutralSentiment, SentimentScorer};
pub use silence::{SilencePolicy, Suppression, Trigger};
pub use state::{GroupInner, GroupState, MemberInner, MemberState, StateStore};
pub use wake::{
    Admission, ConsumeReason, IgnoreReason, MergeWait, Verdict, WakeDecision, WakeEngine,
    WakeReason,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use wakepro_ipc::{Decision, Envelope, EventBus, MessageKind};

const MAX_INBOUND_CONCURRENCY: usize = 64;

fn inbound_scope_key(group_id: &str, sender_id: &str) -> String {
    format!("{}:{}", group_id, sender_id)
}

/// A message's place in its sender's admission order. `previous` resolves
/// once the prior message of the same sender has been admitted.
struct AdmissionTurn {
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl AdmissionTurn {
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // A dropped sender also means the earlier message is past admission.
            let _ = previous.await;
        }
    }
}

/// Drives a `WakeEngine` from the event bus.
///
/// Envelopes are handled concurrently: a message waiting on its merge
/// session must not hold up the follow-ups that feed it. Messages of one
/// sender in one group are still admitted in arrival order.
pub struct WakeRuntime {
    engine: Arc<WakeEngine>,
    inbound: broadcast::Receiver<Envelope>,
    outbound: broadcast::Sender<Decision>,
}

impl WakeRuntime {
    pub fn new(engine: Arc<WakeEngine>, bus: &EventBus) -> Self {
        Self {
            engine,
            inbound: bus.subscribe(),
            outbound: bus.outbound_sender(),
        }
    }

    /// Runs until every inbound sender is gone, then waits for in-flight
    /// messages (including open merge sessions) to settle.
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(MAX_INBOUND_CONCURRENCY));
        let mut tasks = JoinSet::new();
        let mut scopes: HashMap<String, oneshot::Receiver<()>> = HashMap::new();

        loop {
            match self.inbound.recv().await {
                Ok(envelope) => {
                    let engine = Arc::clone(&self.engine);
                    let outbound = self.outbound.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let turn = match &envelope.kind {
                        MessageKind::Inbound(msg) => {
                            let (done, next) = oneshot::channel();
                            let key = inbound_scope_key(&msg.group_id, &msg.sender_id);
                            let previous = scopes.insert(key, next);
                            Some(AdmissionTurn { previous, done })
                        }
                        MessageKind::BotReply { .. } => None,
                    };

                    tasks.spawn(async move {
                        let mut turn = turn;
                        // Queue behind the sender's previous message before
                        // taking a permit, so waiting turns hold no permits.
                        if let Some(turn) = turn.as_mut() {
                            turn.wait().await;
                        }
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(err) => {
                                error!(
                                    "Inbound worker semaphore closed (trace_id={}): {}",
                                    envelope.trace_id, err
                                );
                                return;
                            }
                        };
                        Self::process(&engine, envelope, turn, &outbound).await;
                    });

                    while let Some(finished) = tasks.try_join_next() {
                        if let Err(e) = finished {
                            error!("Inbound worker failed: {}", e);
                        }
                    }
                    // Admitted scopes whose turn is over need no entry.
                    scopes.retain(|_, next| matches!(next.try_recv(), Err(TryRecvError::Empty)));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, draining {} worker(s)", tasks.len());
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event bus lagged by {} messages", n);
                }
            }
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Inbound worker failed: {}", e);
            }
        }
    }

    async fn process(
        engine: &WakeEngine,
        envelope: Envelope,
        turn: Option<AdmissionTurn>,
        outbound: &broadcast::Sender<Decision>,
    ) {
        match envelope.kind {
            MessageKind::Inbound(msg) => {
                let admission = engine.admit(&msg).await;
                drop(turn);
                let verdict = engine.settle(admission).await;
                let decision = Decision {
                    trace_id: envelope.trace_id,
                    group_id: msg.group_id,
                    sender_id: msg.sender_id,
                    disposition: verdict.to_disposition(),
                };
                if let Err(e) = outbound.send(decision) {
                    debug!(
                        "No decision subscribers (trace_id={})",
                        e.0.trace_id
                    );
                }
            }
            MessageKind::BotReply {
                group_id,
                user_id,
                text,
            } => {
                engine.on_response_sent(&group_id, &user_id, &text).await;
            }
        }
    }
}
