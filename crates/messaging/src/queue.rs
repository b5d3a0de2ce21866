use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cxbridge_core::message::{BotMessage, MessageSink};
use cxbridge_core::nlp::IntentEnricher;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// User text recorded for one sent turn, waiting to be claimed by a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTurn {
    pub turn: u64,
    pub text: Option<String>,
}

/// Per-turn correlation records in send order. Each reply claims the oldest one.
#[derive(Debug, Default)]
pub struct PendingTurns {
    inner: Mutex<PendingState>,
}

#[derive(Debug, Default)]
struct PendingState {
    next_turn: u64,
    queue: VecDeque<PendingTurn>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PendingTurns {
    pub fn record(&self, text: Option<String>) -> u64 {
        let mut state = lock(&self.inner);
        let turn = state.next_turn;
        state.next_turn += 1;
        state.queue.push_back(PendingTurn { turn, text });
        turn
    }

    pub fn take_next(&self) -> Option<PendingTurn> {
        lock(&self.inner).queue.pop_front()
    }

    /// Drops a record whose turn never reached the platform.
    pub fn discard(&self, turn: u64) {
        lock(&self.inner).queue.retain(|pending| pending.turn != turn);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reply waiting for enrichment together with the turn it answers.
#[derive(Debug)]
pub struct EnrichmentJob {
    pub message: BotMessage,
    pub pending: Option<PendingTurn>,
}

enum Command {
    Job(EnrichmentJob),
    Drain(oneshot::Sender<()>),
}

/// Single-worker pipeline that attaches intent data to replies before delivery.
pub struct EnrichmentQueue {
    commands: mpsc::UnboundedSender<Command>,
    pending: PendingTurns,
    sink: Arc<dyn MessageSink>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EnrichmentQueue {
    pub fn spawn(enricher: Arc<dyn IntentEnricher>, sink: Arc<dyn MessageSink>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(enricher, sink.clone(), command_rx));

        Self {
            commands,
            pending: PendingTurns::default(),
            sink,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn pending(&self) -> &PendingTurns {
        &self.pending
    }

    pub fn sink(&self) -> &Arc<dyn MessageSink> {
        &self.sink
    }

    /// Queues `message` against the oldest unclaimed turn. Never waits.
    pub fn enqueue(&self, message: BotMessage) {
        let pending = self.pending.take_next();
        debug!(
            event_name = "messaging.enrichment.enqueued",
            message_id = message.message_id.as_deref().unwrap_or("unknown"),
            turn = pending.as_ref().map(|pending| pending.turn),
            "queued reply for enrichment"
        );

        if let Err(mpsc::error::SendError(Command::Job(job))) =
            self.commands.send(Command::Job(EnrichmentJob { message, pending }))
        {
            warn!(
                event_name = "messaging.enrichment.worker_gone",
                message_id = job.message.message_id.as_deref().unwrap_or("unknown"),
                "enrichment worker stopped; reply dropped"
            );
        }
    }

    /// Waits until every message queued before this call has been delivered.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Drain(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flushes, then stops the worker.
    pub async fn shutdown(&self) {
        self.flush().await;
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.abort();
        }
    }
}

async fn run_worker(
    enricher: Arc<dyn IntentEnricher>,
    sink: Arc<dyn MessageSink>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Job(job) => {
                let message = enrich(enricher.as_ref(), job).await;
                sink.deliver(message).await;
            }
            Command::Drain(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn enrich(enricher: &dyn IntentEnricher, job: EnrichmentJob) -> BotMessage {
    let EnrichmentJob { mut message, pending } = job;
    let Some(PendingTurn { turn, text: Some(text) }) = pending else {
        return message;
    };
    if text.trim().is_empty() {
        return message;
    }

    match enricher.enrich(&text, message.message_id.as_deref()).await {
        Ok(nlp) => {
            debug!(
                event_name = "messaging.enrichment.completed",
                turn,
                intent = nlp.intent.as_ref().map(|intent| intent.name.as_str()).unwrap_or("none"),
                "reply enriched"
            );
            message.nlp = Some(nlp);
        }
        Err(error) => {
            warn!(
                event_name = "messaging.enrichment.failed",
                turn,
                message_id = message.message_id.as_deref().unwrap_or("unknown"),
                error = %error,
                "intent resolution failed; delivering reply without nlp data"
            );
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use cxbridge_core::message::BotMessage;
    use cxbridge_core::nlp::{IntentEnricher, IntentMatch, NlpResult, ResolutionError};
    use tokio::sync::{mpsc, Mutex};

    use super::{EnrichmentQueue, PendingTurns};

    /// Echoes the utterance back as the intent name after a delay that shrinks per call.
    #[derive(Default)]
    struct EchoEnricher {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IntentEnricher for EchoEnricher {
        async fn enrich(
            &self,
            utterance: &str,
            _message_id: Option<&str>,
        ) -> Result<NlpResult, ResolutionError> {
            let delay = {
                let mut seen = self.seen.lock().await;
                seen.push(utterance.to_owned());
                Duration::from_millis(if seen.len() == 1 { 30 } else { 0 })
            };
            tokio::time::sleep(delay).await;
            if utterance == "explode" {
                return Err(ResolutionError::Backend("detect failed".to_owned()));
            }
            Ok(NlpResult {
                intent: Some(IntentMatch {
                    name: utterance.to_owned(),
                    confidence: 0.9,
                    incomprehension: false,
                    intents: Vec::new(),
                }),
                entities: Vec::new(),
            })
        }
    }

    fn reply(id: &str) -> BotMessage {
        BotMessage { message_id: Some(id.to_owned()), ..BotMessage::default() }
    }

    fn intent_name(message: &BotMessage) -> Option<&str> {
        message.nlp.as_ref()?.intent.as_ref().map(|intent| intent.name.as_str())
    }

    #[test]
    fn pending_turns_are_claimed_oldest_first() {
        let pending = PendingTurns::default();
        let first = pending.record(Some("one".to_owned()));
        let second = pending.record(Some("two".to_owned()));
        pending.record(None);
        pending.discard(second);

        assert_eq!(pending.take_next().map(|turn| turn.turn), Some(first));
        assert_eq!(pending.take_next().map(|turn| turn.text), Some(None));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn overlapping_turns_are_enriched_against_their_own_text() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BotMessage>();
        let queue = EnrichmentQueue::spawn(Arc::new(EchoEnricher::default()), Arc::new(tx));

        queue.pending().record(Some("first".to_owned()));
        queue.pending().record(Some("second".to_owned()));
        queue.enqueue(reply("r-1"));
        queue.enqueue(reply("r-2"));
        queue.flush().await;

        let first = rx.recv().await.expect("first reply");
        let second = rx.recv().await.expect("second reply");
        assert_eq!(first.message_id.as_deref(), Some("r-1"));
        assert_eq!(intent_name(&first), Some("first"));
        assert_eq!(second.message_id.as_deref(), Some("r-2"));
        assert_eq!(intent_name(&second), Some("second"));
    }

    #[tokio::test]
    async fn replies_without_pending_text_pass_through() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BotMessage>();
        let queue = EnrichmentQueue::spawn(Arc::new(EchoEnricher::default()), Arc::new(tx));

        queue.pending().record(None);
        queue.enqueue(reply("button-turn"));
        queue.enqueue(reply("unsolicited"));
        queue.flush().await;

        assert!(rx.recv().await.expect("reply").nlp.is_none());
        assert!(rx.recv().await.expect("reply").nlp.is_none());
    }

    #[tokio::test]
    async fn resolution_failure_still_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BotMessage>();
        let queue = EnrichmentQueue::spawn(Arc::new(EchoEnricher::default()), Arc::new(tx));

        queue.pending().record(Some("explode".to_owned()));
        queue.pending().record(Some("after".to_owned()));
        queue.enqueue(reply("r-1"));
        queue.enqueue(reply("r-2"));
        queue.shutdown().await;

        let failed = rx.recv().await.expect("reply");
        assert_eq!(failed.message_id.as_deref(), Some("r-1"));
        assert!(failed.nlp.is_none());
        assert_eq!(intent_name(&rx.recv().await.expect("reply")), Some("after"));
    }
}
