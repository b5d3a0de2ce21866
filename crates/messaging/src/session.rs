use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cxbridge_core::errors::ConnectorError;
use cxbridge_core::message::{BotMessage, Media, MessageSink, UserMessage};
use cxbridge_core::policy::CallPolicy;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frames::{ClientFrame, ServerFrame, UploadEvent};
use crate::queue::EnrichmentQueue;
use crate::translate;
use crate::transport::{LinkEvent, SocketTransport, TransportError};
use crate::upload::{AttachmentUploader, UploadError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingConfirmation,
    Ready,
    Closed,
    Failed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Handshake(String),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("session is not ready (state: {0:?})")]
    NotReady(SessionState),
    #[error("session was already started")]
    AlreadyStarted,
    #[error("could not encode frame: {0}")]
    Encode(String),
}

impl From<SessionError> for ConnectorError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Transport(error) => Self::Transport(error.to_string()),
            SessionError::Encode(message) => Self::Transport(message),
            SessionError::Handshake(message) => Self::Handshake(message),
            SessionError::Upload(error) => Self::Upload(error.to_string()),
            error @ (SessionError::NotReady(_) | SessionError::AlreadyStarted) => {
                Self::Lifecycle(error.to_string())
            }
        }
    }
}

/// Where translated replies go.
#[derive(Clone)]
pub enum Delivery {
    Direct(Arc<dyn MessageSink>),
    Enriched(Arc<EnrichmentQueue>),
}

impl Delivery {
    async fn dispatch(&self, message: BotMessage) {
        match self {
            Self::Direct(sink) => sink.deliver(message).await,
            Self::Enriched(queue) => queue.enqueue(message),
        }
    }

    fn sink(&self) -> &Arc<dyn MessageSink> {
        match self {
            Self::Direct(sink) => sink,
            Self::Enriched(queue) => queue.sink(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub websocket_endpoint: String,
    pub deployment_id: String,
    pub policy: CallPolicy,
}

impl SessionSettings {
    pub fn socket_url(&self) -> String {
        format!("{}?deploymentId={}", self.websocket_endpoint, self.deployment_id)
    }
}

type UploadWaiter = Arc<Mutex<Option<mpsc::UnboundedSender<UploadEvent>>>>;
type TransportFailure = Arc<Mutex<Option<TransportError>>>;

struct LinkHandle {
    outbound: mpsc::UnboundedSender<String>,
    stop: oneshot::Sender<()>,
}

/// One web messaging conversation over a persistent socket.
pub struct ChannelSession {
    settings: SessionSettings,
    transport: Arc<dyn SocketTransport>,
    uploader: AttachmentUploader,
    delivery: Delivery,
    conversation_id: String,
    state: Arc<watch::Sender<SessionState>>,
    link: Mutex<Option<LinkHandle>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    upload_waiter: UploadWaiter,
    upload_lock: tokio::sync::Mutex<()>,
    transport_failure: TransportFailure,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transition(state: &watch::Sender<SessionState>, next: SessionState, conversation_id: &str) {
    let previous = state.send_replace(next);
    if previous != next {
        debug!(
            event_name = "messaging.session.state_changed",
            conversation_id,
            from = ?previous,
            to = ?next,
            "session state changed"
        );
    }
}

impl ChannelSession {
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn SocketTransport>,
        uploader: AttachmentUploader,
        delivery: Delivery,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            settings,
            transport,
            uploader,
            delivery,
            conversation_id: Uuid::new_v4().to_string(),
            state: Arc::new(state),
            link: Mutex::new(None),
            reader: Mutex::new(None),
            upload_waiter: Arc::new(Mutex::new(None)),
            upload_lock: tokio::sync::Mutex::new(()),
            transport_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Why the socket was lost after the session became ready, if it was.
    pub fn transport_failure(&self) -> Option<TransportError> {
        lock(&self.transport_failure).clone()
    }

    /// Opens the socket and resolves once the platform confirms the session.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Connecting || lock(&self.link).is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        let url = self.settings.socket_url();
        let policy = &self.settings.policy;
        let link = match policy.deadline(self.transport.open(&url)).await {
            Ok(Ok(link)) => link,
            Ok(Err(error)) => {
                transition(&self.state, SessionState::Failed, &self.conversation_id);
                return Err(error.into());
            }
            Err(timed_out) => {
                transition(&self.state, SessionState::Failed, &self.conversation_id);
                return Err(SessionError::Transport(TransportError::Connect(timed_out.to_string())));
            }
        };
        info!(
            event_name = "messaging.session.connected",
            conversation_id = %self.conversation_id,
            url = %url,
            "web messaging socket open; configuring session"
        );

        transition(&self.state, SessionState::AwaitingConfirmation, &self.conversation_id);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = ReaderContext {
            conversation_id: self.conversation_id.clone(),
            state: self.state.clone(),
            delivery: self.delivery.clone(),
            upload_waiter: self.upload_waiter.clone(),
            transport_failure: self.transport_failure.clone(),
        };
        let handle = tokio::spawn(reader.run(link.inbound, stop_rx, ready_tx));
        *lock(&self.reader) = Some(handle);

        let configure = ClientFrame::ConfigureSession {
            deployment_id: self.settings.deployment_id.clone(),
            token: self.conversation_id.clone(),
        }
        .encode()
        .map_err(|error| SessionError::Encode(error.to_string()))?;
        let sent = link.outbound.send(configure);
        *lock(&self.link) = Some(LinkHandle { outbound: link.outbound, stop: stop_tx });
        if sent.is_err() {
            self.abort_start();
            return Err(TransportError::Send("socket writer closed".to_owned()).into());
        }

        match policy.deadline(ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(
                    event_name = "messaging.session.ready",
                    conversation_id = %self.conversation_id,
                    "web messaging session configured"
                );
                Ok(())
            }
            Ok(Ok(Err(error))) => {
                self.abort_start();
                Err(error)
            }
            Ok(Err(_)) => {
                self.abort_start();
                Err(SessionError::Handshake(
                    "session reader stopped before the session was configured".to_owned(),
                ))
            }
            Err(timed_out) => {
                self.abort_start();
                Err(SessionError::Handshake(format!("session confirmation {timed_out}")))
            }
        }
    }

    fn abort_start(&self) {
        transition(&self.state, SessionState::Failed, &self.conversation_id);
        if let Some(link) = lock(&self.link).take() {
            let _ = link.stop.send(());
        }
    }

    /// Sends one user turn. Attachments are uploaded first unless a button response is sent.
    pub async fn send_user_turn(&self, message: &UserMessage) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Ready {
            if let Some(failure) = self.transport_failure() {
                return Err(failure.into());
            }
            return Err(SessionError::NotReady(state));
        }
        let outbound = lock(&self.link)
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(SessionError::NotReady(state))?;

        let mut attachment_ids = Vec::new();
        if message.button_response().is_none() {
            for media in &message.media {
                attachment_ids.push(self.upload(&outbound, media).await?);
            }
        }

        let encoded = translate::encode_user_message(message, &attachment_ids);
        let pending_text = encoded.text.clone();
        let frame = ClientFrame::OnMessage { token: self.conversation_id.clone(), message: encoded }
            .encode()
            .map_err(|error| SessionError::Encode(error.to_string()))?;

        let turn = match &self.delivery {
            Delivery::Enriched(queue) => Some(queue.pending().record(pending_text)),
            Delivery::Direct(_) => None,
        };
        if outbound.send(frame).is_err() {
            if let (Some(turn), Delivery::Enriched(queue)) = (turn, &self.delivery) {
                queue.pending().discard(turn);
            }
            return Err(TransportError::Send("socket writer closed".to_owned()).into());
        }

        debug!(
            event_name = "messaging.session.user_turn_sent",
            conversation_id = %self.conversation_id,
            attachments = attachment_ids.len(),
            "user turn sent"
        );
        Ok(())
    }

    async fn upload(
        &self,
        outbound: &mpsc::UnboundedSender<String>,
        media: &Media,
    ) -> Result<String, SessionError> {
        let _exclusive = self.upload_lock.lock().await;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        *lock(&self.upload_waiter) = Some(events_tx);

        let result =
            self.uploader.upload(&self.conversation_id, outbound, &mut events, media).await;
        *lock(&self.upload_waiter) = None;

        result.map_err(|error| {
            warn!(
                event_name = "messaging.upload.failed",
                conversation_id = %self.conversation_id,
                error = %error,
                "attachment upload failed"
            );
            SessionError::from(error)
        })
    }

    /// Closes the socket, stops the reader and drains pending enrichment.
    pub async fn stop(&self) {
        if let Some(link) = lock(&self.link).take() {
            let _ = link.stop.send(());
        }
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }

        if self.state() != SessionState::Failed {
            transition(&self.state, SessionState::Closed, &self.conversation_id);
        }
        if let Delivery::Enriched(queue) = &self.delivery {
            queue.flush().await;
        }
        info!(
            event_name = "messaging.session.stopped",
            conversation_id = %self.conversation_id,
            "web messaging session stopped"
        );
    }
}

struct ReaderContext {
    conversation_id: String,
    state: Arc<watch::Sender<SessionState>>,
    delivery: Delivery,
    upload_waiter: UploadWaiter,
    transport_failure: TransportFailure,
}

impl ReaderContext {
    async fn run(
        self,
        mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
        mut stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<Result<(), SessionError>>,
    ) {
        let mut ready = Some(ready);

        loop {
            // Frames already received are dispatched before a stop request is honored.
            let event = tokio::select! {
                biased;
                event = inbound.recv() => event,
                _ = &mut stop => break,
            };

            match event {
                Some(LinkEvent::Frame(text)) => {
                    if !self.handle_frame(&text, &mut ready).await {
                        break;
                    }
                }
                Some(LinkEvent::Error(error)) => {
                    self.fail_transport(&mut ready, error);
                    break;
                }
                Some(LinkEvent::Closed) | None => {
                    self.fail_transport(&mut ready, "socket closed by platform".to_owned());
                    break;
                }
            }
        }

        *lock(&self.upload_waiter) = None;
    }

    /// Returns false when the reader should stop.
    async fn handle_frame(
        &self,
        text: &str,
        ready: &mut Option<oneshot::Sender<Result<(), SessionError>>>,
    ) -> bool {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(
                    conversation_id = %self.conversation_id,
                    error = %error,
                    "ignoring frame that is not a platform event"
                );
                return true;
            }
        };

        let state = *self.state.borrow();
        if state == SessionState::AwaitingConfirmation {
            if frame.is_session_confirmed() {
                transition(&self.state, SessionState::Ready, &self.conversation_id);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
            } else if frame.is_error_response() {
                let reason = frame.handshake_error();
                warn!(
                    event_name = "messaging.session.rejected",
                    conversation_id = %self.conversation_id,
                    code = frame.code,
                    reason = %reason,
                    "platform rejected session configuration"
                );
                transition(&self.state, SessionState::Failed, &self.conversation_id);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(SessionError::Handshake(reason)));
                }
                return false;
            } else {
                debug!(
                    conversation_id = %self.conversation_id,
                    class = %frame.class,
                    "ignoring frame before session confirmation"
                );
            }
            return true;
        }

        if let Some(event) = frame.upload_event() {
            let waiter = lock(&self.upload_waiter).clone();
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(event);
                }
                None => debug!(
                    conversation_id = %self.conversation_id,
                    ?event,
                    "ignoring upload event with no upload in flight"
                ),
            }
            return true;
        }

        if let Some(message) = translate::decode_bot_message(&frame) {
            debug!(
                event_name = "messaging.session.reply_received",
                conversation_id = %self.conversation_id,
                message_id = message.message_id.as_deref().unwrap_or("unknown"),
                "received bot reply"
            );
            self.delivery.dispatch(message).await;
        } else if frame.is_error_response() {
            warn!(
                conversation_id = %self.conversation_id,
                class = %frame.class,
                code = frame.code,
                body = %frame.body_text(),
                "platform reported an error"
            );
        } else {
            debug!(
                conversation_id = %self.conversation_id,
                class = %frame.class,
                "ignoring unhandled frame"
            );
        }
        true
    }

    fn fail_transport(
        &self,
        ready: &mut Option<oneshot::Sender<Result<(), SessionError>>>,
        error: String,
    ) {
        warn!(
            event_name = "messaging.session.transport_failed",
            conversation_id = %self.conversation_id,
            error = %error,
            "web messaging transport failed"
        );
        match ready.take() {
            Some(ready) => {
                transition(&self.state, SessionState::Failed, &self.conversation_id);
                let _ = ready.send(Err(TransportError::Receive(error).into()));
            }
            None => {
                // Recorded before the transition so a turn that observes Failed sees the cause.
                *lock(&self.transport_failure) = Some(TransportError::Receive(error.clone()));
                transition(&self.state, SessionState::Failed, &self.conversation_id);
                self.delivery.sink().transport_failed(&error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use cxbridge_core::message::{BotMessage, Button, Media, UserMessage};
    use cxbridge_core::policy::CallPolicy;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{ChannelSession, Delivery, SessionError, SessionSettings, SessionState};
    use crate::transport::{MemoryPeer, MemoryTransport, TransportError};
    use crate::upload::{AttachmentUploader, BinaryUpload, UploadError};

    struct NoUpload;

    #[async_trait]
    impl BinaryUpload for NoUpload {
        async fn put(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: Vec<u8>,
        ) -> Result<(), UploadError> {
            Ok(())
        }
    }

    struct Harness {
        session: Arc<ChannelSession>,
        peers: mpsc::UnboundedReceiver<MemoryPeer>,
        replies: mpsc::UnboundedReceiver<BotMessage>,
    }

    fn harness() -> Harness {
        let (transport, peers) = MemoryTransport::new();
        let (sink, replies) = mpsc::unbounded_channel::<BotMessage>();
        let session = ChannelSession::new(
            SessionSettings {
                websocket_endpoint: "wss://webmessaging.test/v1".to_owned(),
                deployment_id: "D1".to_owned(),
                policy: CallPolicy::default(),
            },
            Arc::new(transport),
            AttachmentUploader::new(Arc::new(NoUpload), CallPolicy::default()),
            Delivery::Direct(Arc::new(sink)),
        );
        Harness { session: Arc::new(session), peers, replies }
    }

    async fn started(harness: &mut Harness) -> MemoryPeer {
        let session = harness.session.clone();
        let start = tokio::spawn(async move { session.start().await });
        let mut peer = harness.peers.recv().await.expect("socket opened");
        peer.next_sent().await.expect("configure frame");
        peer.push(json!({"type": "response", "class": "SessionResponse", "code": 200,
            "body": {"connected": true}}));
        start.await.expect("join").expect("start should succeed");
        peer
    }

    #[tokio::test]
    async fn handshake_sends_configure_session_and_becomes_ready() {
        let mut harness = harness();
        let session = harness.session.clone();
        let start = tokio::spawn(async move { session.start().await });

        let mut peer = harness.peers.recv().await.expect("socket opened");
        assert_eq!(peer.url, "wss://webmessaging.test/v1?deploymentId=D1");
        let configure = peer.next_sent().await.expect("configure frame");
        assert_eq!(configure["action"], "configureSession");
        assert_eq!(configure["deploymentId"], "D1");
        assert_eq!(configure["token"], harness.session.conversation_id());

        peer.push(json!({"type": "response", "class": "SessionResponse", "code": 200,
            "body": {"connected": true}}));
        start.await.expect("join").expect("start should succeed");
        assert_eq!(harness.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn error_response_rejects_start_with_body() {
        let mut harness = harness();
        let session = harness.session.clone();
        let start = tokio::spawn(async move { session.start().await });

        let mut peer = harness.peers.recv().await.expect("socket opened");
        peer.next_sent().await.expect("configure frame");
        peer.push(json!({"type": "response", "class": "Error", "code": 400,
            "body": "Deployment not found"}));

        let error = start.await.expect("join").expect_err("start should fail");
        assert_eq!(error, SessionError::Handshake("Deployment not found".to_owned()));
        assert_eq!(harness.session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn transport_error_before_ready_fails_start() {
        let mut harness = harness();
        let session = harness.session.clone();
        let start = tokio::spawn(async move { session.start().await });

        let peer = harness.peers.recv().await.expect("socket opened");
        peer.fail("connection reset");

        let error = start.await.expect("join").expect_err("start should fail");
        assert!(matches!(error, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn outbound_messages_are_delivered_in_order() {
        let mut harness = harness();
        let peer = started(&mut harness).await;

        peer.push(json!({"type": "message", "class": "StructuredMessage", "code": 200,
            "body": {"id": "m-1", "direction": "Outbound", "text": "Hi"}}));
        peer.push(json!({"type": "message", "class": "StructuredMessage", "code": 200,
            "body": {"id": "m-echo", "direction": "Inbound", "text": "echo"}}));
        peer.push(json!({"type": "message", "class": "Presence", "code": 200, "body": {}}));
        peer.push(json!({"type": "message", "class": "StructuredMessage", "code": 200,
            "body": {"id": "m-2", "direction": "Outbound", "text": "How can I help?"}}));

        let first = harness.replies.recv().await.expect("first reply");
        let second = harness.replies.recv().await.expect("second reply");
        assert_eq!(first.text.as_deref(), Some("Hi"));
        assert_eq!(second.message_id.as_deref(), Some("m-2"));
    }

    #[tokio::test]
    async fn user_turn_before_start_is_a_lifecycle_error() {
        let harness = harness();
        let error = harness
            .session
            .send_user_turn(&UserMessage::text("hello"))
            .await
            .expect_err("send should fail");
        assert_eq!(error, SessionError::NotReady(SessionState::Connecting));
    }

    #[tokio::test]
    async fn button_turn_skips_attachment_upload() {
        let mut harness = harness();
        let mut peer = started(&mut harness).await;

        let message = UserMessage::default()
            .with_button(Button::new("Yes").payload("yes"))
            .with_media(Media::attachment("a.png", "image/png", vec![1]));
        harness.session.send_user_turn(&message).await.expect("send");

        let frame = peer.next_sent().await.expect("message frame");
        assert_eq!(frame["action"], "onMessage");
        assert_eq!(frame["message"]["content"][0]["contentType"], "ButtonResponse");
        assert_eq!(frame["message"]["content"][0]["buttonResponse"]["payload"], "yes");
    }

    #[tokio::test]
    async fn attachment_upload_precedes_message() {
        let mut harness = harness();
        let mut peer = started(&mut harness).await;

        let session = harness.session.clone();
        let send = tokio::spawn(async move {
            let message = UserMessage::text("see attached")
                .with_media(Media::attachment("/tmp/a.png", "image/png", vec![1, 2]));
            session.send_user_turn(&message).await
        });

        let request = peer.next_sent().await.expect("attachment frame");
        assert_eq!(request["action"], "onAttachment");
        assert_eq!(request["fileName"], "a.png");
        peer.push(json!({"type": "response", "class": "PresignedUrlResponse", "code": 200,
            "body": {"url": "https://upload.test/a", "headers": {}}}));
        peer.push(json!({"type": "message", "class": "UploadSuccessEvent", "code": 200,
            "body": {"attachmentId": "att-1"}}));

        send.await.expect("join").expect("send should succeed");
        let frame = peer.next_sent().await.expect("message frame");
        assert_eq!(frame["message"]["text"], "see attached");
        assert_eq!(frame["message"]["content"][0]["attachment"]["id"], "att-1");
    }

    #[tokio::test]
    async fn transport_loss_after_ready_is_reported_to_the_next_turn() {
        let mut harness = harness();
        let peer = started(&mut harness).await;
        let mut state = harness.session.watch_state();

        peer.fail("connection reset by peer");
        state.wait_for(|state| *state == SessionState::Failed).await.expect("state channel");

        let failure = TransportError::Receive("connection reset by peer".to_owned());
        assert_eq!(harness.session.transport_failure(), Some(failure.clone()));
        let error = harness
            .session
            .send_user_turn(&UserMessage::text("still there?"))
            .await
            .expect_err("send should fail");
        assert_eq!(error, SessionError::Transport(failure));
    }

    #[tokio::test]
    async fn stop_closes_session() {
        let mut harness = harness();
        let mut peer = started(&mut harness).await;

        harness.session.stop().await;
        assert_eq!(harness.session.state(), SessionState::Closed);
        assert!(peer.next_sent().await.is_none());
    }
}
