//! One room session: the context object that owns the store, the compose
//! state, the typing debounce and the connection, and processes inbound
//! frames, user commands and timers one at a time on a single task.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{MessageId, UserId},
    protocol::OutboundEvent,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    composer::{Composer, CompositionMode},
    config::ClientSettings,
    connection::{Connection, ConnectionEvent, ConnectionManager, ConnectionState, WsConnector},
    encoder::{encode, LocalAction},
    error::{ProtocolError, SessionError, StateError, TransportError, UploadError},
    router,
    store::{ConversationStore, LocalUser, Message},
    typing::{TypingDebounce, TypingSignal},
    upload::{HttpUploader, MissingUploader, Uploader},
    ClientEvent,
};

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 1024;
const DEFAULT_TYPING_QUIET: Duration = Duration::from_millis(1000);
const DEFAULT_TYPING_LINGER: Duration = Duration::from_millis(1000);

/// Hook run after every reconnect. There is no resync handshake on the wire
/// today; an implementation may return a raw frame asking the server to
/// replay everything after `last_seen`.
pub trait ResyncStrategy: Send + Sync {
    fn resync_frame(&self, last_seen: Option<&MessageId>) -> Option<String>;
}

pub struct NoResync;

impl ResyncStrategy for NoResync {
    fn resync_frame(&self, _last_seen: Option<&MessageId>) -> Option<String> {
        None
    }
}

/// Read-only copy of session state for the UI.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub store: ConversationStore,
    pub composition: CompositionMode,
    pub connection: ConnectionState,
}

enum SessionCommand {
    Send {
        text: String,
        file_url: Option<String>,
    },
    BeginReply {
        message_id: MessageId,
        reply: oneshot::Sender<Result<String, StateError>>,
    },
    BeginEdit {
        message_id: MessageId,
        reply: oneshot::Sender<Result<String, StateError>>,
    },
    CancelCompose,
    TypingInput,
    React {
        message_id: MessageId,
        emoji: String,
    },
    Delete {
        message_id: MessageId,
    },
    MarkRead {
        message_id: MessageId,
    },
    ShareFile {
        filename: String,
        bytes: Vec<u8>,
    },
    Lookup {
        message_id: MessageId,
        reply: oneshot::Sender<Option<Message>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

struct UploadOutcome {
    filename: String,
    result: Result<String, UploadError>,
}

enum Exit {
    Shutdown,
    Closed(String),
    Elapsed,
}

/// Cheap, cloneable front door to a running [`RoomSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.request(SessionCommand::Send {
            text: text.into(),
            file_url: None,
        })
        .await
    }

    pub async fn send_with_file(
        &self,
        text: impl Into<String>,
        file_url: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.request(SessionCommand::Send {
            text: text.into(),
            file_url: Some(file_url.into()),
        })
        .await
    }

    /// Returns a preview of the parent message for the input hint.
    pub async fn begin_reply(&self, message_id: MessageId) -> Result<String, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::BeginReply { message_id, reply })
            .await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Returns the current body to prefill the input with.
    pub async fn begin_edit(&self, message_id: MessageId) -> Result<String, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::BeginEdit { message_id, reply })
            .await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    pub async fn cancel_compose(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::CancelCompose).await
    }

    /// Call on every keystroke in the message input.
    pub async fn typing_input(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::TypingInput).await
    }

    pub async fn react(
        &self,
        message_id: MessageId,
        emoji: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.request(SessionCommand::React {
            message_id,
            emoji: emoji.into(),
        })
        .await
    }

    /// Callers confirm with the user before calling this.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), SessionError> {
        self.request(SessionCommand::Delete { message_id }).await
    }

    /// Acknowledges a message the UI has just rendered.
    pub async fn mark_read(&self, message_id: MessageId) -> Result<(), SessionError> {
        self.request(SessionCommand::MarkRead { message_id }).await
    }

    pub async fn share_file(
        &self,
        filename: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.request(SessionCommand::ShareFile {
            filename: filename.into(),
            bytes,
        })
        .await
    }

    /// One message by id, tombstones included. Cheaper than a snapshot.
    pub async fn message(&self, message_id: MessageId) -> Result<Option<Message>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Lookup { message_id, reply })
            .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Shutdown).await
    }

    async fn request(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

pub struct RoomSession {
    room: String,
    store: ConversationStore,
    composer: Composer,
    typing: TypingDebounce,
    connection: ConnectionManager,
    uploader: Arc<dyn Uploader>,
    resync: Box<dyn ResyncStrategy>,
    commands: mpsc::Receiver<SessionCommand>,
    uploads_tx: mpsc::UnboundedSender<UploadOutcome>,
    uploads_rx: mpsc::UnboundedReceiver<UploadOutcome>,
    events: broadcast::Sender<ClientEvent>,
    outbox: Option<mpsc::Sender<String>>,
    state: ConnectionState,
}

impl RoomSession {
    pub fn new(
        room: impl Into<String>,
        local: LocalUser,
        connection: ConnectionManager,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (uploads_tx, uploads_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let session = Self {
            room: room.into(),
            store: ConversationStore::new(local, DEFAULT_TYPING_LINGER),
            composer: Composer::new(),
            typing: TypingDebounce::new(DEFAULT_TYPING_QUIET),
            connection,
            uploader: Arc::new(MissingUploader),
            resync: Box::new(NoResync),
            commands,
            uploads_tx,
            uploads_rx,
            events: events.clone(),
            outbox: None,
            state: ConnectionState::Connecting,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            events,
        };
        (session, handle)
    }

    /// Session wired to the room websocket and the HTTP upload endpoint.
    pub fn from_settings(settings: &ClientSettings) -> Result<(Self, SessionHandle), SessionError> {
        let endpoint = settings.endpoint()?;
        let connection = ConnectionManager::new(
            endpoint,
            Arc::new(WsConnector),
            Box::new(settings.backoff()),
        )
        .with_connect_timeout(settings.connect_timeout())
        .with_stable_after(settings.reconnect_stable());
        let mut local = LocalUser::new(settings.username.clone());
        if let Some(user_id) = &settings.user_id {
            local = local.with_user_id(UserId::new(user_id.clone()));
        }
        let (session, handle) = Self::new(settings.room.clone(), local, connection);
        let session = session
            .with_typing_timing(settings.typing_quiet(), settings.typing_linger())
            .with_uploader(Arc::new(HttpUploader::new(
                &settings.server_url,
                &settings.upload_path,
            )));
        Ok((session, handle))
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_resync(mut self, resync: Box<dyn ResyncStrategy>) -> Self {
        self.resync = resync;
        self
    }

    /// Must be called before [`RoomSession::run`]; it rebuilds the empty store.
    pub fn with_typing_timing(mut self, quiet: Duration, linger: Duration) -> Self {
        self.typing = TypingDebounce::new(quiet);
        self.store = ConversationStore::new(self.store.local_user().clone(), linger);
        self
    }

    /// Runs until shut down or until the reconnect policy gives up.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(room = %self.room, endpoint = %self.connection.endpoint(), "starting room session");
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.connection.connect().await {
                Ok(Connection { outbound, inbound }) => {
                    let reconnect = self.connection.on_open();
                    self.on_open(outbound, reconnect).await;
                    let exit = self.drive(inbound).await;
                    self.outbox = None;
                    self.typing.reset();
                    match exit {
                        Exit::Shutdown => break,
                        Exit::Closed(reason) => {
                            warn!(room = %self.room, %reason, "room connection lost");
                            self.emit(ClientEvent::Error(
                                TransportError::Closed(reason).into(),
                            ));
                        }
                        Exit::Elapsed => {}
                    }
                }
                Err(err) => {
                    warn!(room = %self.room, error = %err, "room connection failed");
                }
            }

            let Some((attempt, delay)) = self.connection.on_failure() else {
                let attempts = self.connection.failures();
                error!(room = %self.room, attempts, "giving up on room connection");
                self.set_state(ConnectionState::Disconnected);
                return Err(SessionError::ReconnectExhausted { attempts });
            };
            info!(room = %self.room, attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            self.set_state(ConnectionState::Reconnecting {
                attempt,
                retry_in: delay,
            });
            if let Exit::Shutdown = self.wait(delay).await {
                break;
            }
        }

        info!(room = %self.room, "room session ended");
        Ok(())
    }

    async fn on_open(&mut self, outbound: mpsc::Sender<String>, reconnect: bool) {
        self.outbox = Some(outbound);
        self.typing.reset();
        self.set_state(ConnectionState::Open);
        if !reconnect {
            return;
        }

        if let Some(change) = self.store.clear_stale() {
            self.emit(ClientEvent::Store(change));
        }
        if let Some(frame) = self.resync.resync_frame(self.store.last_seen_id()) {
            if let Some(outbox) = &self.outbox {
                let _ = outbox.send(frame).await;
            }
        }
    }

    async fn drive(&mut self, mut inbound: mpsc::Receiver<ConnectionEvent>) -> Exit {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(ConnectionEvent::Message(raw)) => self.on_frame(&raw).await,
                    Some(ConnectionEvent::Closed(reason)) => return Exit::Closed(reason),
                    None => return Exit::Closed("transport dropped".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => return Exit::Shutdown,
                    Some(command) => self.handle_command(command).await,
                },
                Some(outcome) = self.uploads_rx.recv() => self.on_upload(outcome).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timers().await;
                }
            }
        }
    }

    /// Backoff pause. Commands are still served; sends fail as not connected.
    async fn wait(&mut self, delay: Duration) -> Exit {
        let resume_at = Instant::now() + delay;
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = tokio::time::sleep_until(resume_at) => return Exit::Elapsed,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => return Exit::Shutdown,
                    Some(command) => self.handle_command(command).await,
                },
                Some(outcome) = self.uploads_rx.recv() => self.on_upload(outcome).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timers().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send { text, file_url } => {
                let username = self.store.local_user().username.clone();
                let Some(event) = self.composer.draft(&text, file_url, &username) else {
                    debug!(room = %self.room, "suppressed empty send");
                    return;
                };
                // A dropped send keeps the reply or edit in progress.
                if self.transmit(event).await {
                    self.composer.reset();
                }
            }
            SessionCommand::BeginReply { message_id, reply } => {
                let _ = reply.send(self.composer.begin_reply(&self.store, &message_id));
            }
            SessionCommand::BeginEdit { message_id, reply } => {
                let _ = reply.send(self.composer.begin_edit(&self.store, &message_id));
            }
            SessionCommand::CancelCompose => {
                self.composer.cancel();
            }
            SessionCommand::TypingInput => {
                if self.outbox.is_none() {
                    debug!(room = %self.room, "ignoring typing input while disconnected");
                    return;
                }
                for signal in self.typing.on_input(Instant::now()) {
                    self.transmit_action(typing_action(signal)).await;
                }
            }
            SessionCommand::React { message_id, emoji } => {
                self.transmit_action(LocalAction::React { message_id, emoji })
                    .await;
            }
            SessionCommand::Delete { message_id } => {
                self.transmit_action(LocalAction::Delete { message_id })
                    .await;
            }
            SessionCommand::MarkRead { message_id } => {
                self.transmit_action(LocalAction::MarkRead { message_id })
                    .await;
            }
            SessionCommand::ShareFile { filename, bytes } => self.start_upload(filename, bytes),
            SessionCommand::Lookup { message_id, reply } => {
                let _ = reply.send(self.store.message(&message_id).cloned());
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    store: self.store.clone(),
                    composition: self.composer.mode().clone(),
                    connection: self.state.clone(),
                });
            }
            // Intercepted by the loops before dispatch.
            SessionCommand::Shutdown => {}
        }
    }

    async fn on_frame(&mut self, raw: &str) {
        let dispatch = router::route_frame(&mut self.store, raw, Instant::now());
        for change in dispatch.changes {
            self.emit(ClientEvent::Store(change));
        }
        for message_id in dispatch.read_receipts {
            self.transmit_action(LocalAction::MarkRead { message_id })
                .await;
        }
    }

    async fn on_timers(&mut self) {
        let now = Instant::now();
        if let Some(signal) = self.typing.poll(now) {
            self.transmit_action(typing_action(signal)).await;
        }
        for change in self.store.expire_typing(now) {
            self.emit(ClientEvent::Store(change));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.deadline(), self.store.next_typing_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn start_upload(&self, filename: String, bytes: Vec<u8>) {
        let uploader = Arc::clone(&self.uploader);
        let room = self.room.clone();
        let uploads_tx = self.uploads_tx.clone();
        debug!(room = %room, %filename, size = bytes.len(), "starting upload");
        tokio::spawn(async move {
            let result = uploader.upload(&room, &filename, bytes).await;
            let _ = uploads_tx.send(UploadOutcome { filename, result });
        });
    }

    async fn on_upload(&mut self, outcome: UploadOutcome) {
        match outcome.result {
            Ok(file_url) => {
                self.transmit_action(LocalAction::ShareFile {
                    filename: outcome.filename,
                    file_url,
                })
                .await;
            }
            Err(err) => {
                warn!(room = %self.room, filename = %outcome.filename, error = %err, "upload failed");
                self.emit(ClientEvent::UploadFailed {
                    filename: outcome.filename,
                    error: err,
                });
            }
        }
    }

    async fn transmit_action(&mut self, action: LocalAction) {
        let username = self.store.local_user().username.clone();
        if let Some(event) = encode(action, self.composer.mode(), &username) {
            self.transmit(event).await;
        }
    }

    /// Returns `true` once the frame has been handed to the writer.
    async fn transmit(&mut self, event: OutboundEvent) -> bool {
        let kind = event.kind();
        let Some(outbox) = &self.outbox else {
            let err = TransportError::NotConnected { kind };
            warn!(room = %self.room, error = %err, "dropping outbound event");
            self.emit(ClientEvent::Error(err.into()));
            return false;
        };

        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                let err = ProtocolError::Encode {
                    kind,
                    reason: err.to_string(),
                };
                self.emit(ClientEvent::Error(err.into()));
                return false;
            }
        };

        if outbox.send(frame).await.is_err() {
            let err = TransportError::NotConnected { kind };
            warn!(room = %self.room, error = %err, "writer is gone; dropping outbound event");
            self.emit(ClientEvent::Error(err.into()));
            return false;
        }
        debug!(room = %self.room, kind, "sent outbound event");
        true
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state.clone();
        self.emit(ClientEvent::Connection(state));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

fn typing_action(signal: TypingSignal) -> LocalAction {
    match signal {
        TypingSignal::Started => LocalAction::TypingStarted,
        TypingSignal::Stopped => LocalAction::TypingStopped,
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
