// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{EngineError, Result};
use crate::listener::OutputListener;
use crate::manager::EngineManager;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay before an engine left without a client is torn down.
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the relay asks a transport to write to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Relay-side endpoint of one client connection. The transport task owns the
/// receiving half and turns frames into socket writes.
#[derive(Debug, Clone)]
pub struct ClientSession {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl ClientSession {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let session = Self {
            id: SessionId::next(),
            outbound,
        };
        (session, frames)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Hand `text` to the transport. Gives the text back if the transport is gone.
    pub fn deliver(&self, text: String) -> std::result::Result<(), String> {
        match self.outbound.send(Frame::Text(text)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(Frame::Text(text))) => Err(text),
            Err(mpsc::error::SendError(Frame::Close)) => Err(String::new()),
        }
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Frame::Close);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub teardown_grace: Duration,
    pub stop_engine_on_abandon: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
            stop_engine_on_abandon: true,
        }
    }
}

#[derive(Default)]
struct RelayState {
    bound: Option<ClientSession>,
    pending: VecDeque<String>,
    teardown: Option<CancellationToken>,
    subscribed: bool,
}

/// Binds at most one client session to the engine.
///
/// Engine output goes to the bound session, or into a pending buffer that is
/// replayed in order when the next session binds. When the bound session goes
/// away a teardown timer starts; a new session arriving before it fires
/// cancels it.
pub struct TransportRelay {
    engine: Arc<EngineManager>,
    config: RelayConfig,
    state: Mutex<RelayState>,
    self_ref: Weak<TransportRelay>,
}

impl TransportRelay {
    pub fn new(engine: Arc<EngineManager>, config: RelayConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            engine,
            config,
            state: Mutex::new(RelayState::default()),
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_session_opened(&self, session: ClientSession) {
        let mut state = self.lock();

        if let Some(timer) = state.teardown.take() {
            timer.cancel();
            info!("[relay] teardown cancelled, session {} reconnected", session.id());
        }

        if let Some(old) = state.bound.take()
            && old.id() != session.id()
        {
            info!("[relay] session {} replaced by {}", old.id(), session.id());
            old.close();
        }

        if !state.subscribed {
            if let Some(me) = self.self_ref.upgrade() {
                self.engine.subscribe(&me);
            }
            state.subscribed = true;
        }

        let backlog = std::mem::take(&mut state.pending);
        if !backlog.is_empty() {
            debug!(
                "[relay] replaying {} pending lines to session {}",
                backlog.len(),
                session.id()
            );
        }
        let mut backlog = backlog.into_iter();
        while let Some(line) = backlog.next() {
            if let Err(line) = session.deliver(line) {
                state.pending.push_back(line);
                state.pending.extend(backlog);
                break;
            }
        }

        info!("[relay] session {} bound", session.id());
        state.bound = Some(session);
    }

    /// Unbind `id` if it is the bound session and arm the teardown timer.
    /// Closes of sessions that were already replaced are ignored.
    pub fn on_session_closed(&self, id: SessionId, reason: &str) {
        let mut state = self.lock();
        if state.bound.as_ref().map(ClientSession::id) != Some(id) {
            debug!("[relay] ignoring close of stale session {id}");
            return;
        }
        state.bound = None;
        info!("[relay] session {id} closed ({reason})");

        if let Some(previous) = state.teardown.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        state.teardown = Some(token.clone());
        drop(state);

        if let Some(me) = self.self_ref.upgrade() {
            tokio::spawn(me.teardown_after_grace(token));
        }
    }

    async fn teardown_after_grace(self: Arc<Self>, token: CancellationToken) {
        let grace = self.config.teardown_grace;
        debug!("[relay] teardown armed ({}s)", grace.as_secs());
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(grace) => {}
        }

        {
            let mut state = self.lock();
            if token.is_cancelled() || state.bound.is_some() {
                return;
            }
            state.teardown = None;
        }

        if self.config.stop_engine_on_abandon {
            info!("[relay] no client for {}s, stopping engine", grace.as_secs());
            self.engine.stop_engine().await;
        } else {
            info!("[relay] no client for {}s, leaving engine running", grace.as_secs());
        }
    }

    /// Put lines a transport accepted but never wrote back at the front of the
    /// pending buffer, provided `id` has not been replaced in the meantime.
    pub fn requeue_undelivered(&self, id: SessionId, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.bound.as_ref().is_some_and(|s| s.id() != id) {
            return;
        }
        debug!("[relay] re-buffering {} undelivered lines", lines.len());
        for line in lines.into_iter().rev() {
            state.pending.push_front(line);
        }
    }

    /// Forward client text to the engine. Only the bound session may talk.
    pub fn on_client_text(&self, id: SessionId, text: &str) -> Result<()> {
        let bound = self.lock().bound.as_ref().map(ClientSession::id);
        if bound != Some(id) {
            return Err(EngineError::StaleSession(id));
        }
        self.engine.send_command(text)
    }

    pub fn on_engine_output(&self, line: &str) {
        // Empty text frames are dropped by some clients.
        let line = if line.is_empty() { " " } else { line };
        let mut state = self.lock();
        let undelivered = match state.bound.as_ref() {
            Some(session) => match session.deliver(line.to_string()) {
                Ok(()) => return,
                Err(line) => {
                    warn!("[relay] delivery to session {} failed, buffering", session.id());
                    line
                }
            },
            None => line.to_string(),
        };
        state.pending.push_back(undelivered);
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn bound_session(&self) -> Option<SessionId> {
        self.lock().bound.as_ref().map(ClientSession::id)
    }

    pub fn has_pending_teardown(&self) -> bool {
        self.lock().teardown.is_some()
    }

    pub fn engine(&self) -> &Arc<EngineManager> {
        &self.engine
    }
}

impl OutputListener for TransportRelay {
    fn on_engine_output(&self, line: &str) {
        TransportRelay::on_engine_output(self, line);
    }
}
