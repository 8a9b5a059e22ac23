//! Session host
//!
//! The engine runs inside a session owned by the surrounding interpreter.
//! The session supplies the shared data store and the message request
//! capability; how messages are correlated to sessions is the host's concern.
//!
//! [`MailboxSession`] is a minimal in-memory host: messages are matched to
//! waiters by operation name only.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::engine::{CancelHandle, ExecutionContext};

/* ===================== Messages ===================== */

/// Descriptor of an operation a continuation can receive on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputOperation {
    pub name: String,
}

impl InputOperation {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: Uuid,
    pub operation: String,
    pub payload: JsonValue,
}

impl SessionMessage {
    pub fn new(operation: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            payload,
        }
    }
}

/// A wait that gave way to cancellation.
///
/// `unread` holds a message that had already arrived when the cancellation
/// won; the caller hands it back to the session.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("message wait interrupted")]
pub struct Interrupted {
    pub unread: Option<SessionMessage>,
}

/// A message that may not have arrived yet.
///
/// Holds the [`CancelHandle`] for the wait; the handle is released when the
/// pending message resolves or is dropped.
#[derive(Debug)]
pub struct PendingMessage {
    rx: oneshot::Receiver<SessionMessage>,
    handle: CancelHandle,
}

impl PendingMessage {
    /// A pending message and the sender that resolves it
    pub fn channel() -> (oneshot::Sender<SessionMessage>, PendingMessage) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            PendingMessage {
                rx,
                handle: CancelHandle::new(),
            },
        )
    }

    /// A pending message that is already resolved
    pub fn ready(message: SessionMessage) -> PendingMessage {
        let (tx, pending) = Self::channel();
        // The receiver is alive, send cannot fail
        let _ = tx.send(message);
        pending
    }

    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    /// Wait for the message. Cancellation wins over a message that arrives at
    /// the same time; such a message is returned in [`Interrupted::unread`].
    pub async fn wait(self) -> Result<SessionMessage, Interrupted> {
        let PendingMessage { mut rx, handle } = self;
        tokio::select! {
            biased;
            _ = handle.cancelled() => {
                // Closing first makes later sends fail back to the sender
                rx.close();
                Err(Interrupted {
                    unread: rx.try_recv().ok(),
                })
            }
            message = &mut rx => message.map_err(|_| Interrupted::default()),
        }
    }
}

/* ===================== Session data ===================== */

/// Session-wide variable store
#[derive(Debug, Default)]
pub struct SessionData {
    vars: RwLock<Map<String, JsonValue>>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.vars.read().get(key).cloned()
    }

    /// Set `key`, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.vars.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.vars.write().remove(key)
    }

    /// Append `value` to the array stored at `key`, creating it if needed
    pub fn push(&self, key: &str, value: JsonValue) {
        let mut vars = self.vars.write();
        let slot = vars
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        match slot {
            JsonValue::Array(items) => items.push(value),
            other => *other = JsonValue::Array(vec![other.take(), value]),
        }
    }

    pub fn snapshot(&self) -> JsonValue {
        JsonValue::Object(self.vars.read().clone())
    }
}

/* ===================== Session ===================== */

pub trait Session: Send + Sync {
    fn session_id(&self) -> &str;

    fn state(&self) -> &SessionData;

    /// Request the next message on `operation` for `ctx`
    fn request_message(&self, operation: &InputOperation, ctx: &ExecutionContext) -> PendingMessage;

    /// Request the next message on any of `operations`
    fn request_any_message(
        &self,
        operations: &[InputOperation],
        ctx: &ExecutionContext,
    ) -> PendingMessage;

    /// Take back a message that was handed to a wait which then gave way to
    /// cancellation. It goes ahead of anything queued on its operation.
    fn requeue_message(&self, message: SessionMessage);
}

type Waiter = Arc<Mutex<Option<oneshot::Sender<SessionMessage>>>>;

#[derive(Default)]
struct Mailbox {
    queued: HashMap<String, VecDeque<SessionMessage>>,
    waiters: HashMap<String, VecDeque<Waiter>>,
}

fn is_live(waiter: &Waiter) -> bool {
    waiter.lock().as_ref().is_some_and(|tx| !tx.is_closed())
}

impl Mailbox {
    fn take_queued(&mut self, operation: &str) -> Option<SessionMessage> {
        self.queued.get_mut(operation)?.pop_front()
    }

    /// Drop waiters that were served elsewhere or whose wait went away,
    /// along with operations left without waiters
    fn prune_waiters(&mut self) -> usize {
        let mut removed = 0;
        self.waiters.retain(|_, waiters| {
            let before = waiters.len();
            waiters.retain(is_live);
            removed += before - waiters.len();
            !waiters.is_empty()
        });
        removed
    }

    /// Hand `message` to the first live waiter on its operation. Gives the
    /// message back if nobody took it.
    fn hand_to_waiter(&mut self, mut message: SessionMessage) -> Result<(), SessionMessage> {
        let operation = message.operation.clone();
        let Some(waiters) = self.waiters.get_mut(&operation) else {
            return Err(message);
        };

        let unclaimed = loop {
            let Some(waiter) = waiters.pop_front() else {
                break Some(message);
            };
            // Multi-operation waiters appear under several operations;
            // an empty slot means it was served elsewhere
            let Some(tx) = waiter.lock().take() else {
                continue;
            };
            match tx.send(message) {
                Ok(()) => break None,
                // Receiver dropped (wait cancelled), try the next waiter
                Err(returned) => message = returned,
            }
        };

        if waiters.is_empty() {
            self.waiters.remove(&operation);
        }
        match unclaimed {
            None => Ok(()),
            Some(message) => Err(message),
        }
    }
}

pub struct MailboxSession {
    id: String,
    data: SessionData,
    mailbox: Mutex<Mailbox>,
}

impl MailboxSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: SessionData::new(),
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    /// Deliver a message to the first live waiter on its operation, or queue
    /// it. Returns true if a waiter took it.
    pub fn deliver(&self, message: SessionMessage) -> bool {
        let mut mailbox = self.mailbox.lock();
        match mailbox.hand_to_waiter(message) {
            Ok(()) => true,
            Err(message) => {
                debug!(session = %self.id, operation = %message.operation, "Queueing message");
                mailbox
                    .queued
                    .entry(message.operation.clone())
                    .or_default()
                    .push_back(message);
                false
            }
        }
    }

    /// Messages queued on `operation` with nobody waiting
    pub fn queued(&self, operation: &str) -> usize {
        self.mailbox
            .lock()
            .queued
            .get(operation)
            .map_or(0, VecDeque::len)
    }

    /// Waiter entries held across all operations
    pub fn waiters(&self) -> usize {
        self.mailbox.lock().waiters.values().map(VecDeque::len).sum()
    }
}

impl Default for MailboxSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for MailboxSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> &SessionData {
        &self.data
    }

    fn request_message(&self, operation: &InputOperation, ctx: &ExecutionContext) -> PendingMessage {
        self.request_any_message(std::slice::from_ref(operation), ctx)
    }

    fn request_any_message(
        &self,
        operations: &[InputOperation],
        ctx: &ExecutionContext,
    ) -> PendingMessage {
        let mut mailbox = self.mailbox.lock();
        let pruned = mailbox.prune_waiters();
        if pruned > 0 {
            debug!(session = %self.id, pruned, "Pruned dead waiters");
        }

        for op in operations {
            if let Some(message) = mailbox.take_queued(&op.name) {
                return PendingMessage::ready(message);
            }
        }

        let (tx, pending) = PendingMessage::channel();
        let waiter: Waiter = Arc::new(Mutex::new(Some(tx)));
        for op in operations {
            debug!(session = %self.id, context = %ctx.id(), operation = %op.name, "Waiting for message");
            mailbox
                .waiters
                .entry(op.name.clone())
                .or_default()
                .push_back(Arc::clone(&waiter));
        }
        pending
    }

    fn requeue_message(&self, message: SessionMessage) {
        let mut mailbox = self.mailbox.lock();
        if let Err(message) = mailbox.hand_to_waiter(message) {
            debug!(session = %self.id, operation = %message.operation, "Requeueing message");
            mailbox
                .queued
                .entry(message.operation.clone())
                .or_default()
                .push_front(message);
        }
    }
}
