//! Bridge to the chat transport. The transport connects over TCP and speaks
//! newline-delimited JSON: it pushes `update` frames and answers our `send`,
//! `edit` and `get_member` requests by echoing their `req` id.
//!
//! Only the newest connection is used for outbound requests; an older one
//! keeps delivering updates until it closes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::auth::{AuthError, MemberStatus, MembershipLookup};
use crate::chat::{ChatError, ChatPort, Update};
use crate::dispatch::{Dispatcher, UpdateHandler};
use crate::limits::MAX_FRAME_LEN;
use crate::model::{ChatId, MessageId, UserId};
use crate::view::Reply;

const OUTBOX_CAPACITY: usize = 256;

/// Frames the transport sends us.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Update { update: Update },
    Sent { req: Ulid, message_id: MessageId },
    Edited { req: Ulid },
    Member { req: Ulid, status: MemberStatus },
    Failed { req: Ulid, reason: String },
}

impl Inbound {
    fn req(&self) -> Option<Ulid> {
        match self {
            Inbound::Update { .. } => None,
            Inbound::Sent { req, .. }
            | Inbound::Edited { req }
            | Inbound::Member { req, .. }
            | Inbound::Failed { req, .. } => Some(*req),
        }
    }
}

/// Frames we send the transport.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Send {
        req: Ulid,
        chat_id: ChatId,
        reply: &'a Reply,
    },
    Edit {
        req: Ulid,
        chat_id: ChatId,
        message_id: MessageId,
        reply: &'a Reply,
    },
    GetMember {
        req: Ulid,
        chat_id: ChatId,
        user_id: UserId,
    },
}

fn encode(frame: &Outbound<'_>) -> Result<String, ChatError> {
    serde_json::to_string(frame).map_err(|e| ChatError::Rejected(e.to_string()))
}

fn unexpected(answer: Inbound) -> ChatError {
    match answer {
        Inbound::Failed { reason, .. } => ChatError::Rejected(reason),
        other => ChatError::Rejected(format!("unexpected answer {other:?}")),
    }
}

/// Drops the pending slot when the waiting request goes away, answered or not.
struct PendingSlot<'a> {
    pending: &'a DashMap<Ulid, oneshot::Sender<Inbound>>,
    req: Ulid,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.req);
    }
}

pub struct Gateway {
    outbox: RwLock<Option<mpsc::Sender<String>>>,
    pending: DashMap<Ulid, oneshot::Sender<Inbound>>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            outbox: RwLock::new(None),
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Routes outbound requests to `tx` from now on.
    pub async fn attach(&self, tx: mpsc::Sender<String>) {
        let previous = self.outbox.write().await.replace(tx);
        if previous.is_some() {
            tracing::info!("transport reconnected, replacing previous connection");
        }
    }

    /// Forgets `tx` unless a newer connection already replaced it.
    pub async fn detach(&self, tx: &mpsc::Sender<String>) {
        let mut outbox = self.outbox.write().await;
        if outbox.as_ref().is_some_and(|cur| cur.same_channel(tx)) {
            *outbox = None;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.outbox.read().await.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Hands an answer to whoever is waiting on its `req`.
    pub fn resolve(&self, answer: Inbound) {
        let Some(req) = answer.req() else {
            return;
        };
        match self.pending.remove(&req) {
            Some((_, tx)) => {
                let _ = tx.send(answer);
            }
            None => tracing::debug!("late or unknown answer for {req}"),
        }
    }

    async fn request(&self, req: Ulid, line: String) -> Result<Inbound, ChatError> {
        let outbox = self
            .outbox
            .read()
            .await
            .clone()
            .ok_or(ChatError::Disconnected)?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            req,
        };
        outbox
            .send(line)
            .await
            .map_err(|_| ChatError::Disconnected)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(ChatError::Disconnected),
            Err(_) => Err(ChatError::Timeout),
        }
    }
}

#[async_trait]
impl ChatPort for Gateway {
    async fn send(&self, chat_id: ChatId, reply: &Reply) -> Result<MessageId, ChatError> {
        let req = Ulid::new();
        let line = encode(&Outbound::Send {
            req,
            chat_id,
            reply,
        })?;
        match self.request(req, line).await? {
            Inbound::Sent { message_id, .. } => Ok(message_id),
            other => Err(unexpected(other)),
        }
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        reply: &Reply,
    ) -> Result<(), ChatError> {
        let req = Ulid::new();
        let line = encode(&Outbound::Edit {
            req,
            chat_id,
            message_id,
            reply,
        })?;
        match self.request(req, line).await? {
            Inbound::Edited { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl MembershipLookup for Gateway {
    async fn member_status(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<MemberStatus, AuthError> {
        let req = Ulid::new();
        let line = encode(&Outbound::GetMember {
            req,
            chat_id,
            user_id,
        })
        .map_err(|e| AuthError::Lookup(e.to_string()))?;
        match self.request(req, line).await {
            Ok(Inbound::Member { status, .. }) => Ok(status),
            Ok(other) => Err(AuthError::Lookup(unexpected(other).to_string())),
            Err(e) => Err(AuthError::Lookup(e.to_string())),
        }
    }
}

/// Serves one transport connection until it closes. Updates go to the
/// dispatcher; answers complete pending requests.
pub async fn process_connection<H: UpdateHandler>(
    socket: TcpStream,
    gateway: Arc<Gateway>,
    dispatcher: Arc<Dispatcher<H>>,
) -> io::Result<()> {
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let (mut sink, mut stream) = framed.split();

    let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    gateway.attach(tx.clone()).await;

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::warn!("transport write failed: {e}");
                break;
            }
        }
    });

    let result = loop {
        let line = match stream.next().await {
            None => break Ok(()),
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!("dropped frame longer than {MAX_FRAME_LEN} bytes");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Inbound>(&line) {
            Ok(Inbound::Update { update }) => dispatcher.dispatch(update),
            Ok(answer) => gateway.resolve(answer),
            Err(e) => tracing::warn!("malformed frame: {e}"),
        }
    };

    gateway.detach(&tx).await;
    writer.abort();
    result
}
