//! Mailbox actors.
//!
//! An actor owns its state outright and sees one message at a time. The
//! pieces:
//! - [`Actor`]: message handling plus start/stop hooks
//! - [`ActorHandle`]: cloneable sender side of the bounded mailbox
//! - [`spawn_actor`]: runs the actor on its own task until shutdown

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// What the loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Message;

    /// Prefix of the actor id used in logs.
    fn name(&self) -> &'static str;

    /// Handle one message. An error stops the actor.
    async fn handle(&mut self, msg: Self::Message, ctx: &ActorContext) -> Result<Flow, ActorError>;

    async fn on_start(&mut self, _ctx: &ActorContext) {}

    /// Runs once the mailbox is empty and closed.
    async fn on_stop(&mut self, _ctx: &ActorContext) {}
}

/// Bookkeeping the loop keeps for its actor.
#[derive(Debug)]
pub struct ActorContext {
    pub actor_id: String,
    pub messages_processed: u64,
    pub state: ActorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Running,
    /// Shutdown seen; the mailbox is closed and being emptied.
    Draining,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    #[error("mailbox full")]
    MailboxFull,

    #[error("actor stopped")]
    ActorStopped,

    /// The actor hit an error it cannot continue from.
    #[error("actor failed: {0}")]
    Failed(String),
}

/// Sender side of an actor's mailbox.
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Queue a message, waiting while the mailbox is full.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    /// Queue a message or fail immediately when the mailbox is full.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

static NEXT_ACTOR: AtomicU64 = AtomicU64::new(0);

/// Run `actor` on its own task behind a mailbox of `mailbox_size`.
///
/// The actor stops when `shutdown` turns `true`, when the last handle is
/// dropped, or when it returns [`Flow::Stop`] or an error. A shutdown closes
/// the mailbox first and still delivers every message already queued.
pub fn spawn_actor<A: Actor>(
    actor: A,
    mailbox_size: usize,
    shutdown: watch::Receiver<bool>,
) -> (ActorHandle<A::Message>, JoinHandle<()>) {
    let actor_id = format!(
        "{}_{}",
        actor.name(),
        NEXT_ACTOR.fetch_add(1, Ordering::Relaxed)
    );
    let (tx, rx) = mpsc::channel(mailbox_size.max(1));
    debug!(actor_id = %actor_id, mailbox_size, "Spawning actor");

    let ctx = ActorContext {
        actor_id: actor_id.clone(),
        messages_processed: 0,
        state: ActorState::Running,
    };
    let task = tokio::spawn(run(actor, rx, shutdown, ctx));
    (ActorHandle { tx, actor_id }, task)
}

async fn run<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    mut ctx: ActorContext,
) {
    actor.on_start(&ctx).await;

    while ctx.state == ActorState::Running {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(actor_id = %ctx.actor_id, "Shutdown requested, draining mailbox");
                    rx.close();
                    ctx.state = ActorState::Draining;
                }
            }

            msg = rx.recv() => match msg {
                Some(msg) => deliver(&mut actor, msg, &mut ctx).await,
                None => ctx.state = ActorState::Stopped,
            },
        }
    }

    while ctx.state == ActorState::Draining {
        match rx.recv().await {
            Some(msg) => deliver(&mut actor, msg, &mut ctx).await,
            None => ctx.state = ActorState::Stopped,
        }
    }

    actor.on_stop(&ctx).await;
    info!(
        actor_id = %ctx.actor_id,
        state = ?ctx.state,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );
}

async fn deliver<A: Actor>(actor: &mut A, msg: A::Message, ctx: &mut ActorContext) {
    ctx.messages_processed += 1;
    match actor.handle(msg, ctx).await {
        Ok(Flow::Continue) => {}
        Ok(Flow::Stop) => {
            debug!(actor_id = %ctx.actor_id, "Actor asked to stop");
            ctx.state = ActorState::Stopped;
        }
        Err(e) => {
            error!(actor_id = %ctx.actor_id, error = %e, "Actor failed");
            ctx.state = ActorState::Failed;
        }
    }
}
