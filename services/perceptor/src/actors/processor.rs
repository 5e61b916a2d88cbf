//! The command processor: the model's only writer.

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::framework::{spawn_actor, Actor, ActorContext, ActorError, Flow};
use crate::commands::{Command, ModelHandle};
use crate::model::Model;

/// Owns the model and applies commands to it in mailbox order.
pub struct ModelActor {
    model: Model,
}

impl ModelActor {
    pub fn new(model: Model) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Actor for ModelActor {
    type Message = Command;

    fn name(&self) -> &'static str {
        "model"
    }

    async fn handle(&mut self, msg: Command, _ctx: &ActorContext) -> Result<Flow, ActorError> {
        let kind = msg.kind();
        let started = Instant::now();
        msg.apply(&mut self.model, started);
        debug!(
            command = kind,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Applied command"
        );
        Ok(Flow::Continue)
    }

    async fn on_start(&mut self, ctx: &ActorContext) {
        let stats = self.model.scheduler_stats();
        info!(
            actor_id = %ctx.actor_id,
            concurrent_scan_limit = stats.concurrent_scan_limit,
            retry_limit = self.model.config().retry_limit,
            "Command processor started"
        );
    }

    async fn on_stop(&mut self, ctx: &ActorContext) {
        info!(
            actor_id = %ctx.actor_id,
            commands = ctx.messages_processed,
            pods = self.model.pod_count(),
            images = self.model.image_count(),
            "Command processor stopped"
        );
    }
}

/// Move `model` into a new processor task and return a handle to it.
pub fn spawn_model_actor(
    model: Model,
    mailbox_size: usize,
    shutdown: watch::Receiver<bool>,
) -> (ModelHandle, JoinHandle<()>) {
    let (handle, task) = spawn_actor(ModelActor::new(model), mailbox_size, shutdown);
    (ModelHandle::new(handle), task)
}
