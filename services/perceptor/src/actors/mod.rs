//! Actor framework for the perceptor.
//!
//! The model has exactly one writer: [`ModelActor`], which owns it and
//! applies commands from its mailbox one at a time. Everything else talks to
//! the model through a [`crate::commands::ModelHandle`].
//!
//! ## Design Principles
//!
//! - **Single writer**: the model is moved into the actor and never shared
//! - **Serialized replies**: a command's reply is sent before the next
//!   command is taken, so reads observe a model between two commands
//! - **Graceful drain**: on shutdown the mailbox is closed and what is already
//!   queued is still applied

mod framework;
mod processor;

pub use framework::{
    spawn_actor, Actor, ActorContext, ActorError, ActorHandle, ActorState, Flow, Message,
};
pub use processor::{spawn_model_actor, ModelActor};
