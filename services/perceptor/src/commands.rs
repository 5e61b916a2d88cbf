//! Model commands and the typed handle used to submit them.
//!
//! Every mutation of the model and every model-dependent read is a
//! [`Command`] carrying its own one-shot reply channel. Commands are applied
//! one at a time by the model actor; the reply is sent before the next
//! command is taken from the mailbox.

use std::fmt::Debug;

use scanward_id::ImageSha;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::actors::{ActorError, ActorHandle};
use crate::aggregator::{self, ScanReport};
use crate::model::{
    ImageSpec, Model, ModelError, ModelSnapshot, PodSnapshot, ScanResults, ScanStatus, SweepReport,
};
use crate::scheduler::SchedulerStats;

/// Reply channel for commands that can be rejected.
pub type Reply<T> = oneshot::Sender<Result<T, ModelError>>;

#[derive(Debug)]
pub enum Command {
    ReplaceAllPods {
        pods: Vec<PodSnapshot>,
        reply: oneshot::Sender<()>,
    },
    ReplaceAllImages {
        images: Vec<ImageSpec>,
        reply: oneshot::Sender<()>,
    },
    AddImage {
        image: ImageSpec,
        reply: oneshot::Sender<()>,
    },
    GetNextImageToScan {
        reply: oneshot::Sender<Option<ImageSpec>>,
    },
    ScanClientStarted {
        sha: ImageSha,
        reply: Reply<()>,
    },
    ScanDidFinish {
        sha: ImageSha,
        success: bool,
        error: Option<String>,
        reply: Reply<ScanStatus>,
    },
    HubScanFailed {
        sha: ImageSha,
        message: String,
        reply: Reply<ScanStatus>,
    },
    SetScanResults {
        sha: ImageSha,
        results: ScanResults,
        reply: Reply<bool>,
    },
    GetScanResults {
        reply: oneshot::Sender<ScanReport>,
    },
    ImagesInAnalysis {
        reply: oneshot::Sender<Vec<ImageSha>>,
    },
    SweepTimedOutLeases {
        reply: oneshot::Sender<SweepReport>,
    },
    CollectGarbage {
        reply: oneshot::Sender<Vec<ImageSha>>,
    },
    ResetImage {
        sha: ImageSha,
        reply: Reply<()>,
    },
    GetModelSnapshot {
        reply: oneshot::Sender<ModelSnapshot>,
    },
    GetSchedulerStats {
        reply: oneshot::Sender<SchedulerStats>,
    },
    SetConcurrentScanLimit {
        limit: usize,
        reply: oneshot::Sender<SchedulerStats>,
    },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ReplaceAllPods { .. } => "replace_all_pods",
            Command::ReplaceAllImages { .. } => "replace_all_images",
            Command::AddImage { .. } => "add_image",
            Command::GetNextImageToScan { .. } => "get_next_image_to_scan",
            Command::ScanClientStarted { .. } => "scan_client_started",
            Command::ScanDidFinish { .. } => "scan_did_finish",
            Command::HubScanFailed { .. } => "hub_scan_failed",
            Command::SetScanResults { .. } => "set_scan_results",
            Command::GetScanResults { .. } => "get_scan_results",
            Command::ImagesInAnalysis { .. } => "images_in_analysis",
            Command::SweepTimedOutLeases { .. } => "sweep_timed_out_leases",
            Command::CollectGarbage { .. } => "collect_garbage",
            Command::ResetImage { .. } => "reset_image",
            Command::GetModelSnapshot { .. } => "get_model_snapshot",
            Command::GetSchedulerStats { .. } => "get_scheduler_stats",
            Command::SetConcurrentScanLimit { .. } => "set_concurrent_scan_limit",
        }
    }

    /// Apply to the model and answer on the reply channel.
    pub fn apply(self, model: &mut Model, now: Instant) {
        let kind = self.kind();
        match self {
            Command::ReplaceAllPods { pods, reply } => {
                model.replace_all_pods(pods);
                respond(kind, reply, ());
            }
            Command::ReplaceAllImages { images, reply } => {
                model.replace_all_images(images);
                respond(kind, reply, ());
            }
            Command::AddImage { image, reply } => {
                model.add_image(image);
                respond(kind, reply, ());
            }
            Command::GetNextImageToScan { reply } => {
                respond(kind, reply, model.next_image_to_scan(now));
            }
            Command::ScanClientStarted { sha, reply } => {
                respond(kind, reply, model.scan_client_started(&sha, now));
            }
            Command::ScanDidFinish {
                sha,
                success,
                error,
                reply,
            } => {
                respond(kind, reply, model.scan_did_finish(&sha, success, error, now));
            }
            Command::HubScanFailed {
                sha,
                message,
                reply,
            } => {
                respond(kind, reply, model.hub_scan_failed(&sha, message, now));
            }
            Command::SetScanResults { sha, results, reply } => {
                respond(kind, reply, model.set_scan_results(&sha, results, now));
            }
            Command::GetScanResults { reply } => {
                respond(kind, reply, aggregator::scan_results(model));
            }
            Command::ImagesInAnalysis { reply } => {
                respond(kind, reply, model.images_in_analysis());
            }
            Command::SweepTimedOutLeases { reply } => {
                respond(kind, reply, model.sweep_timed_out_leases(now));
            }
            Command::CollectGarbage { reply } => {
                respond(kind, reply, model.collect_garbage());
            }
            Command::ResetImage { sha, reply } => {
                respond(kind, reply, model.reset_image(&sha, now));
            }
            Command::GetModelSnapshot { reply } => {
                respond(kind, reply, model.snapshot(now));
            }
            Command::GetSchedulerStats { reply } => {
                respond(kind, reply, model.scheduler_stats());
            }
            Command::SetConcurrentScanLimit { limit, reply } => {
                respond(kind, reply, model.set_concurrent_scan_limit(limit));
            }
        }
    }
}

fn respond<T>(kind: &'static str, reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!(command = kind, "Requester went away before the reply");
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Errors returned to command submitters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The command processor is not accepting or answering commands.
    #[error(transparent)]
    Actor(#[from] ActorError),

    /// The model rejected the command.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Typed front end to the model actor's mailbox.
#[derive(Clone)]
pub struct ModelHandle {
    actor: ActorHandle<Command>,
}

impl ModelHandle {
    pub fn new(actor: ActorHandle<Command>) -> Self {
        Self { actor }
    }

    /// True once the processor has stopped taking commands.
    pub fn is_closed(&self) -> bool {
        self.actor.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError>
    where
        T: Send + Debug + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.actor.send(command(tx)).await?;
        rx.await.map_err(|_| CommandError::Actor(ActorError::ActorStopped))
    }

    pub async fn replace_all_pods(&self, pods: Vec<PodSnapshot>) -> Result<(), CommandError> {
        self.request(|reply| Command::ReplaceAllPods { pods, reply }).await
    }

    pub async fn replace_all_images(&self, images: Vec<ImageSpec>) -> Result<(), CommandError> {
        self.request(|reply| Command::ReplaceAllImages { images, reply })
            .await
    }

    pub async fn add_image(&self, image: ImageSpec) -> Result<(), CommandError> {
        self.request(|reply| Command::AddImage { image, reply }).await
    }

    pub async fn next_image_to_scan(&self) -> Result<Option<ImageSpec>, CommandError> {
        self.request(|reply| Command::GetNextImageToScan { reply })
            .await
    }

    pub async fn scan_client_started(&self, sha: ImageSha) -> Result<(), CommandError> {
        Ok(self
            .request(|reply| Command::ScanClientStarted { sha, reply })
            .await??)
    }

    pub async fn scan_did_finish(
        &self,
        sha: ImageSha,
        success: bool,
        error: Option<String>,
    ) -> Result<ScanStatus, CommandError> {
        Ok(self
            .request(|reply| Command::ScanDidFinish {
                sha,
                success,
                error,
                reply,
            })
            .await??)
    }

    pub async fn hub_scan_failed(
        &self,
        sha: ImageSha,
        message: String,
    ) -> Result<ScanStatus, CommandError> {
        Ok(self
            .request(|reply| Command::HubScanFailed {
                sha,
                message,
                reply,
            })
            .await??)
    }

    pub async fn set_scan_results(
        &self,
        sha: ImageSha,
        results: ScanResults,
    ) -> Result<bool, CommandError> {
        Ok(self
            .request(|reply| Command::SetScanResults {
                sha,
                results,
                reply,
            })
            .await??)
    }

    pub async fn scan_results(&self) -> Result<ScanReport, CommandError> {
        self.request(|reply| Command::GetScanResults { reply }).await
    }

    pub async fn images_in_analysis(&self) -> Result<Vec<ImageSha>, CommandError> {
        self.request(|reply| Command::ImagesInAnalysis { reply }).await
    }

    pub async fn sweep_timed_out_leases(&self) -> Result<SweepReport, CommandError> {
        self.request(|reply| Command::SweepTimedOutLeases { reply })
            .await
    }

    pub async fn collect_garbage(&self) -> Result<Vec<ImageSha>, CommandError> {
        self.request(|reply| Command::CollectGarbage { reply }).await
    }

    pub async fn reset_image(&self, sha: ImageSha) -> Result<(), CommandError> {
        Ok(self
            .request(|reply| Command::ResetImage { sha, reply })
            .await??)
    }

    pub async fn snapshot(&self) -> Result<ModelSnapshot, CommandError> {
        self.request(|reply| Command::GetModelSnapshot { reply }).await
    }

    pub async fn scheduler_stats(&self) -> Result<SchedulerStats, CommandError> {
        self.request(|reply| Command::GetSchedulerStats { reply })
            .await
    }

    /// Change the concurrency limit; replies with the scheduler afterwards.
    pub async fn set_concurrent_scan_limit(
        &self,
        limit: usize,
    ) -> Result<SchedulerStats, CommandError> {
        self.request(|reply| Command::SetConcurrentScanLimit { limit, reply })
            .await
    }
}
