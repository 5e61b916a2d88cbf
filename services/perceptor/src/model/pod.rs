//! Pods and their containers.

use scanward_id::{ImageSha, PodKey};
use serde::Serialize;

use super::image::ImageSpec;

/// A container slot, referencing its image by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: ImageSha,
}

/// A pod as held by the model. The key never changes; the container list is
/// only ever replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    key: PodKey,
    containers: Vec<Container>,
}

impl Pod {
    pub fn key(&self) -> &PodKey {
        &self.key
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Digests referenced by this pod, in container order.
    pub fn image_shas(&self) -> impl Iterator<Item = &ImageSha> {
        self.containers.iter().map(|c| &c.image)
    }
}

/// A container as observed by an inventory producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub name: String,
    pub image: ImageSpec,
}

/// A pod as observed by an inventory producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub key: PodKey,
    pub containers: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// Split into the pod record and the image observations it carries.
    pub(crate) fn into_parts(self) -> (Pod, Vec<ImageSpec>) {
        let mut images = Vec::with_capacity(self.containers.len());
        let containers = self
            .containers
            .into_iter()
            .map(|c| {
                let container = Container {
                    name: c.name,
                    image: c.image.sha.clone(),
                };
                images.push(c.image);
                container
            })
            .collect();

        (
            Pod {
                key: self.key,
                containers,
            },
            images,
        )
    }
}
