//! Typed client surface over the container engine.
//!
//! The builder talks to the engine exclusively through the [`Engine`] trait;
//! [`docker::DockerEngine`] implements it against a Docker-compatible
//! daemon, and tests substitute an in-memory engine.

pub mod docker;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;

use async_trait::async_trait;

use box_core::error::Result;

use crate::config::ImageConfig;

/// An image as the engine reports it.
#[derive(Debug, Clone)]
pub struct ImageDetails {
    pub id: String,
    pub config: ImageConfig,
}

/// Creation parameters for an intermediate container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// Always sent as an explicit override: an empty entrypoint keeps the
    /// base image's entrypoint from wrapping `cmd`.
    pub entrypoint: Vec<String>,
    pub user: String,
    pub workdir: String,
    /// `KEY=value` strings
    pub env: Vec<String>,
    /// Allocate a terminal and keep stdin open (interactive debug shells)
    pub interactive: bool,
}

/// Container engine operations the builder needs. One method per daemon
/// call; no builder policy lives here.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Pull `reference` from its registry.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Inspect an image; `None` when the engine does not know it.
    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>>;

    /// List images labeled `label=value` as `(id, labels)` pairs.
    async fn images_by_label(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>>;

    /// Tag `image` as `repo:tag`.
    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()>;

    /// Import a root filesystem tar as a fresh single-layer image, applying
    /// `changes` (image-change instructions) to its config. Returns the new
    /// image id.
    async fn import_image(&self, rootfs: Vec<u8>, changes: Vec<String>) -> Result<String>;

    /// Create a container; returns its id. The container is not started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Block until the container exits; returns its exit status.
    async fn wait_container(&self, id: &str) -> Result<i64>;

    /// Stream container output to the build log until it closes; returns a
    /// tail of stderr for error reporting.
    async fn follow_output(&self, id: &str, quiet: bool) -> Result<String>;

    /// Force-remove a container. Removing one that is already gone is not
    /// an error.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Extract a tar stream into the container at `path`.
    async fn upload_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()>;

    /// Fetch `path` from the container as a tar stream.
    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    /// Commit the container with `config` applied wholesale; returns the
    /// new image id.
    async fn commit_container(&self, id: &str, config: &ImageConfig) -> Result<String>;

    /// Export the container filesystem as a tar stream.
    async fn export_container(&self, id: &str) -> Result<Vec<u8>>;

    /// Attach the current terminal to the container, start it, and pump
    /// stdio until it exits.
    async fn run_shell(&self, id: &str) -> Result<()>;
}
