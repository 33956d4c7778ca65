//! Intermediate-container lifecycle management.
//!
//! The executor owns the one live container a build mutates, the image
//! config applied at each commit, and the cache bookkeeping that lets a
//! step be satisfied from a previously committed layer. Exactly one
//! container exists between creation and teardown; every commit destroys it
//! and the next operation recreates it from the committed image, so each
//! verb starts from a clean base.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use box_core::error::{BoxError, Result};
use box_core::log::StepLogger;

use crate::archive;
use crate::cache;
use crate::config::ImageConfig;
use crate::engine::{ContainerSpec, Engine, ImageDetails};

pub struct Executor {
    engine: Arc<dyn Engine>,
    config: ImageConfig,
    image_id: Option<String>,
    container: Option<String>,
    use_cache: bool,
    logger: StepLogger,
}

impl Executor {
    pub fn new(engine: Arc<dyn Engine>, use_cache: bool, logger: StepLogger) -> Self {
        Executor {
            engine,
            config: ImageConfig::default(),
            image_id: None,
            container: None,
            use_cache,
            logger,
        }
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    /// The mutable image config applied at the next commit.
    pub fn config(&mut self) -> &mut ImageConfig {
        &mut self.config
    }

    /// Last committed (or cache-resolved) image id.
    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    pub fn set_use_cache(&mut self, use_cache: bool) {
        self.use_cache = use_cache;
    }

    pub fn logger(&self) -> &StepLogger {
        &self.logger
    }

    /// Rebase onto `details`: the container is destroyed and the config
    /// seeded from the image, minus any cache bookkeeping labels.
    pub async fn set_base(&mut self, details: ImageDetails) -> Result<()> {
        self.destroy().await?;
        let mut config = details.config;
        config.strip_cache_labels();
        self.config = config;
        self.image_id = Some(details.id);
        Ok(())
    }

    /// Create the intermediate container from the current base image if one
    /// does not already exist. Returns the container id.
    pub async fn create(&mut self) -> Result<String> {
        if let Some(id) = &self.container {
            return Ok(id.clone());
        }
        let image = self.require_image()?.to_string();
        let spec = ContainerSpec {
            image,
            // never started; only uploads, exports and commits touch it
            cmd: vec!["/bin/sh".to_string()],
            ..Default::default()
        };
        let id = self.engine.create_container(&spec).await?;
        self.container = Some(id.clone());
        Ok(id)
    }

    /// Force-remove the current container, if any.
    pub async fn destroy(&mut self) -> Result<()> {
        if let Some(id) = self.container.take() {
            self.engine.remove_container(&id).await?;
        }
        Ok(())
    }

    /// End-of-run cleanup; removal failures are logged, never surfaced.
    pub async fn teardown(&mut self) {
        if let Err(e) = self.destroy().await {
            tracing::debug!(error = %e, "container teardown failed");
        }
    }

    /// Run `argv` inside a transient container created from the current
    /// base, at the configured user and working directory. On success the
    /// transient container becomes the current one, so the next commit
    /// captures its filesystem.
    pub async fn run_command(&mut self, argv: &[String]) -> Result<()> {
        let image = self.require_image()?.to_string();
        let spec = ContainerSpec {
            image,
            cmd: argv.to_vec(),
            user: self.config.user.clone(),
            workdir: self.config.workdir.clone(),
            env: self.config.env_strings(),
            ..Default::default()
        };
        let id = self.engine.create_container(&spec).await?;
        self.engine.start_container(&id).await?;
        let stderr = self
            .engine
            .follow_output(&id, self.logger.quiet())
            .await
            .unwrap_or_default();
        let status = self.engine.wait_container(&id).await?;

        if status != 0 {
            self.engine.remove_container(&id).await?;
            return Err(BoxError::ExecFailure {
                code: status,
                stderr,
            });
        }

        self.destroy().await?;
        self.container = Some(id);
        Ok(())
    }

    /// Resolve a copy destination: relative paths join the configured
    /// working directory, and the result must stay inside the container
    /// root.
    pub fn resolve_dest(&self, dest: &str) -> Result<String> {
        let base = if self.config.workdir.is_empty() {
            "/"
        } else {
            self.config.workdir.as_str()
        };
        let joined = if dest.starts_with('/') {
            dest.to_string()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), dest)
        };
        let normalized =
            archive::normalize_abs(Path::new(&joined)).ok_or_else(|| BoxError::PathSafety {
                path: dest.to_string(),
            })?;
        Ok(normalized.to_string_lossy().into_owned())
    }

    /// Extract an upload stream into the container. The stream is rooted at
    /// its destination, so extraction happens at `/` and intermediate
    /// directories come into existence with it.
    pub async fn copy_to_container(&mut self, stream: Vec<u8>) -> Result<()> {
        let id = self.create().await?;
        self.engine.upload_archive(&id, "/", stream).await
    }

    /// Look for a previously committed layer for `key` on top of the
    /// current base. On a hit the executor silently rebases onto the cached
    /// image, as if the step had just committed.
    pub async fn check_cache(&mut self, key: &str) -> Result<bool> {
        if !self.use_cache {
            return Ok(false);
        }
        let Some(parent) = self.image_id.clone() else {
            return Ok(false);
        };

        let images = self.engine.images_by_label(cache::KEY_LABEL, key).await?;
        for (id, labels) in images {
            if labels.get(cache::PARENT_LABEL) != Some(&parent) {
                continue;
            }
            // a listed image can disappear before inspection; treat as miss
            let Some(details) = self.engine.inspect_image(&id).await? else {
                continue;
            };
            self.logger.cache_hit(&details.id);
            self.set_base(details).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Commit the container with the current config. With a key (and the
    /// cache on) the committed image is labeled so later runs can find it.
    /// The container is destroyed; the next operation starts from the new
    /// image.
    pub async fn commit(&mut self, key: Option<&str>) -> Result<String> {
        let id = self.create().await?;
        let mut config = self.config.committed();
        if let (Some(key), true) = (key, self.use_cache) {
            let parent = self.require_image()?.to_string();
            config
                .labels
                .insert(cache::KEY_LABEL.to_string(), key.to_string());
            config.labels.insert(cache::PARENT_LABEL.to_string(), parent);
        }

        let image_id = self.engine.commit_container(&id, &config).await?;
        self.destroy().await?;
        self.image_id = Some(image_id.clone());
        Ok(image_id)
    }

    /// Collapse the image into a single layer: export the container
    /// filesystem and re-import it, carrying the config (and cache labels)
    /// across as import changes.
    pub async fn flatten(&mut self, key: Option<&str>) -> Result<String> {
        let id = self.create().await?;
        let rootfs = self.engine.export_container(&id).await?;

        let mut changes = self.config.import_changes();
        if let (Some(key), true) = (key, self.use_cache) {
            let parent = self.require_image()?.to_string();
            changes.push(format!("LABEL {}=\"{}\"", cache::KEY_LABEL, key));
            changes.push(format!("LABEL {}=\"{}\"", cache::PARENT_LABEL, parent));
        }

        let image_id = self.engine.import_image(rootfs, changes).await?;
        self.destroy().await?;
        self.image_id = Some(image_id.clone());
        Ok(image_id)
    }

    /// Tag the last image as `name[:tag]`, defaulting the tag to `latest`.
    pub async fn tag(&mut self, name: &str) -> Result<()> {
        let image = self
            .image_id
            .clone()
            .ok_or_else(|| BoxError::Build("no image to tag".to_string()))?;
        let (repo, tag) = match name.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (name.to_string(), "latest".to_string()),
        };
        self.engine.tag_image(&image, &repo, &tag).await
    }

    /// Read a file out of the current container.
    pub async fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.create().await?;
        let bytes = self.engine.download_archive(&id, path).await?;

        let mut tar = tar::Archive::new(bytes.as_slice());
        for entry in tar.entries().map_err(|e| BoxError::Engine(e.to_string()))? {
            let mut entry = entry.map_err(|e| BoxError::Engine(e.to_string()))?;
            if entry.header().entry_type().is_file() {
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| BoxError::Engine(e.to_string()))?;
                return Ok(contents);
            }
        }
        Err(BoxError::Engine(format!(
            "{path}: archive contained no file"
        )))
    }

    /// Attach an interactive shell to a fresh container from the current
    /// base. The shell's container becomes the current one so its changes
    /// are captured by the following commit.
    pub async fn shell(&mut self) -> Result<()> {
        let image = self.require_image()?.to_string();
        let spec = ContainerSpec {
            image,
            cmd: vec!["/bin/sh".to_string()],
            user: self.config.user.clone(),
            workdir: self.config.workdir.clone(),
            env: self.config.env_strings(),
            interactive: true,
            ..Default::default()
        };
        let id = self.engine.create_container(&spec).await?;
        self.engine.run_shell(&id).await?;
        self.destroy().await?;
        self.container = Some(id);
        Ok(())
    }

    fn require_image(&self) -> Result<&str> {
        self.image_id
            .as_deref()
            .ok_or_else(|| BoxError::Build("no image base; scripts start with from".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;

    fn executor(use_cache: bool) -> (Arc<FakeEngine>, Executor) {
        let engine = Arc::new(FakeEngine::new());
        engine.add_image("debian", ImageConfig::default());
        let logger = StepLogger::new(false, true);
        let executor = Executor::new(engine.clone(), use_cache, logger);
        (engine, executor)
    }

    async fn based(use_cache: bool) -> (Arc<FakeEngine>, Executor) {
        let (engine, mut executor) = executor(use_cache);
        let details = engine.inspect_image("debian").await.unwrap().unwrap();
        executor.set_base(details).await.unwrap();
        (engine, executor)
    }

    #[tokio::test]
    async fn test_create_requires_base() {
        let (_engine, mut executor) = executor(false);
        assert!(executor.create().await.is_err());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (engine, mut executor) = based(false).await;
        let first = executor.create().await.unwrap();
        let second = executor.create().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.count("create"), 1);
    }

    #[tokio::test]
    async fn test_run_command_failure_cleans_up() {
        let (engine, mut executor) = based(false).await;
        engine.fail_command("false", 1);

        let err = executor
            .run_command(&["/bin/sh".to_string(), "-c".to_string(), "false".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BoxError::ExecFailure { code: 1, .. }));
        // the transient container was removed
        assert_eq!(engine.count("remove"), 1);
    }

    #[tokio::test]
    async fn test_run_command_adopts_container() {
        let (engine, mut executor) = based(false).await;
        executor
            .run_command(&["/bin/sh".to_string(), "-c".to_string(), "true".to_string()])
            .await
            .unwrap();
        let image_before = executor.image_id().unwrap().to_string();
        executor.commit(None).await.unwrap();
        assert_ne!(executor.image_id().unwrap(), image_before);
        assert_eq!(engine.count("commit"), 1);
    }

    #[tokio::test]
    async fn test_run_command_uses_config() {
        let (engine, mut executor) = based(false).await;
        executor.config().user = "nobody".to_string();
        executor.config().workdir = "/test".to_string();
        executor.config().set_env("A", "1");
        executor
            .run_command(&["/bin/sh".to_string(), "-c".to_string(), "true".to_string()])
            .await
            .unwrap();

        let spec = engine.container_specs().pop().unwrap();
        assert_eq!(spec.user, "nobody");
        assert_eq!(spec.workdir, "/test");
        assert_eq!(spec.env, vec!["A=1".to_string()]);
        assert!(spec.entrypoint.is_empty());
    }

    #[tokio::test]
    async fn test_commit_labels_cache_key() {
        let (engine, mut executor) = based(true).await;
        let parent = executor.image_id().unwrap().to_string();
        let id = executor.commit(Some("key1")).await.unwrap();

        let image = engine.image(&id).unwrap();
        assert_eq!(image.config.labels.get(cache::KEY_LABEL).unwrap(), "key1");
        assert_eq!(image.config.labels.get(cache::PARENT_LABEL).unwrap(), &parent);
    }

    #[tokio::test]
    async fn test_commit_without_cache_has_no_labels() {
        let (engine, mut executor) = based(false).await;
        let id = executor.commit(Some("key1")).await.unwrap();
        let image = engine.image(&id).unwrap();
        assert!(image.config.labels.is_empty());
    }

    #[tokio::test]
    async fn test_check_cache_hits_matching_parent() {
        let (engine, mut executor) = based(true).await;
        let committed = executor.commit(Some("key1")).await.unwrap();

        // a second build from the same base finds the layer
        let logger = StepLogger::new(false, true);
        let mut second = Executor::new(engine.clone(), true, logger);
        let details = engine.inspect_image("debian").await.unwrap().unwrap();
        second.set_base(details).await.unwrap();

        assert!(second.check_cache("key1").await.unwrap());
        assert_eq!(second.image_id().unwrap(), committed);
        // seeded config does not carry the bookkeeping labels forward
        assert!(second.config().labels.is_empty());
    }

    #[tokio::test]
    async fn test_check_cache_misses_other_parent() {
        let (engine, mut executor) = based(true).await;
        executor.commit(Some("key1")).await.unwrap();

        // base moved forward; the old layer no longer applies
        assert!(!executor.check_cache("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_cache_disabled() {
        let (_engine, mut executor) = based(false).await;
        assert!(!executor.check_cache("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_flatten_produces_single_layer() {
        let (engine, mut executor) = based(false).await;
        executor.commit(None).await.unwrap();
        executor.commit(None).await.unwrap();
        let layered = engine.image(executor.image_id().unwrap()).unwrap();
        assert!(layered.layers > 1);

        executor.config().set_cmd(vec!["hi".to_string()]);
        let flat_id = executor.flatten(None).await.unwrap();
        let flat = engine.image(&flat_id).unwrap();
        assert_eq!(flat.layers, 1);
        // config rides the import changes, shell rule included
        assert_eq!(flat.config.cmd, vec!["hi"]);
        assert_eq!(flat.config.entrypoint, vec!["/bin/sh", "-c"]);
    }

    #[tokio::test]
    async fn test_flatten_labels_cache_chain() {
        let (engine, mut executor) = based(true).await;
        let parent = executor.image_id().unwrap().to_string();
        let flat_id = executor.flatten(Some("fkey")).await.unwrap();
        let flat = engine.image(&flat_id).unwrap();
        assert_eq!(flat.config.labels.get(cache::KEY_LABEL).unwrap(), "fkey");
        assert_eq!(flat.config.labels.get(cache::PARENT_LABEL).unwrap(), &parent);
    }

    #[tokio::test]
    async fn test_tag_requires_image() {
        let (_engine, mut executor) = executor(false);
        assert!(executor.tag("test").await.is_err());
    }

    #[tokio::test]
    async fn test_tag_defaults_to_latest() {
        let (engine, mut executor) = based(false).await;
        executor.commit(None).await.unwrap();
        executor.tag("test").await.unwrap();
        assert_eq!(
            engine.resolve("test:latest").unwrap(),
            executor.image_id().unwrap()
        );
    }

    #[tokio::test]
    async fn test_tag_explicit_tag() {
        let (engine, mut executor) = based(false).await;
        executor.commit(None).await.unwrap();
        executor.tag("repo/name:v1").await.unwrap();
        assert!(engine.resolve("repo/name:v1").is_some());
    }

    #[tokio::test]
    async fn test_resolve_dest_relative_to_workdir() {
        let (_engine, mut executor) = based(false).await;
        executor.config().workdir = "/test".to_string();
        assert_eq!(executor.resolve_dest("sub/").unwrap(), "/test/sub");
        assert_eq!(executor.resolve_dest(".").unwrap(), "/test");
        assert_eq!(executor.resolve_dest("/abs").unwrap(), "/abs");
    }

    #[tokio::test]
    async fn test_resolve_dest_rejects_escape() {
        let (_engine, executor) = executor(false);
        assert!(matches!(
            executor.resolve_dest("../../etc").unwrap_err(),
            BoxError::PathSafety { .. }
        ));
    }

    #[tokio::test]
    async fn test_read_file_roundtrip() {
        let (engine, mut executor) = based(false).await;
        engine.add_file("/etc/passwd", b"root:x:0:0:root:/root:/bin/bash\n");
        let contents = executor.read_file("/etc/passwd").await.unwrap();
        assert!(contents.starts_with(b"root:x:0:0"));
    }

    #[tokio::test]
    async fn test_read_file_missing() {
        let (_engine, mut executor) = based(false).await;
        assert!(executor.read_file("/nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn test_teardown_destroys_container() {
        let (engine, mut executor) = based(false).await;
        executor.create().await.unwrap();
        executor.teardown().await;
        assert_eq!(engine.count("remove"), 1);
    }
}
