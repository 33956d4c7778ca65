//! Engine client for Docker-compatible daemons, backed by bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, DownloadFromContainerOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CommitContainerOptions, CreateImageOptions, ListImagesOptions, TagImageOptions};
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};

use box_core::error::{BoxError, Result};

use crate::config::ImageConfig;

use super::{ContainerSpec, Engine, ImageDetails};

/// Maximum stderr kept for error reporting.
const STDERR_TAIL: usize = 4096;

/// Client for a Docker-compatible daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the environment's daemon settings (`DOCKER_HOST` or
    /// the default socket).
    pub fn connect() -> Result<Self> {
        Ok(DockerEngine {
            docker: Docker::connect_with_local_defaults()?,
        })
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn pull_image(&self, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => {
                let id = inspect
                    .id
                    .ok_or_else(|| BoxError::Engine(format!("image {reference} has no id")))?;
                let config = inspect
                    .config
                    .as_ref()
                    .map(config_from_engine)
                    .unwrap_or_default();
                Ok(Some(ImageDetails { id, config }))
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn images_by_label(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{label}={value}")]);
        let options = ListImagesOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        Ok(images
            .into_iter()
            .map(|image| (image.id, image.labels))
            .collect())
    }

    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker.tag_image(image, Some(options)).await?;
        Ok(())
    }

    async fn import_image(&self, rootfs: Vec<u8>, changes: Vec<String>) -> Result<String> {
        let changes: Vec<&str> = changes.iter().map(|s| s.as_str()).collect();
        let options = CreateImageOptions {
            from_src: "-".to_string(),
            changes,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .create_image(Some(options), Some(rootfs.into()), None);

        let mut image_id = None;
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(status) = info.status {
                if let Some(idx) = status.find("sha256:") {
                    image_id = Some(status[idx..].trim().to_string());
                }
            }
        }
        image_id.ok_or_else(|| BoxError::Engine("import returned no image id".to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            entrypoint: Some(spec.entrypoint.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.workdir.clone()),
            env: Some(spec.env.clone()),
            tty: Some(spec.interactive),
            open_stdin: Some(spec.interactive),
            attach_stdin: Some(spec.interactive),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // the daemon reports non-zero exits through the error channel
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(BoxError::Engine(format!("wait on {id} returned no status"))),
        }
    }

    async fn follow_output(&self, id: &str, quiet: bool) -> Result<String> {
        use std::io::Write;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut stderr_tail: Vec<u8> = Vec::new();

        while let Some(output) = stream.next().await {
            match output? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    if !quiet {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(&message);
                        let _ = stdout.flush();
                    }
                }
                LogOutput::StdErr { message } => {
                    if !quiet {
                        eprint!("{}", String::from_utf8_lossy(&message));
                    }
                    stderr_tail.extend_from_slice(&message);
                    if stderr_tail.len() > STDERR_TAIL {
                        let cut = stderr_tail.len() - STDERR_TAIL;
                        stderr_tail.drain(..cut);
                    }
                }
                _ => {}
            }
        }
        Ok(String::from_utf8_lossy(&stderr_tail).into_owned())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let bytes = self
            .docker
            .download_from_container(id, Some(options))
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(bytes)
    }

    async fn commit_container(&self, id: &str, config: &ImageConfig) -> Result<String> {
        let options = CommitContainerOptions::<String> {
            container: id.to_string(),
            pause: true,
            ..Default::default()
        };
        let commit = self
            .docker
            .commit_container(options, commit_config(config))
            .await?;
        commit
            .id
            .ok_or_else(|| BoxError::Engine("commit returned no image id".to_string()))
    }

    async fn export_container(&self, id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .docker
            .export_container(id)
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(bytes)
    }

    async fn run_shell(&self, id: &str) -> Result<()> {
        use std::io::Write;

        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let results = self.docker.attach_container(id, Some(options)).await?;
        let mut output = results.output;
        let mut input = results.input;

        self.start_container(id).await?;

        let stdin_task = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let _ = tokio::io::copy(&mut stdin, &mut input).await;
        });

        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(log) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(&log.into_bytes());
                    let _ = stdout.flush();
                }
                Err(_) => break,
            }
        }
        stdin_task.abort();

        self.wait_container(id).await?;
        Ok(())
    }
}

/// Container config for a commit: the builder's config is applied
/// wholesale, so inherited entrypoint/cmd never leak through a commit.
fn commit_config(config: &ImageConfig) -> Config<String> {
    let empty_object_map = |keys: &std::collections::BTreeSet<String>| {
        if keys.is_empty() {
            None
        } else {
            Some(
                keys.iter()
                    .map(|key| (key.clone(), HashMap::new()))
                    .collect::<HashMap<_, _>>(),
            )
        }
    };

    Config {
        entrypoint: Some(config.entrypoint.clone()),
        cmd: Some(config.cmd.clone()),
        user: Some(config.user.clone()),
        working_dir: Some(config.workdir.clone()),
        env: Some(config.env_strings()),
        labels: Some(config.labels.clone()),
        exposed_ports: empty_object_map(&config.exposed_ports),
        volumes: empty_object_map(&config.volumes),
        ..Default::default()
    }
}

/// Seed an [`ImageConfig`] from an inspected engine config.
fn config_from_engine(config: &bollard::models::ContainerConfig) -> ImageConfig {
    let env = config
        .env
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();

    ImageConfig {
        entrypoint: config.entrypoint.clone().unwrap_or_default(),
        cmd: config.cmd.clone().unwrap_or_default(),
        user: config.user.clone().unwrap_or_default(),
        workdir: config.working_dir.clone().unwrap_or_default(),
        env,
        labels: config.labels.clone().unwrap_or_default(),
        exposed_ports: config
            .exposed_ports
            .as_ref()
            .map(|ports| ports.keys().cloned().collect())
            .unwrap_or_default(),
        volumes: config
            .volumes
            .as_ref()
            .map(|volumes| volumes.keys().cloned().collect())
            .unwrap_or_default(),
    }
}
