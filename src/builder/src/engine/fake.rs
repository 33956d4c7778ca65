//! In-memory engine used by the builder tests: images with configs and
//! labels, containers, scripted exit codes, and canned file contents.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use box_core::error::{BoxError, Result};

use crate::config::ImageConfig;

use super::{ContainerSpec, Engine, ImageDetails};

#[derive(Debug, Clone)]
pub(crate) struct FakeImage {
    pub config: ImageConfig,
    pub layers: usize,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    image: String,
    spec: ContainerSpec,
}

#[derive(Default)]
struct State {
    next_id: u64,
    images: HashMap<String, FakeImage>,
    names: HashMap<String, String>,
    containers: HashMap<String, FakeContainer>,
    exit_codes: Vec<(String, i64)>,
    files: HashMap<String, Vec<u8>>,
    uploads: Vec<(String, Vec<u8>)>,
    specs: Vec<ContainerSpec>,
    events: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine::default()
    }

    /// Register an image under `name` with the given config and one layer.
    pub fn add_image(&self, name: &str, config: ImageConfig) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("img-{}", state.next_id);
        state.next_id += 1;
        state.images.insert(id.clone(), FakeImage { config, layers: 1 });
        state.names.insert(name.to_string(), id.clone());
        id
    }

    /// Make any command whose argv contains `pattern` exit with `code`.
    pub fn fail_command(&self, pattern: &str, code: i64) {
        let mut state = self.state.lock().unwrap();
        state.exit_codes.push((pattern.to_string(), code));
    }

    /// Provide file contents served by `download_archive`.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(path.to_string(), contents.to_vec());
    }

    pub fn image(&self, reference: &str) -> Option<FakeImage> {
        let state = self.state.lock().unwrap();
        let id = state
            .names
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.to_string());
        state.images.get(&id).cloned()
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().names.get(name).cloned()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, event_prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|event| event.starts_with(event_prefix))
            .count()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn container_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    fn fresh_id(state: &mut State, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, state.next_id);
        state.next_id += 1;
        id
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("pull {reference}"));
        if !state.names.contains_key(reference) {
            let id = Self::fresh_id(&mut state, "img");
            state.images.insert(
                id.clone(),
                FakeImage {
                    config: ImageConfig::default(),
                    layers: 1,
                },
            );
            state.names.insert(reference.to_string(), id);
        }
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>> {
        let state = self.state.lock().unwrap();
        let id = state
            .names
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.to_string());
        Ok(state.images.get(&id).map(|image| ImageDetails {
            id,
            config: image.config.clone(),
        }))
    }

    async fn images_by_label(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|(_, image)| image.config.labels.get(label).map(String::as_str) == Some(value))
            .map(|(id, image)| (id.clone(), image.config.labels.clone()))
            .collect())
    }

    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.images.contains_key(image) {
            return Err(BoxError::Engine(format!("no such image: {image}")));
        }
        state.events.push(format!("tag {image} {repo}:{tag}"));
        state.names.insert(format!("{repo}:{tag}"), image.to_string());
        Ok(())
    }

    async fn import_image(&self, _rootfs: Vec<u8>, changes: Vec<String>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let mut config = ImageConfig::default();
        apply_changes(&mut config, &changes)?;
        let id = Self::fresh_id(&mut state, "img");
        state.events.push(format!("import {id}"));
        state.images.insert(id.clone(), FakeImage { config, layers: 1 });
        Ok(id)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let image_id = state
            .names
            .get(&spec.image)
            .cloned()
            .unwrap_or_else(|| spec.image.clone());
        if !state.images.contains_key(&image_id) {
            return Err(BoxError::Engine(format!("no such image: {}", spec.image)));
        }
        let id = Self::fresh_id(&mut state, "ctr");
        state.events.push(format!("create {id}"));
        state.specs.push(spec.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: image_id,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(BoxError::Engine(format!("no such container: {id}")));
        }
        state.events.push(format!("start {id}"));
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| BoxError::Engine(format!("no such container: {id}")))?;
        let command = container.spec.cmd.join(" ");
        for (pattern, code) in &state.exit_codes {
            if command.contains(pattern) {
                return Ok(*code);
            }
        }
        Ok(0)
    }

    async fn follow_output(&self, _id: &str, _quiet: bool) -> Result<String> {
        Ok(String::new())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.containers.remove(id);
        state.events.push(format!("remove {id}"));
        Ok(())
    }

    async fn upload_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(BoxError::Engine(format!("no such container: {id}")));
        }
        state.events.push(format!("upload {id} {path}"));
        state.uploads.push((path.to_string(), archive));
        Ok(())
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(BoxError::Engine(format!("no such container: {id}")));
        }
        let contents = state
            .files
            .get(path)
            .ok_or_else(|| BoxError::Engine(format!("no such path: {path}")))?;

        let name = path.trim_start_matches('/').rsplit('/').next().unwrap_or("file");
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_slice())
            .map_err(|e| BoxError::Engine(e.to_string()))?;
        builder
            .into_inner()
            .map_err(|e| BoxError::Engine(e.to_string()))
    }

    async fn commit_container(&self, id: &str, config: &ImageConfig) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| BoxError::Engine(format!("no such container: {id}")))?;
        let layers = state
            .images
            .get(&container.image)
            .map(|image| image.layers)
            .unwrap_or(0);
        let image_id = Self::fresh_id(&mut state, "img");
        state.events.push(format!("commit {id} -> {image_id}"));
        state.images.insert(
            image_id.clone(),
            FakeImage {
                config: config.clone(),
                layers: layers + 1,
            },
        );
        Ok(image_id)
    }

    async fn export_container(&self, id: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(BoxError::Engine(format!("no such container: {id}")));
        }
        state.events.push(format!("export {id}"));
        Ok(b"fake-rootfs".to_vec())
    }

    async fn run_shell(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(BoxError::Engine(format!("no such container: {id}")));
        }
        state.events.push(format!("shell {id}"));
        Ok(())
    }
}

/// Parse image-change instructions into a config, the way the engine does
/// on import.
fn apply_changes(config: &mut ImageConfig, changes: &[String]) -> Result<()> {
    for change in changes {
        let (keyword, rest) = change
            .split_once(' ')
            .ok_or_else(|| BoxError::Engine(format!("bad change: {change}")))?;
        match keyword {
            "ENTRYPOINT" => {
                config.entrypoint = serde_json::from_str(rest)
                    .map_err(|e| BoxError::Engine(format!("bad change {change:?}: {e}")))?;
            }
            "CMD" => {
                config.cmd = serde_json::from_str(rest)
                    .map_err(|e| BoxError::Engine(format!("bad change {change:?}: {e}")))?;
            }
            "USER" => config.user = rest.to_string(),
            "WORKDIR" => config.workdir = rest.to_string(),
            "ENV" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| BoxError::Engine(format!("bad change: {change}")))?;
                config.set_env(key, &unquote(value));
            }
            "LABEL" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| BoxError::Engine(format!("bad change: {change}")))?;
                config.labels.insert(key.to_string(), unquote(value));
            }
            "EXPOSE" => {
                config.exposed_ports.insert(rest.to_string());
            }
            "VOLUME" => {
                config.volumes.insert(rest.to_string());
            }
            _ => return Err(BoxError::Engine(format!("unsupported change: {change}"))),
        }
    }
    Ok(())
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}
