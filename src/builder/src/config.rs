//! Mutable image configuration carried across commits.
//!
//! One [`ImageConfig`] lives for the duration of a build. Verbs mutate it;
//! every commit applies the current state to the image being produced.

use std::collections::{BTreeSet, HashMap};

use crate::cache;

/// Image configuration: entrypoint, command, user, working directory,
/// environment, and auxiliary maps.
///
/// `env` preserves insertion order on export; assigning an existing name
/// overwrites the value in its original slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// Empty means "inherit from base"; `root` is forced at the final commit.
    pub user: String,
    /// Empty means "inherit from base"; `/` is forced at the final commit.
    pub workdir: String,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub exposed_ports: BTreeSet<String>,
    pub volumes: BTreeSet<String>,
}

impl ImageConfig {
    /// Set the entrypoint. Mirrors engine semantics: changing the
    /// entrypoint clears any configured command.
    pub fn set_entrypoint(&mut self, argv: Vec<String>) {
        self.entrypoint = argv;
        self.cmd.clear();
    }

    /// Set the command. Leaves the entrypoint alone.
    pub fn set_cmd(&mut self, argv: Vec<String>) {
        self.cmd = argv;
    }

    /// Assign an environment variable, overwriting in place when the name
    /// already exists.
    pub fn set_env(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.env.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.env.push((key.to_string(), value.to_string()));
        }
    }

    /// Environment as `KEY=value` strings, in insertion order.
    pub fn env_strings(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// The configuration as committed to an image: an empty entrypoint
    /// alongside a non-empty command exports as `/bin/sh -c`, so the image
    /// stays runnable.
    pub fn committed(&self) -> ImageConfig {
        let mut config = self.clone();
        if config.entrypoint.is_empty() && !config.cmd.is_empty() {
            config.entrypoint = vec!["/bin/sh".to_string(), "-c".to_string()];
        }
        config
    }

    /// Apply the end-of-build defaults: an empty working directory becomes
    /// `/` and an empty user becomes `root`, instead of inheriting from the
    /// base image. Intermediate commits do not do this.
    pub fn apply_final_defaults(&mut self) {
        if self.workdir.is_empty() {
            self.workdir = "/".to_string();
        }
        if self.user.is_empty() {
            self.user = "root".to_string();
        }
    }

    /// Drop the cache bookkeeping labels, used when seeding from an
    /// intermediate image so stale labels do not leak into later commits.
    pub fn strip_cache_labels(&mut self) {
        self.labels.remove(cache::KEY_LABEL);
        self.labels.remove(cache::PARENT_LABEL);
    }

    /// Render the configuration as image-change instructions, the form the
    /// engine accepts when importing a root filesystem.
    pub fn import_changes(&self) -> Vec<String> {
        let config = self.committed();
        let mut changes = Vec::new();

        if !config.entrypoint.is_empty() {
            changes.push(format!(
                "ENTRYPOINT {}",
                serde_json::to_string(&config.entrypoint).unwrap_or_default()
            ));
        }
        if !config.cmd.is_empty() {
            changes.push(format!(
                "CMD {}",
                serde_json::to_string(&config.cmd).unwrap_or_default()
            ));
        }
        if !config.user.is_empty() {
            changes.push(format!("USER {}", config.user));
        }
        if !config.workdir.is_empty() {
            changes.push(format!("WORKDIR {}", config.workdir));
        }
        for (key, value) in &config.env {
            changes.push(format!("ENV {}={}", key, quote(value)));
        }
        let mut labels: Vec<_> = config.labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            changes.push(format!("LABEL {}={}", key, quote(value)));
        }
        for port in &config.exposed_ports {
            changes.push(format!("EXPOSE {}", port));
        }
        for volume in &config.volumes {
            changes.push(format!("VOLUME {}", volume));
        }

        changes
    }
}

/// Double-quote a value for a change instruction.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
