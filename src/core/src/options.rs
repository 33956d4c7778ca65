use std::path::PathBuf;

/// Options governing a build, fixed at builder construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Reuse cached layers. Defaults to on unless `NO_CACHE` is set to a
    /// non-empty value in the environment.
    pub cache: bool,

    /// Colorize build-step output.
    pub tty: bool,

    /// Suppress build-step output.
    pub quiet: bool,

    /// Verb and function names to leave unregistered.
    pub omit: Vec<String>,

    /// Host directory copy sources are resolved against.
    pub context: PathBuf,
}

impl BuildOptions {
    /// Build options from the process environment. `NO_CACHE` is read once
    /// here; later changes to the variable have no effect on the builder.
    pub fn from_env() -> Self {
        BuildOptions {
            cache: cache_enabled(std::env::var("NO_CACHE").ok().as_deref()),
            tty: console::user_attended(),
            quiet: false,
            omit: Vec::new(),
            context: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            cache: true,
            tty: false,
            quiet: false,
            omit: Vec::new(),
            context: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Caching is enabled unless the toggle is present and non-empty.
fn cache_enabled(no_cache: Option<&str>) -> bool {
    match no_cache {
        Some(value) => value.is_empty(),
        None => true,
    }
}
