//! Shared helpers for builder tests: an in-memory engine seeded with a
//! `debian` base image, and quiet builders wired to it.

use std::sync::Arc;

use box_core::error::Result;
use box_core::options::BuildOptions;

use crate::config::ImageConfig;
use crate::dispatch::Builder;
use crate::engine::fake::FakeEngine;
use crate::engine::Engine;

pub(crate) fn fake() -> Arc<FakeEngine> {
    let engine = Arc::new(FakeEngine::new());
    engine.add_image("debian", ImageConfig::default());
    engine
}

pub(crate) fn options(cache: bool, omit: &[String]) -> BuildOptions {
    BuildOptions {
        cache,
        tty: false,
        quiet: true,
        omit: omit.to_vec(),
        context: std::env::current_dir().unwrap(),
    }
}

pub(crate) fn builder(engine: &Arc<FakeEngine>, cache: bool, omit: &[String]) -> Builder {
    let engine: Arc<dyn Engine> = engine.clone();
    Builder::with_engine(engine, &options(cache, omit))
}

/// Run `script` against a fresh engine with the cache off.
pub(crate) async fn build(script: &str) -> (Arc<FakeEngine>, Result<String>) {
    let engine = fake();
    let mut b = builder(&engine, false, &[]);
    let result = b.run(script).await;
    (engine, result)
}

/// Run `script` against `engine` with the cache on.
pub(crate) async fn build_cached(engine: &Arc<FakeEngine>, script: &str) -> Result<String> {
    let mut b = builder(engine, true, &[]);
    b.run(script).await
}
