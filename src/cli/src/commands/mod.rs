//! Command definitions and dispatch.

pub mod build;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "box",
    about = "Build container images from build scripts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build an image from a build script
    Build(build::BuildArgs),
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build(args) => build::execute(args).await,
    }
}
