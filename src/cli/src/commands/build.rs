//! `box build` — execute a build script and print the resulting image id.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use box_builder::Builder;
use box_core::options::BuildOptions;

#[derive(Args)]
pub struct BuildArgs {
    /// Path to the build script
    #[arg(default_value = "Boxfile")]
    pub script: PathBuf,

    /// Name (and optionally tag) for the final image
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Disable the layer cache for this run
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Leave a verb or function unregistered (repeatable)
    #[arg(long = "omit", value_name = "NAME")]
    pub omit: Vec<String>,

    /// Only print the final image id
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;

    let mut options = BuildOptions::from_env();
    if args.no_cache {
        options.cache = false;
    }
    options.quiet = args.quiet;
    options.omit = args.omit.clone();

    let mut builder = Builder::new(&options)?;
    let image_id = builder.run(&source).await?;

    if let Some(tag) = &args.tag {
        builder.tag(tag).await?;
    }

    if args.quiet {
        println!("{image_id}");
    } else {
        println!("finished image: {image_id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Cli;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Cli {
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_build_defaults() {
        let cli = parse(&["box", "build"]);
        let crate::commands::Command::Build(args) = cli.command;
        assert_eq!(args.script, PathBuf::from("Boxfile"));
        assert!(!args.no_cache);
        assert!(args.tag.is_none());
        assert!(args.omit.is_empty());
    }

    #[test]
    fn test_build_with_flags() {
        let cli = parse(&[
            "box", "build", "build.rb", "-t", "myimage:dev", "--no-cache", "--omit", "debug",
            "--omit", "flatten", "-q",
        ]);
        let crate::commands::Command::Build(args) = cli.command;
        assert_eq!(args.script, PathBuf::from("build.rb"));
        assert_eq!(args.tag.as_deref(), Some("myimage:dev"));
        assert!(args.no_cache);
        assert_eq!(args.omit, vec!["debug".to_string(), "flatten".to_string()]);
        assert!(args.quiet);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["box", "build", "--bogus"]).is_err());
    }
}
