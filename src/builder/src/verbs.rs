//! The verb library: every layer-producing statement a build script can
//! execute.
//!
//! Handlers receive the builder, the cache step (re-keyable), the evaluated
//! arguments, and the block when the verb takes one. Config-only verbs
//! mutate the executor's image config and let the envelope commit; verbs
//! that settle their own layer state return [`Outcome::Done`].

use futures_util::future::BoxFuture;

use box_core::error::{BoxError, Result};

use crate::archive;
use crate::cache;
use crate::dispatch::{ArgSpec, Builder, Outcome, Step, VerbDef};
use crate::script::Stmt;
use crate::value::Value;

/// The verb jump table installed into every builder.
pub fn table() -> Vec<(&'static str, VerbDef)> {
    vec![
        ("from", def(ArgSpec::exactly(1), from_verb)),
        ("run", def(ArgSpec::exactly(1), run_verb)),
        ("copy", def(ArgSpec::exactly(2), copy_verb)),
        ("tag", def(ArgSpec::exactly(1), tag_verb)),
        ("flatten", def(ArgSpec::exactly(0), flatten_verb)),
        ("entrypoint", def(ArgSpec::at_least(1), entrypoint_verb)),
        ("cmd", def(ArgSpec::at_least(1), cmd_verb)),
        ("user", def(ArgSpec::exactly(1), user_verb)),
        ("with_user", def(ArgSpec::exactly(1).with_block(), with_user_verb)),
        ("workdir", def(ArgSpec::exactly(1), workdir_verb)),
        ("inside", def(ArgSpec::exactly(1).with_block(), inside_verb)),
        ("env", def(ArgSpec::exactly(1), env_verb)),
        ("set_exec", def(ArgSpec::exactly(1), set_exec_verb)),
        ("debug", def(ArgSpec::exactly(0), debug_verb)),
    ]
}

fn def(spec: ArgSpec, run: crate::dispatch::VerbFn) -> VerbDef {
    VerbDef { spec, run }
}

// --- verb handlers ---

/// `from "image"` — pull the base if absent, seed the config from its
/// image config, and start the cache chain.
fn from_verb<'a>(
    b: &'a mut Builder,
    step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let reference = want_str("from", args, 0)?;
        let engine = b.exec.engine();

        let details = match engine.inspect_image(reference).await? {
            Some(details) => details,
            None => {
                b.log().message(&format!("pulling {reference}"));
                engine.pull_image(reference).await?;
                engine
                    .inspect_image(reference)
                    .await?
                    .ok_or_else(|| BoxError::Engine(format!("{reference} missing after pull")))?
            }
        };
        b.exec.set_base(details).await?;

        // the envelope's cache probe ran before a base existed; probe again
        // now that the chain has a root
        if b.exec.check_cache(&step.key).await? {
            return Ok(Outcome::Done);
        }
        Ok(Outcome::Commit)
    })
}

/// `run "command"` — `/bin/sh -c` at the configured user and workdir.
fn run_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let command = want_str("run", args, 0)?;
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];
        b.exec.run_command(&argv).await?;
        Ok(Outcome::Commit)
    })
}

/// `copy "src", "dest"` — tar-stream a host path into the container. The
/// step re-keys on the stream content, so edits to copied files invalidate
/// the cached layer even though the arguments are unchanged.
fn copy_verb<'a>(
    b: &'a mut Builder,
    step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let src = want_str("copy", args, 0)?;
        let dest = want_str("copy", args, 1)?;

        let source = archive::safe_source(&b.context, src)?;
        let resolved = b.exec.resolve_dest(dest)?;
        let into_dir = dest.ends_with('/') || dest == "." || dest.ends_with("/.");
        let stream = archive::archive_for_upload(&source, &resolved, into_dir)?;

        step.key = cache::content_key(&stream);
        if b.exec.check_cache(&step.key).await? {
            return Ok(Outcome::Done);
        }
        b.exec.copy_to_container(stream).await?;
        Ok(Outcome::Commit)
    })
}

/// `tag "name[:tag]"` — tag the last image. No layer is produced.
fn tag_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let name = want_str("tag", args, 0)?;
        b.exec.tag(name).await?;
        Ok(Outcome::Done)
    })
}

/// `flatten` — collapse everything committed so far into one layer.
fn flatten_verb<'a>(
    b: &'a mut Builder,
    step: &'a mut Step,
    _args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        b.exec.flatten(Some(&step.key)).await?;
        Ok(Outcome::Done)
    })
}

fn entrypoint_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let argv = argv_of("entrypoint", args)?;
        b.exec.config().set_entrypoint(argv);
        Ok(Outcome::Commit)
    })
}

fn cmd_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let argv = argv_of("cmd", args)?;
        b.exec.config().set_cmd(argv);
        Ok(Outcome::Commit)
    })
}

fn user_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let name = want_str("user", args, 0)?;
        b.exec.config().user = name.to_string();
        Ok(Outcome::Commit)
    })
}

/// `with_user "name" do ... end` — the block runs as `name`, then the
/// previous user is restored. Nesting restores in reverse order.
fn with_user_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let name = want_str("with_user", args, 0)?;
        let block = block.ok_or_else(|| BoxError::argument("with_user", "requires a block"))?;

        let saved = b.exec.config().user.clone();
        b.exec.config().user = name.to_string();
        let result = b.eval_block(block).await;
        b.exec.config().user = saved;
        result?;
        Ok(Outcome::Commit)
    })
}

fn workdir_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let path = want_str("workdir", args, 0)?;
        b.exec.config().workdir = path.to_string();
        Ok(Outcome::Commit)
    })
}

/// `inside "/path" do ... end` — the block runs with the working directory
/// set to `path`, then the previous value is restored.
fn inside_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let path = want_str("inside", args, 0)?;
        let block = block.ok_or_else(|| BoxError::argument("inside", "requires a block"))?;

        let saved = b.exec.config().workdir.clone();
        b.exec.config().workdir = path.to_string();
        let result = b.eval_block(block).await;
        b.exec.config().workdir = saved;
        result?;
        Ok(Outcome::Commit)
    })
}

/// `env KEY: "value", ...` — merge variables into the config, overwriting
/// same-name entries.
fn env_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let Value::Map(pairs) = &args[0] else {
            return Err(BoxError::argument("env", "expects key/value pairs"));
        };
        for (key, value) in pairs {
            let value = value
                .as_str()
                .ok_or_else(|| BoxError::argument("env", format!("{key} must be a string")))?;
            b.exec.config().set_env(key, value);
        }
        Ok(Outcome::Commit)
    })
}

/// `set_exec cmd: [...]` or `set_exec entrypoint: [...]` — exactly one of
/// the two keys, value an array of strings.
fn set_exec_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let Value::Map(pairs) = &args[0] else {
            return Err(BoxError::argument(
                "set_exec",
                "expects cmd: [...] or entrypoint: [...]",
            ));
        };
        if pairs.len() != 1 {
            return Err(BoxError::argument(
                "set_exec",
                "expects exactly one of cmd or entrypoint",
            ));
        }

        let (key, value) = &pairs[0];
        let argv = value.as_string_list().ok_or_else(|| {
            BoxError::argument("set_exec", format!("{key} must be an array of strings"))
        })?;
        match key.as_str() {
            "cmd" => b.exec.config().set_cmd(argv),
            "entrypoint" => b.exec.config().set_entrypoint(argv),
            other => {
                return Err(BoxError::argument(
                    "set_exec",
                    format!("unknown key {other:?}"),
                ))
            }
        }
        Ok(Outcome::Commit)
    })
}

/// `debug` — drop into an interactive shell against the current container.
/// Never satisfied from the cache; shell changes are committed.
fn debug_verb<'a>(
    b: &'a mut Builder,
    _step: &'a mut Step,
    _args: &'a [Value],
    _block: Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        b.exec.shell().await?;
        Ok(Outcome::Commit)
    })
}

// --- argument helpers ---

fn want_str<'v>(name: &str, args: &'v [Value], index: usize) -> Result<&'v str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BoxError::argument(name, format!("argument {} must be a string", index + 1))
        })
}

/// Collect rest arguments into an argv: strings pass through, arrays of
/// strings flatten.
fn argv_of(name: &str, args: &[Value]) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    for value in args {
        match value {
            Value::Str(s) => argv.push(s.clone()),
            Value::List(_) => {
                let items = value.as_string_list().ok_or_else(|| {
                    BoxError::argument(name, "array arguments must contain strings")
                })?;
                argv.extend(items);
            }
            _ => return Err(BoxError::argument(name, "arguments must be strings")),
        }
    }
    Ok(argv)
}
