//! Verb dispatch: the caching envelope around each build step, and the
//! script evaluator that drives it.
//!
//! Verbs and functions are registered into jump tables at construction.
//! Each verb invocation runs through the envelope: arguments are coerced to
//! display strings, the step is fingerprinted, the cache consulted, and on
//! a miss the handler runs and the resulting container state is committed
//! under the step's key. Functions evaluate without any of that.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use box_core::error::{BoxError, Result};
use box_core::log::StepLogger;
use box_core::options::BuildOptions;

use crate::cache;
use crate::engine::docker::DockerEngine;
use crate::engine::Engine;
use crate::executor::Executor;
use crate::script::{Expr, Script, Segment, Stmt};
use crate::value::Value;
use crate::{funcs, verbs};

/// What the envelope does after a verb handler returns.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Commit the container under the step's cache key.
    Commit,
    /// The handler settled the layer state itself (tag, flatten, a cache
    /// hit resolved inside the handler).
    Done,
}

/// The cache step handed to a verb handler. Handlers may re-key the step
/// before the envelope commits; copy keys on the content of its stream.
pub struct Step {
    pub key: String,
}

pub type VerbFn = for<'a> fn(
    &'a mut Builder,
    &'a mut Step,
    &'a [Value],
    Option<&'a [Stmt]>,
) -> BoxFuture<'a, Result<Outcome>>;

pub type FuncFn = for<'a> fn(&'a mut Builder, &'a [Value]) -> BoxFuture<'a, Result<Value>>;

/// Arity and block requirements for a registered name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgSpec {
    pub required: usize,
    pub rest: bool,
    pub block: bool,
}

impl ArgSpec {
    pub const fn exactly(required: usize) -> Self {
        ArgSpec {
            required,
            rest: false,
            block: false,
        }
    }

    pub const fn at_least(required: usize) -> Self {
        ArgSpec {
            required,
            rest: true,
            block: false,
        }
    }

    pub const fn with_block(mut self) -> Self {
        self.block = true;
        self
    }

    fn check(&self, name: &str, argc: usize, has_block: bool) -> Result<()> {
        if self.rest {
            if argc < self.required {
                return Err(BoxError::argument(
                    name,
                    format!("expects at least {} argument(s), got {}", self.required, argc),
                ));
            }
        } else if argc != self.required {
            return Err(BoxError::argument(
                name,
                format!("expects {} argument(s), got {}", self.required, argc),
            ));
        }

        if self.block && !has_block {
            return Err(BoxError::argument(name, "requires a block"));
        }
        if !self.block && has_block {
            return Err(BoxError::argument(name, "does not take a block"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub struct VerbDef {
    pub spec: ArgSpec,
    pub run: VerbFn,
}

#[derive(Clone, Copy)]
pub struct FuncDef {
    pub spec: ArgSpec,
    pub call: FuncFn,
}

/// The builder: owns the executor and the verb/function tables, and walks
/// a parsed script statement by statement.
pub struct Builder {
    verbs: HashMap<&'static str, VerbDef>,
    funcs: HashMap<&'static str, FuncDef>,
    pub(crate) exec: Executor,
    pub(crate) context: PathBuf,
    logger: StepLogger,
}

impl Builder {
    /// A builder talking to the local Docker-compatible daemon.
    pub fn new(options: &BuildOptions) -> Result<Self> {
        let engine: Arc<dyn Engine> = Arc::new(DockerEngine::connect()?);
        Ok(Builder::with_engine(engine, options))
    }

    /// A builder over an explicit engine. Tests substitute an in-memory
    /// engine here.
    pub fn with_engine(engine: Arc<dyn Engine>, options: &BuildOptions) -> Self {
        let logger = StepLogger::new(options.tty, options.quiet);
        let mut builder = Builder {
            verbs: HashMap::new(),
            funcs: HashMap::new(),
            exec: Executor::new(engine, options.cache, logger.clone()),
            context: options.context.clone(),
            logger,
        };

        for (name, def) in verbs::table() {
            if keep(&options.omit, name) {
                builder.add_verb(name, def);
            }
        }
        for (name, def) in funcs::table() {
            if keep(&options.omit, name) {
                builder.add_function(name, def);
            }
        }
        builder
    }

    pub fn add_verb(&mut self, name: &'static str, def: VerbDef) {
        self.verbs.insert(name, def);
    }

    pub fn add_function(&mut self, name: &'static str, def: FuncDef) {
        self.funcs.insert(name, def);
    }

    /// Last committed image id.
    pub fn image_id(&self) -> Option<&str> {
        self.exec.image_id()
    }

    /// Toggle layer-cache use mid-build.
    pub fn set_cache(&mut self, use_cache: bool) {
        self.exec.set_use_cache(use_cache);
    }

    /// Tag the last image as `name[:tag]`.
    pub async fn tag(&mut self, name: &str) -> Result<()> {
        self.exec.tag(name).await
    }

    pub(crate) fn log(&self) -> &StepLogger {
        &self.logger
    }

    /// Execute a build script and return the final image id. The
    /// intermediate container is torn down whether or not the script
    /// succeeds.
    pub async fn run(&mut self, source: &str) -> Result<String> {
        let script = Script::parse(source)?;
        let result = match self.eval_block(&script.stmts).await {
            Ok(()) => self.finish().await,
            Err(e) => Err(e),
        };
        self.exec.teardown().await;
        result
    }

    /// The final commit: workdir and user stop inheriting here, then the
    /// result is committed under a reserved step key so an unchanged script
    /// re-resolves to the same image.
    async fn finish(&mut self) -> Result<String> {
        let config = self.exec.config();
        config.apply_final_defaults();

        let key = cache::step_key(cache::FINAL_STEP, &[]);
        if !self.exec.check_cache(&key).await? {
            self.exec.commit(Some(&key)).await?;
        }
        self.exec
            .image_id()
            .map(str::to_string)
            .ok_or_else(|| BoxError::Build("script produced no image".to_string()))
    }

    /// Evaluate a statement list in order. Used for both the script body
    /// and verb blocks.
    pub(crate) fn eval_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for stmt in stmts {
                self.eval_stmt(stmt).await?;
            }
            Ok(())
        })
    }

    async fn eval_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        if let Some(def) = self.verbs.get(stmt.name.as_str()).copied() {
            return self.call_verb(def, stmt).await;
        }
        if let Some(def) = self.funcs.get(stmt.name.as_str()).copied() {
            if stmt.block.is_some() {
                return Err(BoxError::script(
                    stmt.line,
                    format!("{} does not take a block", stmt.name),
                ));
            }
            let args = self.eval_args(&stmt.args).await?;
            def.spec.check(&stmt.name, args.len(), false)?;
            (def.call)(self, &args).await?;
            return Ok(());
        }
        Err(BoxError::script(
            stmt.line,
            format!("unknown verb {:?}", stmt.name),
        ))
    }

    /// The caching envelope around one verb invocation.
    async fn call_verb(&mut self, def: VerbDef, stmt: &Stmt) -> Result<()> {
        let args = self.eval_args(&stmt.args).await?;
        def.spec.check(&stmt.name, args.len(), stmt.block.is_some())?;

        let display = Value::display_args(&args);
        self.logger.step(&stmt.name, &display.join(", "));

        let mut step = Step {
            key: cache::step_key(&stmt.name, &display),
        };

        // debug re-executes every run; stepping past it on a cache hit
        // would skip the interactive shell entirely
        if stmt.name != "debug" && self.exec.check_cache(&step.key).await? {
            return Ok(());
        }

        match (def.run)(self, &mut step, &args, stmt.block.as_deref()).await? {
            Outcome::Commit => {
                self.exec.commit(Some(&step.key)).await?;
            }
            Outcome::Done => {}
        }
        Ok(())
    }

    async fn eval_args(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval_expr(expr).await?);
        }
        Ok(values)
    }

    fn eval_expr<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Int(value) => Ok(Value::Int(*value)),
                Expr::Str(segments) => {
                    let mut out = String::new();
                    for segment in segments {
                        match segment {
                            Segment::Lit(text) => out.push_str(text),
                            Segment::Interp(inner) => {
                                out.push_str(&self.eval_expr(inner).await?.display())
                            }
                        }
                    }
                    Ok(Value::Str(out))
                }
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::List(values))
                }
                Expr::Map(pairs) => {
                    let mut values = Vec::with_capacity(pairs.len());
                    for (key, value) in pairs {
                        values.push((key.clone(), self.eval_expr(value).await?));
                    }
                    Ok(Value::Map(values))
                }
                Expr::Call { name, args, line } => {
                    let def = self.funcs.get(name.as_str()).copied().ok_or_else(|| {
                        BoxError::script(*line, format!("unknown function {name:?}"))
                    })?;
                    let values = self.eval_args(args).await?;
                    def.spec.check(name, values.len(), false)?;
                    (def.call)(self, &values).await
                }
            }
        })
    }
}

/// Registration filter for the omit list.
fn keep(omit: &[String], name: &str) -> bool {
    !omit.iter().any(|o| o == name)
}
