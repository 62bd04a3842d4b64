//! Executes tasks from a validated [`Registry`].
//!
//! Everything runs on the caller's tokio runtime. Sequential composites await
//! their children one by one and stop at the first fatal error. Parallel
//! composites spawn every child onto a [`JoinSet`] up front and wait for all
//! of them, so one failing child never keeps its siblings from starting.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::BoxFuture;
use crate::bundler::{Bundler, Esbuild};
use crate::cache::ImageCache;
use crate::config::Paths;
use crate::error::{RegistryError, TaskError};
use crate::server::{DevServer, Reloader, ServerOptions};
use crate::steps::templates::{PugCli, TemplateCompiler};
use crate::task::{Action, Registry};

/// Shared state every step can reach.
pub struct Context {
    pub paths: Paths,
    pub images: ImageCache,
    pub reloader: Reloader,
    pub server: DevServer,
    pub bundler: Arc<dyn Bundler>,
    pub templates: Arc<dyn TemplateCompiler>,
}

impl Context {
    /// Context with the default external tools (`esbuild`, `pug`).
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            images: ImageCache::new(),
            reloader: Reloader::new(),
            server: DevServer::default(),
            bundler: Arc::new(Esbuild::from_env()),
            templates: Arc::new(PugCli::from_env()),
        }
    }

    pub fn with_bundler(mut self, bundler: impl Bundler + 'static) -> Self {
        self.bundler = Arc::new(bundler);
        self
    }

    pub fn with_templates(mut self, templates: impl TemplateCompiler + 'static) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_server(mut self, options: ServerOptions) -> Self {
        self.server = DevServer::new(options);
        self
    }
}

struct Shared {
    registry: Registry,
    context: Context,
}

/// Cheap to clone handle used to start tasks by name.
#[derive(Clone)]
pub struct Runner(Arc<Shared>);

impl Runner {
    pub fn new(registry: Registry, context: Context) -> Result<Self, RegistryError> {
        registry.validate()?;
        Ok(Self(Arc::new(Shared { registry, context })))
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    /// Run a task and everything it is composed of.
    ///
    /// The returned future owns its own handle to the runner, so it can be
    /// spawned freely.
    pub fn run(&self, name: &str) -> BoxFuture<'static, Result<(), TaskError>> {
        let runner = self.clone();
        let name = name.to_string();

        Box::pin(async move {
            let task = runner
                .registry()
                .get(&name)
                .ok_or_else(|| TaskError::Unknown(name.clone()))?;

            let span = info_span!("task", name = %name);
            span.pb_set_style(&crate::logging::task_style());
            span.pb_set_message(&format!("Running {name}"));

            async {
                let start = Instant::now();
                info!("starting '{name}'");

                match &task.action {
                    Action::Step(step) => {
                        step.run(&runner)
                            .await
                            .map_err(|source| TaskError::Step {
                                task: name.clone(),
                                source,
                            })?;
                    }
                    Action::Sequential(children) => {
                        for child in children {
                            runner.run(child).await?;
                        }
                    }
                    Action::Parallel(children) => {
                        run_parallel(&runner, children).await?;
                    }
                }

                info!("finished '{name}' {}", crate::io::as_overhead(start));
                Ok::<(), TaskError>(())
            }
            .instrument(span.clone())
            .await
        })
    }

    /// Start a task in the background on the current runtime.
    pub fn spawn(&self, name: &str) -> tokio::task::JoinHandle<Result<(), TaskError>> {
        tokio::spawn(self.run(name))
    }
}

async fn run_parallel(runner: &Runner, children: &[String]) -> Result<(), TaskError> {
    let mut set = JoinSet::new();
    for child in children {
        set.spawn(runner.run(child));
    }

    let mut first = None;
    while let Some(joined) = set.join_next().await {
        let result = joined.map_err(TaskError::from).and_then(|result| result);

        if let Err(e) = result {
            error!("{e}");
            first.get_or_insert(e);
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
