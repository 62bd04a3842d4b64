use tracing::info;

use crate::BoxFuture;
use crate::error::StepError;
use crate::runner::Runner;
use crate::task::{Step, TaskKind};
use crate::watch;

/// Tells every connected browser to reload.
pub struct Reload;

impl Step for Reload {
    fn kind(&self) -> TaskKind {
        TaskKind::Reload
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let reloader = &runner.context().reloader;
            info!("reloading {} browser(s)", reloader.connected());
            reloader.reload();
            Ok(())
        })
    }
}

/// Runs the watch loop. Never finishes on its own.
pub struct Watch;

impl Step for Watch {
    fn kind(&self) -> TaskKind {
        TaskKind::WatchRegister
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            watch::watch(runner.clone()).await?;
            Ok(())
        })
    }
}

/// Runs the development server. Never finishes on its own.
pub struct Serve;

impl Step for Serve {
    fn kind(&self) -> TaskKind {
        TaskKind::ServerStart
    }

    fn run<'a>(&'a self, runner: &'a Runner) -> BoxFuture<'a, Result<(), StepError>> {
        Box::pin(async move {
            let context = runner.context();

            context
                .server
                .serve(context.paths.root.clone(), &context.reloader)
                .await
                .map_err(StepError::Server)
        })
    }
}
