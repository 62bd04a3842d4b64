//! Re-runs tasks when their sources change.
//!
//! Every [`WatchBinding`] ties a glob to a task name. The filesystem is
//! observed with `notify` from the static prefix of each glob, and raw events
//! are forwarded from the notify thread into the async loop over an unbounded
//! channel. Each event path that matches a binding starts its own run of the
//! bound task; runs are never merged or cancelled.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Paths;
use crate::error::{TaskError, WatchError};
use crate::io;
use crate::runner::Runner;

/// A glob whose matches trigger a task.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pattern: Pattern,
    root: Utf8PathBuf,
    recursive: bool,
    task: String,
}

impl WatchBinding {
    /// Bind `suffix`, a glob relative to `dir`, to `task`.
    pub fn new(dir: &Utf8Path, suffix: &str, task: impl Into<String>) -> Result<Self, WatchError> {
        let pattern = Pattern::new(&format!("{}/{suffix}", Pattern::escape(dir.as_str())))?;

        // Split the suffix into a static root part and a dynamic part.
        let parts: Vec<_> = suffix.split('/').filter(|part| !part.is_empty()).collect();
        let split = parts
            .iter()
            .position(|part| part.contains(['*', '?', '[']))
            .unwrap_or(parts.len());

        let mut root = dir.to_path_buf();
        root.extend(&parts[..split]);

        let dynamic = &parts[split..];
        let recursive = dynamic.len() > 1 || dynamic.iter().any(|part| part.contains("**"));

        Ok(Self {
            pattern,
            root,
            recursive,
            task: task.into(),
        })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Directory to observe for this binding.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path_with(path, io::MATCH)
    }
}

/// The dev loop bindings for a project layout.
pub fn bindings(paths: &Paths) -> Result<Vec<WatchBinding>, WatchError> {
    Ok(vec![
        WatchBinding::new(&paths.styles.entry, "**/*.scss", "sass")?,
        WatchBinding::new(&paths.templates.entry, "**/*.pug", "pug")?,
        WatchBinding::new(&paths.scripts.entry, "**/*.js", "bundle-dev")?,
        WatchBinding::new(&paths.images.entry, "**/*", "copy-images")?,
        WatchBinding::new(&paths.scripts.output, "*.js", "reload")?,
        WatchBinding::new(&paths.root, "*.html", "reload")?,
    ])
}

/// Reduce the binding roots to the minimal set of watches.
///
/// A directory below a recursively watched one is already covered and is
/// dropped. A directory watched both ways is watched recursively.
pub fn watch_roots(bindings: &[WatchBinding]) -> Vec<(Utf8PathBuf, RecursiveMode)> {
    let mut roots = BTreeMap::<&Utf8Path, bool>::new();
    for binding in bindings {
        *roots.entry(binding.root()).or_default() |= binding.is_recursive();
    }

    let mut collapsed: Vec<(Utf8PathBuf, bool)> = Vec::new();
    for (path, recursive) in roots {
        if collapsed
            .iter()
            .any(|(parent, deep)| *deep && path.starts_with(parent))
        {
            continue;
        }
        collapsed.push((path.to_path_buf(), recursive));
    }

    collapsed
        .into_iter()
        .map(|(path, recursive)| {
            let mode = match recursive {
                true => RecursiveMode::Recursive,
                false => RecursiveMode::NonRecursive,
            };
            (path, mode)
        })
        .collect()
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Turns filesystem events into task runs.
pub struct WatchLoop {
    runner: Runner,
    bindings: Vec<WatchBinding>,
}

impl WatchLoop {
    pub fn new(runner: Runner, bindings: Vec<WatchBinding>) -> Self {
        Self { runner, bindings }
    }

    /// Start one run of the bound task for every matching path in `event`.
    /// Failed runs are logged; the loop itself keeps going.
    pub fn dispatch(&self, event: &Event) -> Vec<JoinHandle<Result<(), TaskError>>> {
        if !is_relevant(&event.kind) {
            return Vec::new();
        }

        let mut handles = Vec::new();
        for path in &event.paths {
            for binding in self.bindings.iter().filter(|b| b.matches(path)) {
                debug!(task = binding.task(), path = %path.display(), "change detected");

                let run = self.runner.run(binding.task());
                handles.push(tokio::spawn(async move {
                    let result = run.await;
                    if let Err(e) = &result {
                        error!("{e}");
                    }
                    result
                }));
            }
        }

        handles
    }

    /// Treat every file already under a freshly watched `dir` as created.
    /// Files written before the watch was in place would be missed otherwise.
    pub fn sweep(
        &self,
        dir: &Utf8Path,
        mode: RecursiveMode,
    ) -> Vec<JoinHandle<Result<(), TaskError>>> {
        let pattern = match mode {
            RecursiveMode::Recursive => "**/*",
            RecursiveMode::NonRecursive => "*",
        };

        let files = match io::find(dir, pattern) {
            Ok(files) => files,
            Err(e) => {
                warn!("couldn't scan {dir}: {e}");
                return Vec::new();
            }
        };

        files
            .into_iter()
            .flat_map(|file| {
                let event = Event::new(EventKind::Create(CreateKind::File))
                    .add_path(file.into_std_path_buf());
                self.dispatch(&event)
            })
            .collect()
    }
}

/// Active watches, plus roots that don't exist yet. A missing root is waited
/// for from its nearest existing ancestor, watched non-recursively, so that
/// output directories created after startup are still picked up.
struct Watches<W> {
    watcher: W,
    watched: HashSet<Utf8PathBuf>,
    pending: Vec<(Utf8PathBuf, RecursiveMode)>,
}

impl<W: Watcher> Watches<W> {
    fn new(watcher: W) -> Self {
        Self {
            watcher,
            watched: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Watch `root` now if it exists, otherwise remember it. Returns whether
    /// the watch is active.
    fn add(&mut self, root: Utf8PathBuf, mode: RecursiveMode) -> Result<bool, WatchError> {
        if !root.is_dir() {
            self.pending.push((root, mode));
            return Ok(false);
        }

        self.watcher.watch(root.as_std_path(), mode)?;
        self.watched.insert(root);
        Ok(true)
    }

    fn is_waiting(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Make sure the nearest existing ancestor of every pending root is
    /// observed, so its creation shows up as an event.
    fn watch_ancestors(&mut self) -> Result<(), WatchError> {
        for (root, _) in &self.pending {
            let Some(parent) = root.ancestors().skip(1).find(|dir| dir.is_dir()) else {
                continue;
            };
            if self.watched.contains(parent) {
                continue;
            }

            debug!("waiting for {root} from {parent}");
            self.watcher.watch(parent.as_std_path(), RecursiveMode::NonRecursive)?;
            self.watched.insert(parent.to_path_buf());
        }

        Ok(())
    }

    /// Start watching every pending root that exists by now, returning them.
    fn activate(&mut self) -> Result<Vec<(Utf8PathBuf, RecursiveMode)>, WatchError> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(root, _)| root.is_dir());
        self.pending = waiting;

        let mut activated = Vec::new();
        for (root, mode) in ready {
            match self.watcher.watch(root.as_std_path(), mode) {
                Ok(()) => {
                    self.watched.insert(root.clone());
                    activated.push((root, mode));
                }
                Err(e) => {
                    warn!("couldn't watch {root} yet: {e}");
                    self.pending.push((root, mode));
                }
            }
        }

        self.watch_ancestors()?;
        Ok(activated)
    }
}

/// Observe the project and re-run tasks until the event stream ends.
pub async fn watch(runner: Runner) -> Result<(), WatchError> {
    let paths = &runner.context().paths;
    let bindings = bindings(paths)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if tx.send(event).is_err() {
                    debug!("watch loop is gone, dropping event");
                }
            }
            Err(e) => error!("watch error: {e}"),
        },
        Config::default(),
    )?;

    let mut watches = Watches::new(watcher);
    for (root, mode) in watch_roots(&bindings) {
        let short = io::short(&root, &paths.root).to_owned();
        match watches.add(root, mode)? {
            true => info!("watching {short}"),
            false => info!("{short} doesn't exist yet, waiting for it"),
        }
    }
    watches.watch_ancestors()?;

    let watch_loop = WatchLoop::new(runner.clone(), bindings);
    while let Some(event) = rx.recv().await {
        watch_loop.dispatch(&event);

        if watches.is_waiting() {
            for (root, mode) in watches.activate()? {
                info!("watching {}", io::short(&root, &paths.root));
                watch_loop.sweep(&root, mode);
            }
        }
    }

    Ok(())
}
