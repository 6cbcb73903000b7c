//! Deferred actions run when a pipeline run ends, however it ends.

use std::fmt;
use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, warn};

pub type DeferredFn = Box<dyn FnOnce() -> Result<()>>;

pub enum CleanupAction {
    RemoveFile(PathBuf),
    RemoveMatching {
        dir: PathBuf,
        pattern: Pattern,
        keep: Option<PathBuf>,
    },
    Call { label: String, action: DeferredFn },
}

impl CleanupAction {
    pub fn call<F>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        CleanupAction::Call {
            label: label.into(),
            action: Box::new(action),
        }
    }

    fn run(self) -> Result<()> {
        match self {
            CleanupAction::RemoveFile(path) => remove_if_exists(&path),
            CleanupAction::RemoveMatching { dir, pattern, keep } => {
                remove_matching(&dir, &pattern, keep.as_deref())
            }
            CleanupAction::Call { action, .. } => action(),
        }
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupAction::RemoveFile(path) => f.debug_tuple("RemoveFile").field(path).finish(),
            CleanupAction::RemoveMatching { dir, pattern, keep } => f
                .debug_struct("RemoveMatching")
                .field("dir", dir)
                .field("pattern", &pattern.as_str())
                .field("keep", keep)
                .finish(),
            CleanupAction::Call { label, .. } => f.debug_struct("Call").field("label", label).finish(),
        }
    }
}

/// Ordered list of deferred actions. Every action runs at most once: `run_all`
/// drains the ledger, and anything still registered when the ledger is dropped
/// runs then, in reverse order.
#[derive(Debug, Default)]
pub struct CleanupLedger {
    actions: Vec<CleanupAction>,
}

impl CleanupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: CleanupAction) {
        debug!(?action, "Cleanup action registered");
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Runs every pending action in registration order, or reversed. Failures
    /// and panics are logged and swallowed. Returns the number of failures.
    pub fn run_all(&mut self, reverse: bool) -> usize {
        let mut actions = std::mem::take(&mut self.actions);
        if reverse {
            actions.reverse();
        }

        let mut failures = 0usize;
        for action in actions {
            let description = format!("{action:?}");
            debug!(action = %description, "Running cleanup action");
            match catch_unwind(AssertUnwindSafe(|| action.run())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(action = %description, "Cleanup action failed: {err:#}");
                }
                Err(_) => {
                    failures += 1;
                    warn!(action = %description, "Cleanup action panicked");
                }
            }
        }
        failures
    }
}

impl Drop for CleanupLedger {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            self.run_all(true);
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed intermediate file");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn remove_matching(dir: &Path, pattern: &Pattern, keep: Option<&Path>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to list {}", dir.display()));
        }
    };

    let keep = keep.and_then(|path| path.canonicalize().ok());
    let mut first_error = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !pattern.matches(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        if keep.is_some() && path.canonicalize().ok() == keep {
            continue;
        }
        if let Err(err) = remove_if_exists(&path) {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
