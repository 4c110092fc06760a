//! Domain Module
//!
//! The execution-isolation collaborator: creates an isolated context for the
//! hosted program, runs its entry point on the hosted thread and unloads it
//! afterwards from the owning thread.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::ContextConfig;

/// Opaque handle of a created execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// How an execution context is set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSetup {
    pub application_name: String,
    pub application_base: PathBuf,
}

impl ContextSetup {
    /// Resolve the setup for `entry`. Without a configured base directory the
    /// directory of the absolute entry path is used.
    pub fn resolve(config: &ContextConfig, entry: &Path) -> Self {
        let application_base = match &config.application_base {
            Some(base) => base.clone(),
            None => {
                let absolute = std::path::absolute(entry).unwrap_or_else(|_| entry.to_path_buf());
                absolute
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
            }
        };

        Self {
            application_name: config.application_name.clone(),
            application_base,
        }
    }
}

/// Runs hosted programs in isolated contexts
pub trait ExecutionDomain: Send + Sync {
    fn create_context(&self, entry: &Path, setup: &ContextSetup) -> Result<ContextHandle>;

    /// Blocks on the hosted thread until the program's entry point returns.
    fn run_entry_point(&self, context: ContextHandle, entry: &Path) -> Result<()>;

    /// Called from the owning thread once the run has completed.
    fn unload_context(&self, context: ContextHandle) -> Result<()>;
}

/// Entry point of an in-process program
pub type EntryPoint = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct LoadedContext {
    entry: PathBuf,
    setup: ContextSetup,
    program: EntryPoint,
}

/// In-process execution domain
///
/// Programs are registered under an entry path; each created context runs
/// the program registered for its path.
#[derive(Default)]
pub struct ProgramDomain {
    programs: Mutex<HashMap<PathBuf, EntryPoint>>,
    contexts: Mutex<HashMap<ContextHandle, LoadedContext>>,
    next_context: AtomicU64,
}

impl ProgramDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `program` as the entry point for `entry`
    pub fn register(&self, entry: impl Into<PathBuf>, program: impl Fn() -> Result<()> + Send + Sync + 'static) {
        let entry = entry.into();
        debug!("Registered program {:?}", entry);
        lock(&self.programs).insert(entry, Arc::new(program));
    }

    pub fn loaded_contexts(&self) -> usize {
        lock(&self.contexts).len()
    }

    /// Setup a live context was created with
    pub fn context_setup(&self, context: ContextHandle) -> Option<ContextSetup> {
        lock(&self.contexts).get(&context).map(|loaded| loaded.setup.clone())
    }
}

impl ExecutionDomain for ProgramDomain {
    fn create_context(&self, entry: &Path, setup: &ContextSetup) -> Result<ContextHandle> {
        let program = lock(&self.programs)
            .get(entry)
            .cloned()
            .with_context(|| format!("No program registered for {:?}", entry))?;

        let handle = ContextHandle(self.next_context.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.contexts).insert(
            handle,
            LoadedContext {
                entry: entry.to_path_buf(),
                setup: setup.clone(),
                program,
            },
        );

        info!("Created context {:?} '{}' for {:?}", handle, setup.application_name, entry);
        Ok(handle)
    }

    fn run_entry_point(&self, context: ContextHandle, entry: &Path) -> Result<()> {
        let program = {
            let contexts = lock(&self.contexts);
            let Some(loaded) = contexts.get(&context) else {
                bail!("Context {:?} is not loaded", context);
            };
            if loaded.entry != entry {
                bail!("Context {:?} was created for {:?}, not {:?}", context, loaded.entry, entry);
            }
            loaded.program.clone()
        };

        // Lock released: the program may run for the whole hosted session
        program()
    }

    fn unload_context(&self, context: ContextHandle) -> Result<()> {
        match lock(&self.contexts).remove(&context) {
            Some(loaded) => {
                info!("Unloaded context {:?} for {:?}", context, loaded.entry);
                Ok(())
            }
            None => bail!("Context {:?} is not loaded", context),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicking hosted program must not wedge the domain
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
