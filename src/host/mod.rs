//! Host Module
//!
//! `AppHost` embeds a hosted program's windows into a container control.
//! The program runs on a dedicated hosted thread; its windows are observed
//! through per-thread hooks on that thread and classified by the filter
//! chain. The owning thread talks to the hosted thread only through queued
//! commands and a single completion message.

pub mod chain;
pub mod core;
pub mod domain;
pub mod filter;
pub mod hook;
pub mod platform;
pub mod registry;
pub mod style;

pub use chain::{FilterChain, FilterCollection, FilterId};
pub use self::core::{HostCommand, HostCore};
pub use domain::{ContextHandle, ContextSetup, EntryPoint, ExecutionDomain, ProgramDomain};
pub use filter::{Container, DialogWindowFilter, Filter, FilterContext, MainWindowFilter, PopupWindowFilter, WindowFilter};
pub use hook::{WindowEvent, WindowEventInterceptor};
pub use platform::{HookId, WindowPlatform};
pub use registry::{MutationLog, MutationScope, WindowRegistry};
pub use style::{WindowStyle, WindowStyleEx};

use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{CaptureConfig, HostConfig};
use crate::error::{HostError, HostResult};
use crate::shared::{Size, ThreadId};

/// Lifecycle of a host container. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Running,
    Closing,
    Closed,
}

/// How the hosted program's entry point ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The entry point returned an error or panicked
    Faulted(String),
}

impl RunOutcome {
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

type ClosedListener = Box<dyn Fn(&RunOutcome) + Send>;

/// Owning-thread side of a started run
struct Run {
    context: ContextHandle,
    commands: mpsc::UnboundedSender<HostCommand>,
    hosted_thread: Arc<OnceLock<ThreadId>>,
    completion: oneshot::Receiver<RunOutcome>,
    thread: Option<JoinHandle<()>>,
}

/// Host container for one hosted program
pub struct AppHost {
    platform: Arc<dyn WindowPlatform>,
    domain: Arc<dyn ExecutionDomain>,
    container: Container,
    config: HostConfig,
    filters: FilterCollection,
    listeners: Arc<Mutex<Vec<ClosedListener>>>,
    state: HostState,
    run: Option<Run>,
    outcome: Option<RunOutcome>,
}

impl AppHost {
    pub fn new(platform: Arc<dyn WindowPlatform>, domain: Arc<dyn ExecutionDomain>, container: Container) -> Self {
        Self {
            platform,
            domain,
            container,
            config: HostConfig::default(),
            filters: FilterCollection::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            state: HostState::Idle,
            run: None,
            outcome: None,
        }
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Read once by `start`; later changes don't affect a running chain.
    pub fn config_mut(&mut self) -> &mut HostConfig {
        &mut self.config
    }

    pub fn capture_mut(&mut self) -> &mut CaptureConfig {
        &mut self.config.capture
    }

    pub fn filters(&self) -> &FilterCollection {
        &self.filters
    }

    /// Custom filters. Frozen once the application has started.
    pub fn filters_mut(&mut self) -> &mut FilterCollection {
        &mut self.filters
    }

    /// How the run ended, once the host is closed
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Native id of the hosted thread, once it is receiving window events
    pub fn hosted_thread(&self) -> Option<ThreadId> {
        self.run.as_ref().and_then(|run| run.hosted_thread.get().copied())
    }

    /// Register a listener fired on the hosted thread when the entry point
    /// returns or fails, before the context is unloaded.
    pub fn on_application_closed(&self, listener: impl Fn(&RunOutcome) + Send + 'static) {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Run the program at `entry` on a new hosted thread.
    pub fn start(&mut self, entry: impl AsRef<Path>) -> HostResult<()> {
        let entry = entry.as_ref();

        if self.state != HostState::Idle {
            warn!("start({:?}) rejected: host is {:?}", entry, self.state);
            return Err(HostError::AlreadyStarted);
        }

        if entry.as_os_str().is_empty() {
            return Err(HostError::EmptyEntryPath);
        }

        let chain = Arc::new(FilterChain::build(&self.config.capture, &self.filters));
        let setup = ContextSetup::resolve(&self.config.context, entry);
        let context = self
            .domain
            .create_context(entry, &setup)
            .map_err(HostError::Context)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion) = oneshot::channel();
        let hosted_thread = Arc::new(OnceLock::new());

        let hosted = HostedThread {
            session: Session {
                platform: self.platform.clone(),
                domain: self.domain.clone(),
                chain: chain.clone(),
                container: self.container,
                context,
                entry: entry.to_path_buf(),
                commands: command_rx,
                hosted_thread: hosted_thread.clone(),
            },
            listeners: self.listeners.clone(),
            completion: completion_tx,
        };

        let thread = std::thread::Builder::new()
            .name(self.config.context.hosted_thread_name.clone())
            .spawn(move || hosted.run());

        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to spawn hosted thread: {}", e);
                if let Err(e) = self.domain.unload_context(context) {
                    warn!("Failed to unload context {:?}: {:#}", context, e);
                }
                return Err(HostError::Spawn(e));
            }
        };

        self.filters.freeze();
        self.state = HostState::Running;
        self.run = Some(Run {
            context,
            commands,
            hosted_thread,
            completion,
            thread: Some(thread),
        });

        info!("Started {:?} in '{}' with filters {:?}", entry, setup.application_name, chain.describe());
        Ok(())
    }

    /// Ask every classified window of the hosted program to close.
    /// Advisory: the program decides whether and when to exit.
    pub fn close(&self) {
        if self.state != HostState::Running {
            debug!("close() ignored: host is {:?}", self.state);
            return;
        }
        info!("Requesting hosted application close");
        self.send(HostCommand::CloseApplication);
    }

    /// The container's client area changed size.
    pub fn resize_container(&mut self, size: Size) {
        self.container.size = size;
        if self.state == HostState::Running {
            self.send(HostCommand::ResizeContainer(size));
        }
    }

    /// Non-blocking check for the completion message. Unloads the context
    /// when the run has ended.
    pub fn poll_completion(&mut self) -> Option<RunOutcome> {
        if self.state != HostState::Running {
            return self.outcome.clone();
        }

        let run = self.run.as_mut()?;
        let outcome = match run.completion.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                RunOutcome::Faulted("hosted thread ended without reporting".to_string())
            }
        };

        Some(self.finish(outcome))
    }

    /// Wait for the hosted program to exit and unload its context.
    /// Returns `None` if the host was never started.
    pub async fn wait_for_exit(&mut self) -> Option<RunOutcome> {
        if self.state != HostState::Running {
            return self.outcome.clone();
        }

        let run = self.run.as_mut()?;
        let outcome = match (&mut run.completion).await {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Faulted("hosted thread ended without reporting".to_string()),
        };

        Some(self.finish(outcome))
    }

    fn send(&self, command: HostCommand) {
        let Some(run) = &self.run else {
            return;
        };

        if run.commands.send(command).is_err() {
            debug!("Hosted run already ended, dropped {:?}", command);
            return;
        }

        // Before subscribing, the hosted thread drains the queue on its own
        if let Some(thread) = run.hosted_thread.get() {
            if let Err(e) = self.platform.wake(*thread) {
                warn!("Failed to wake hosted thread {}: {}", thread, e);
            }
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunOutcome {
        self.state = HostState::Closing;

        if let Some(run) = self.run.as_mut() {
            if let Some(thread) = run.thread.take() {
                if thread.join().is_err() {
                    warn!("Hosted thread panicked after reporting completion");
                }
            }

            match self.domain.unload_context(run.context) {
                Ok(()) => info!("Unloaded hosted context {:?}", run.context),
                Err(e) => warn!("Failed to unload context {:?}: {:#}", run.context, e),
            }
        }

        self.state = HostState::Closed;
        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for AppHost {
    fn drop(&mut self) {
        if self.state == HostState::Running {
            info!("Host dropped while running, requesting close");
            self.send(HostCommand::CloseApplication);
            // The hosted thread is detached; its completion goes nowhere
        }
    }
}

/// Everything the hosted thread takes with it
struct HostedThread {
    session: Session,
    listeners: Arc<Mutex<Vec<ClosedListener>>>,
    completion: oneshot::Sender<RunOutcome>,
}

impl HostedThread {
    fn run(self) {
        let Self {
            session,
            listeners,
            completion,
        } = self;
        let entry = session.entry.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| session.run()))
            .unwrap_or_else(|panic| RunOutcome::Faulted(panic_message(panic.as_ref())));

        match &outcome {
            RunOutcome::Completed => info!("Hosted application {:?} exited", entry),
            RunOutcome::Faulted(reason) => warn!("Hosted application {:?} faulted: {}", entry, reason),
        }

        for listener in lock(&listeners).iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&outcome))).is_err() {
                warn!("Application closed listener panicked");
            }
        }

        if completion.send(outcome).is_err() {
            debug!("Host gone before completion of {:?}, dropping it", entry);
        }
    }
}

/// One hosted run: intercept window events, then run the entry point
struct Session {
    platform: Arc<dyn WindowPlatform>,
    domain: Arc<dyn ExecutionDomain>,
    chain: Arc<FilterChain>,
    container: Container,
    context: ContextHandle,
    entry: PathBuf,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    hosted_thread: Arc<OnceLock<ThreadId>>,
}

impl Session {
    fn run(self) -> RunOutcome {
        let platform = self.platform;
        if let Err(e) = platform.prepare_thread() {
            warn!("Failed to prepare hosted thread: {}", e);
        }

        let thread = platform.current_thread();
        let core = Rc::new(HostCore::new(platform.clone(), self.chain, self.container));
        let commands = Rc::new(RefCell::new(self.commands));

        let interceptor = {
            let core = core.clone();
            let commands = commands.clone();
            WindowEventInterceptor::subscribe(platform, thread, move |event| {
                core.handle_event(event);
                drain_commands(&core, &commands);
            })
        };

        let mut interceptor = match interceptor {
            Ok(interceptor) => interceptor,
            Err(e) => return RunOutcome::Faulted(format!("failed to intercept window events: {}", e)),
        };

        if self.hosted_thread.set(thread).is_err() {
            debug!("Hosted thread id already recorded, ignoring {}", thread);
        }
        debug!("Hosted thread {} intercepting window events", thread);
        drain_commands(&core, &commands);

        let result = catch_unwind(AssertUnwindSafe(|| self.domain.run_entry_point(self.context, &self.entry)));
        interceptor.unsubscribe();

        match result {
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => RunOutcome::Faulted(format!("{:#}", e)),
            Err(panic) => RunOutcome::Faulted(panic_message(panic.as_ref())),
        }
    }
}

/// Apply queued owning-thread commands, one at a time: a command can
/// trigger window events that drain again.
fn drain_commands(core: &HostCore, commands: &RefCell<mpsc::UnboundedReceiver<HostCommand>>) {
    loop {
        let next = match commands.try_borrow_mut() {
            Ok(mut rx) => rx.try_recv(),
            Err(_) => return,
        };
        match next {
            Ok(command) => core.handle_command(command),
            Err(_) => return,
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::{HeadlessPlatform, WindowSpec};

    fn host(platform: &Arc<HeadlessPlatform>, domain: &Arc<ProgramDomain>) -> AppHost {
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        AppHost::new(platform.clone(), domain.clone(), Container::new(container, Size::new(800, 600)))
    }

    #[test]
    fn test_start_rejects_empty_entry_and_stays_idle() {
        let platform = Arc::new(HeadlessPlatform::new());
        let domain = Arc::new(ProgramDomain::new());
        let mut host = host(&platform, &domain);

        assert!(matches!(host.start(""), Err(HostError::EmptyEntryPath)));
        assert_eq!(host.state(), HostState::Idle);
        assert!(!host.filters().is_frozen());
    }

    #[test]
    fn test_failed_context_creation_leaves_host_idle() {
        let platform = Arc::new(HeadlessPlatform::new());
        let domain = Arc::new(ProgramDomain::new());
        let mut host = host(&platform, &domain);

        assert!(matches!(host.start("missing.exe"), Err(HostError::Context(_))));
        assert_eq!(host.state(), HostState::Idle);
        assert!(!host.filters().is_frozen());
    }

    #[test]
    fn test_close_before_start_is_ignored() {
        let platform = Arc::new(HeadlessPlatform::new());
        let domain = Arc::new(ProgramDomain::new());
        let mut host = host(&platform, &domain);

        host.close();
        host.resize_container(Size::new(1024, 768));
        assert_eq!(host.container().size, Size::new(1024, 768));
        assert_eq!(host.poll_completion(), None);
        assert!(platform.close_requests().is_empty());
    }

    #[test]
    fn test_completion_polled_and_context_unloaded() {
        let platform = Arc::new(HeadlessPlatform::new());
        let domain = Arc::new(ProgramDomain::new());
        domain.register("quick.exe", || Ok(()));
        let mut host = host(&platform, &domain);

        host.start("quick.exe").unwrap();
        assert_eq!(domain.loaded_contexts(), 1);

        let outcome = loop {
            if let Some(outcome) = host.poll_completion() {
                break outcome;
            }
            std::thread::yield_now();
        };

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(host.state(), HostState::Closed);
        assert_eq!(domain.loaded_contexts(), 0);
        assert_eq!(host.outcome(), Some(&RunOutcome::Completed));
        assert_eq!(host.poll_completion(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(boxed.as_ref()), "panicked with a non-string payload");
    }
}
