//! Core Module
//!
//! Window event handling on the hosted thread. `HostCore` owns the registry
//! for one run and is only ever touched from the thread the hosted program
//! runs on; the owning thread reaches it through `HostCommand`s.

use std::cell::{Cell, Ref, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PlatformResult;
use crate::host::chain::{FilterChain, FilterId};
use crate::host::filter::{Container, Filter, FilterContext, is_parented};
use crate::host::hook::WindowEvent;
use crate::host::platform::WindowPlatform;
use crate::host::registry::{MutationScope, WindowRegistry};
use crate::host::panic_message;
use crate::shared::{Size, WindowHandle};

/// Work the owning thread hands to the hosted thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// The container's client area changed
    ResizeContainer(Size),
    /// Ask every classified window to close
    CloseApplication,
}

/// Hosted-thread state of one run
pub struct HostCore {
    platform: Arc<dyn WindowPlatform>,
    chain: Arc<FilterChain>,
    registry: RefCell<WindowRegistry>,
    container: Cell<Container>,
}

impl HostCore {
    pub fn new(platform: Arc<dyn WindowPlatform>, chain: Arc<FilterChain>, container: Container) -> Self {
        Self {
            platform,
            chain,
            registry: RefCell::new(WindowRegistry::new()),
            container: Cell::new(container),
        }
    }

    pub fn registry(&self) -> Ref<'_, WindowRegistry> {
        self.registry.borrow()
    }

    pub fn container(&self) -> Container {
        self.container.get()
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Route a decoded interceptor event.
    pub fn handle_event(&self, event: WindowEvent) {
        match event {
            WindowEvent::Shown(window) => self.window_shown(window),
            WindowEvent::Resized { window, .. } => {
                if window == self.container.get().handle {
                    self.resize_windows();
                } else {
                    self.window_resized(window);
                }
            }
            WindowEvent::Destroyed { window, .. } => self.window_destroyed(window),
            WindowEvent::Wake => {}
        }
    }

    pub fn handle_command(&self, command: HostCommand) {
        match command {
            HostCommand::ResizeContainer(size) => self.resize_container(size),
            HostCommand::CloseApplication => {
                self.close_application();
            }
        }
    }

    pub fn window_shown(&self, window: WindowHandle) {
        if self.registry.borrow().is_known(window) {
            return;
        }
        self.process_new_window(window);
    }

    /// A window processed a size change. Windows resized before their show
    /// notification are classified here first.
    pub fn window_resized(&self, window: WindowHandle) {
        let entry = self.registry.borrow().effective(window);
        let filter = match entry {
            Some(filter) => filter,
            None => self.process_new_window(window),
        };

        if let Some(id) = filter {
            self.run_action(id, window, "resize", |filter, cx| filter.resize(cx, window));
        }
    }

    pub fn window_destroyed(&self, window: WindowHandle) {
        let Some(entry) = self.registry.borrow().effective(window) else {
            return;
        };

        if let Some(id) = entry {
            self.run_action(id, window, "detach", |filter, cx| filter.detach(cx, window));
        }

        self.registry.borrow_mut().remove(window);
    }

    /// New container size, then every attached window gets its resize.
    pub fn resize_container(&self, size: Size) {
        let mut container = self.container.get();
        container.size = size;
        self.container.set(container);
        debug!("Container resized to {}", size);

        self.resize_windows();
    }

    /// Resize every classified window against a stable registry; windows
    /// created or destroyed meanwhile are applied afterwards.
    pub fn resize_windows(&self) {
        let _scope = MutationScope::new(&self.registry);
        let windows = self.registry.borrow().classified();

        for (window, id) in windows {
            self.run_action(id, window, "resize", |filter, cx| filter.resize(cx, window));
        }
    }

    /// Post a close request to every classified window; unclassified windows
    /// are left alone. Returns the number of requests posted.
    pub fn close_application(&self) -> usize {
        let _scope = MutationScope::new(&self.registry);
        let windows = self.registry.borrow().classified();

        let mut posted = 0;
        for (window, _) in windows {
            match self.platform.post_close(window) {
                Ok(()) => posted += 1,
                Err(e) => warn!("Failed to request close of window {}: {}", window, e),
            }
        }

        info!("Requested close of {} hosted windows", posted);
        posted
    }

    fn process_new_window(&self, window: WindowHandle) -> Option<FilterId> {
        self.log_window_styles(window);

        let Some(id) = self.chain.evaluate(self.platform.as_ref(), window) else {
            debug!("Window {} matched no filter", window);
            self.registry.borrow_mut().add(window, None);
            return None;
        };

        // Registered before attaching: attaching sends messages for this window
        self.registry.borrow_mut().add(window, Some(id));

        let Some(filter) = self.chain.get(id) else {
            return None;
        };
        debug!("Window {} classified as {}", window, filter.name());

        if !self.call_filter(filter, window, "attach", |filter, cx| filter.attach(cx, window)) {
            debug!("Leaving window {} unmanaged", window);
            self.registry.borrow_mut().add(window, None);
            return None;
        }

        Some(id)
    }

    fn run_action(
        &self,
        id: FilterId,
        window: WindowHandle,
        action: &str,
        f: impl FnOnce(&Filter, &FilterContext<'_>) -> PlatformResult<()>,
    ) {
        let Some(filter) = self.chain.get(id) else {
            warn!("Window {} refers to unknown filter {:?}", window, id);
            return;
        };
        self.call_filter(filter, window, action, f);
    }

    /// Run one filter action. Errors and panics stay with the window they
    /// happened on; returns whether the action succeeded.
    fn call_filter(
        &self,
        filter: &Filter,
        window: WindowHandle,
        action: &str,
        f: impl FnOnce(&Filter, &FilterContext<'_>) -> PlatformResult<()>,
    ) -> bool {
        let cx = self.filter_context();
        match catch_unwind(AssertUnwindSafe(|| f(filter, &cx))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Failed to {} window {} ({}): {}", action, window, filter.name(), e);
                false
            }
            Err(panic) => {
                warn!(
                    "Filter {} panicked during {} of window {}: {}",
                    filter.name(),
                    action,
                    window,
                    panic_message(panic.as_ref())
                );
                false
            }
        }
    }

    fn filter_context(&self) -> FilterContext<'_> {
        FilterContext {
            platform: self.platform.as_ref(),
            container: self.container.get(),
        }
    }

    fn log_window_styles(&self, window: WindowHandle) {
        let platform = self.platform.as_ref();
        if !matches!(is_parented(platform, window), Ok(false)) {
            return;
        }

        match (platform.style(window), platform.style_ex(window)) {
            (Ok(style), Ok(style_ex)) => {
                debug!("{}: Style [{:?}], StyleEx [{:?}]", window, style, style_ex);
            }
            _ => debug!("{}: styles unavailable", window),
        }
    }
}
