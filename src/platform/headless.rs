//! Headless Platform
//!
//! In-memory windowing with per-thread message queues. Windows belong to the
//! thread that created them; messages sent to a window from its own thread
//! go through the hooks immediately, messages from other threads are queued
//! and delivered by that thread's `pump`.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{PlatformError, PlatformResult};
use crate::host::hook::{
    self, CallWndProcMessage, CallWndProcRetMessage, HookKind, QueuedMessage, RawHookMessage, messages,
};
use crate::host::platform::{HookId, WindowPlatform};
use crate::host::style::{WindowStyle, WindowStyleEx};
use crate::shared::{Rect, Size, ThreadId, WindowHandle};

const DESKTOP_WINDOW: WindowHandle = WindowHandle(0x10010);
const FIRST_WINDOW: isize = 0x20000;
const WAKE_MESSAGE: u32 = messages::WM_APP + 1;

static NEXT_THREAD: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

fn current_thread_id() -> ThreadId {
    THREAD_ID.with(|id| match id.get() {
        Some(thread) => thread,
        None => {
            let thread = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
            id.set(Some(thread));
            thread
        }
    })
}

/// Initial state of a headless window
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    pub style: WindowStyle,
    pub style_ex: WindowStyleEx,
    pub parent: Option<WindowHandle>,
    pub bounds: Rect,
}

impl WindowSpec {
    pub fn new(style: WindowStyle, style_ex: WindowStyleEx) -> Self {
        Self {
            style,
            style_ex,
            parent: None,
            bounds: Rect::new(0, 0, 100, 100),
        }
    }

    /// A child control of the calling thread's UI, used as a host container
    pub fn container(size: Size) -> Self {
        Self::new(
            WindowStyle::CHILD | WindowStyle::VISIBLE | WindowStyle::CLIP_CHILDREN,
            WindowStyleEx::CONTROL_PARENT,
        )
        .bounds(Rect::new(0, 0, size.width, size.height))
    }

    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn parent(mut self, parent: WindowHandle) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Debug)]
struct HeadlessWindow {
    style: WindowStyle,
    style_ex: WindowStyleEx,
    parent: Option<WindowHandle>,
    bounds: Rect,
    thread: ThreadId,
    visible: bool,
    frame_changes: usize,
}

#[derive(Debug, Clone, Copy)]
enum Queued {
    Posted(QueuedMessage),
    Sent(CallWndProcMessage),
    /// Destroy requested by another thread
    Destroy(WindowHandle),
}

#[derive(Default)]
struct State {
    windows: BTreeMap<WindowHandle, HeadlessWindow>,
    next_window: isize,
    queues: HashMap<ThreadId, VecDeque<Queued>>,
    hooks: HashMap<HookId, (ThreadId, HookKind)>,
    next_hook: usize,
    close_requests: Vec<WindowHandle>,
}

impl State {
    fn window(&self, window: WindowHandle) -> PlatformResult<&HeadlessWindow> {
        self.windows.get(&window).ok_or(PlatformError::InvalidWindow(window))
    }

    fn window_mut(&mut self, window: WindowHandle) -> PlatformResult<&mut HeadlessWindow> {
        self.windows.get_mut(&window).ok_or(PlatformError::InvalidWindow(window))
    }

    fn hooked(&self, thread: ThreadId, kind: HookKind) -> bool {
        self.hooks.values().any(|&(t, k)| t == thread && k == kind)
    }
}

/// In-memory `WindowPlatform`
pub struct HeadlessPlatform {
    state: Mutex<State>,
    queued: Condvar,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_window: FIRST_WINDOW,
                ..State::default()
            }),
            queued: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a hidden window owned by the calling thread
    pub fn create_window(&self, spec: WindowSpec) -> WindowHandle {
        let mut state = self.lock();
        let window = WindowHandle(state.next_window);
        state.next_window += 0x10;
        state.windows.insert(
            window,
            HeadlessWindow {
                style: spec.style,
                style_ex: spec.style_ex,
                parent: spec.parent,
                bounds: spec.bounds,
                thread: current_thread_id(),
                visible: false,
                frame_changes: 0,
            },
        );
        trace!("Created headless window {}", window);
        window
    }

    pub fn show_window(&self, window: WindowHandle) -> PlatformResult<()> {
        self.set_visible(window, true)
    }

    pub fn hide_window(&self, window: WindowHandle) -> PlatformResult<()> {
        self.set_visible(window, false)
    }

    /// Resize keeping the window's origin
    pub fn resize_window(&self, window: WindowHandle, size: Size) -> PlatformResult<()> {
        let bounds = self.window_rect(window)?;
        self.move_window(window, Rect::new(bounds.left, bounds.top, size.width, size.height), true)
    }

    /// Destroy `window` and its children. The destroy notification is
    /// processed while the window still exists. Called from a thread other
    /// than the owner, the destroy happens when the owner pumps.
    pub fn destroy_window(&self, window: WindowHandle) -> PlatformResult<()> {
        let owner = self.lock().window(window)?.thread;
        if owner != current_thread_id() {
            self.enqueue(owner, Queued::Destroy(window));
            return Ok(());
        }

        self.deliver_sent(CallWndProcMessage {
            window,
            message: messages::WM_DESTROY,
            wparam: 0,
            lparam: 0,
        })?;

        let children: Vec<WindowHandle> = {
            let mut state = self.lock();
            state.windows.remove(&window);
            state
                .windows
                .iter()
                .filter(|(_, w)| w.parent == Some(window))
                .map(|(handle, _)| *handle)
                .collect()
        };

        for child in children {
            // A child may already be gone through an earlier sibling
            if let Err(e) = self.destroy_window(child) {
                trace!("Child {} of {} already gone: {}", child, window, e);
            }
        }
        Ok(())
    }

    pub fn exists(&self, window: WindowHandle) -> bool {
        self.lock().windows.contains_key(&window)
    }

    pub fn is_visible(&self, window: WindowHandle) -> bool {
        self.lock().windows.get(&window).is_some_and(|w| w.visible)
    }

    /// Live windows owned by the calling thread
    pub fn thread_window_count(&self) -> usize {
        let thread = current_thread_id();
        self.lock().windows.values().filter(|w| w.thread == thread).count()
    }

    /// Every close request posted so far, in order
    pub fn close_requests(&self) -> Vec<WindowHandle> {
        self.lock().close_requests.clone()
    }

    pub fn frame_changes(&self, window: WindowHandle) -> usize {
        self.lock().windows.get(&window).map_or(0, |w| w.frame_changes)
    }

    pub fn installed_hooks(&self) -> usize {
        self.lock().hooks.len()
    }

    /// Deliver everything queued for the calling thread. Returns the number
    /// of messages processed.
    pub fn pump(&self) -> usize {
        let thread = current_thread_id();
        let mut processed = 0;

        loop {
            let next = self.lock().queues.get_mut(&thread).and_then(VecDeque::pop_front);
            let Some(queued) = next else {
                break;
            };
            processed += 1;

            match queued {
                Queued::Sent(msg) => {
                    if let Err(e) = self.deliver_sent(msg) {
                        debug!("Dropped message {:#x} for {}: {}", msg.message, msg.window, e);
                    }
                }
                Queued::Posted(msg) => self.deliver_posted(thread, msg),
                Queued::Destroy(window) => {
                    if let Err(e) = self.destroy_window(window) {
                        debug!("Destroy of {} ignored: {}", window, e);
                    }
                }
            }
        }

        processed
    }

    /// Wait up to `timeout` for queued messages, then pump.
    pub fn pump_wait(&self, timeout: Duration) -> usize {
        let thread = current_thread_id();
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.queues.get(&thread).is_some_and(|q| !q.is_empty()) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = match self.queued.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        drop(state);

        self.pump()
    }

    /// Message loop of a hosted program: pump until the calling thread owns
    /// no windows.
    pub fn run_until_windows_closed(&self, poll: Duration) {
        while self.thread_window_count() > 0 {
            self.pump_wait(poll);
        }
    }

    fn set_visible(&self, window: WindowHandle, visible: bool) -> PlatformResult<()> {
        {
            let mut state = self.lock();
            let w = state.window_mut(window)?;
            if w.visible == visible {
                return Ok(());
            }
            w.visible = visible;
        }
        self.send_message(window, messages::WM_SHOWWINDOW, visible as usize, 0)
    }

    fn enqueue(&self, thread: ThreadId, queued: Queued) {
        self.lock().queues.entry(thread).or_default().push_back(queued);
        self.queued.notify_all();
    }

    /// Sent messages run synchronously on the owner thread, or are queued for it.
    fn send_message(&self, window: WindowHandle, message: u32, wparam: usize, lparam: isize) -> PlatformResult<()> {
        let owner = self.lock().window(window)?.thread;
        let msg = CallWndProcMessage {
            window,
            message,
            wparam,
            lparam,
        };

        if owner == current_thread_id() {
            self.deliver_sent(msg)
        } else {
            self.enqueue(owner, Queued::Sent(msg));
            Ok(())
        }
    }

    fn deliver_sent(&self, msg: CallWndProcMessage) -> PlatformResult<()> {
        let thread = current_thread_id();
        let (pre, post) = {
            let state = self.lock();
            state.window(msg.window)?;
            (
                state.hooked(thread, HookKind::CallWndProc),
                state.hooked(thread, HookKind::CallWndProcRet),
            )
        };

        // No lock held: hooks re-enter the platform
        if pre {
            hook::dispatch(&RawHookMessage::CallWndProc(msg));
        }
        if post {
            hook::dispatch(&RawHookMessage::CallWndProcRet(CallWndProcRetMessage {
                window: msg.window,
                message: msg.message,
                wparam: msg.wparam,
                lparam: msg.lparam,
                result: 0,
            }));
        }
        Ok(())
    }

    fn deliver_posted(&self, thread: ThreadId, msg: QueuedMessage) {
        if self.lock().hooked(thread, HookKind::GetMessage) {
            hook::dispatch(&RawHookMessage::GetMessage(msg));
        }

        // Default window procedure
        if msg.message == messages::WM_CLOSE && !msg.window.is_null() {
            if let Err(e) = self.destroy_window(msg.window) {
                debug!("Close of {} ignored: {}", msg.window, e);
            }
        }
    }
}

impl WindowPlatform for HeadlessPlatform {
    fn current_thread(&self) -> ThreadId {
        current_thread_id()
    }

    fn desktop_window(&self) -> WindowHandle {
        DESKTOP_WINDOW
    }

    fn style(&self, window: WindowHandle) -> PlatformResult<WindowStyle> {
        Ok(self.lock().window(window)?.style)
    }

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> PlatformResult<()> {
        self.lock().window_mut(window)?.style = style;
        Ok(())
    }

    fn style_ex(&self, window: WindowHandle) -> PlatformResult<WindowStyleEx> {
        Ok(self.lock().window(window)?.style_ex)
    }

    fn parent(&self, window: WindowHandle) -> PlatformResult<Option<WindowHandle>> {
        Ok(self.lock().window(window)?.parent)
    }

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> PlatformResult<()> {
        let mut state = self.lock();
        if !state.windows.contains_key(&parent) && parent != DESKTOP_WINDOW {
            return Err(PlatformError::InvalidWindow(parent));
        }
        state.window_mut(window)?.parent = Some(parent);
        Ok(())
    }

    fn window_rect(&self, window: WindowHandle) -> PlatformResult<Rect> {
        Ok(self.lock().window(window)?.bounds)
    }

    fn move_window(&self, window: WindowHandle, bounds: Rect, _repaint: bool) -> PlatformResult<()> {
        let resized = {
            let mut state = self.lock();
            let w = state.window_mut(window)?;
            let resized = w.bounds.size() != bounds.size();
            w.bounds = bounds;
            resized
        };

        if resized {
            let lparam = (bounds.width() & 0xffff) as isize | (((bounds.height() & 0xffff) as isize) << 16);
            self.send_message(window, messages::WM_SIZE, 0, lparam)?;
        }
        Ok(())
    }

    fn notify_frame_changed(&self, window: WindowHandle) -> PlatformResult<()> {
        self.lock().window_mut(window)?.frame_changes += 1;
        Ok(())
    }

    fn post_close(&self, window: WindowHandle) -> PlatformResult<()> {
        let owner = {
            let mut state = self.lock();
            let owner = state.window(window)?.thread;
            state.close_requests.push(window);
            owner
        };

        self.enqueue(
            owner,
            Queued::Posted(QueuedMessage {
                window,
                message: messages::WM_CLOSE,
                wparam: 0,
                lparam: 0,
            }),
        );
        Ok(())
    }

    fn install_hook(&self, thread: ThreadId, kind: HookKind) -> PlatformResult<HookId> {
        let mut state = self.lock();
        state.next_hook += 1;
        let hook = HookId(state.next_hook);
        state.hooks.insert(hook, (thread, kind));
        Ok(hook)
    }

    fn remove_hook(&self, hook: HookId) -> PlatformResult<()> {
        match self.lock().hooks.remove(&hook) {
            Some(_) => Ok(()),
            None => Err(PlatformError::CallFailed {
                op: "remove_hook",
                code: -1,
            }),
        }
    }

    fn wake_message(&self) -> u32 {
        WAKE_MESSAGE
    }

    fn wake(&self, thread: ThreadId) -> PlatformResult<()> {
        self.enqueue(
            thread,
            Queued::Posted(QueuedMessage {
                window: WindowHandle::NULL,
                message: WAKE_MESSAGE,
                wparam: 0,
                lparam: 0,
            }),
        );
        Ok(())
    }
}
