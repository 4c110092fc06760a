//! Hook Module
//!
//! Window Event Interceptor. Per-thread message hooks deliver raw messages
//! on the hooked thread; this module decodes them into `WindowEvent`s and
//! routes them to the subscribers registered on that same thread.
//!
//! Delivery is synchronous and interleaved with the hosted program's own
//! message processing, so handlers must never block.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{PlatformError, PlatformResult};
use crate::host::platform::{HookId, WindowPlatform};
use crate::shared::{ThreadId, WindowHandle};

/// Window message identifiers consumed by the interceptor
pub mod messages {
    pub const WM_DESTROY: u32 = 0x0002;
    pub const WM_SIZE: u32 = 0x0005;
    pub const WM_CLOSE: u32 = 0x0010;
    pub const WM_SHOWWINDOW: u32 = 0x0018;
    pub const WM_APP: u32 = 0x8000;
}

/// Hook classes the interceptor installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Before the window procedure sees a sent message
    CallWndProc,
    /// After the window procedure processed a sent message
    CallWndProcRet,
    /// Posted messages retrieved from the thread queue
    GetMessage,
}

/// Parameters of a sent message, before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWndProcMessage {
    pub window: WindowHandle,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// Parameters of a sent message, after dispatch, with the procedure's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWndProcRetMessage {
    pub window: WindowHandle,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
    pub result: isize,
}

/// A message removed from the thread queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedMessage {
    pub window: WindowHandle,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHookMessage {
    CallWndProc(CallWndProcMessage),
    CallWndProcRet(CallWndProcRetMessage),
    GetMessage(QueuedMessage),
}

impl RawHookMessage {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::CallWndProc(_) => HookKind::CallWndProc,
            Self::CallWndProcRet(_) => HookKind::CallWndProcRet,
            Self::GetMessage(_) => HookKind::GetMessage,
        }
    }
}

/// Decoded window lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Window is becoming visible
    Shown(WindowHandle),
    /// Window processed a size change
    Resized { window: WindowHandle, result: isize },
    /// Window processed its destroy notification
    Destroyed { window: WindowHandle, result: isize },
    /// The owning thread queued work for the hosted thread
    Wake,
}

/// Decode a raw hook message. Messages the host does not care about yield `None`.
pub fn decode(raw: &RawHookMessage, wake_message: u32) -> Option<WindowEvent> {
    match raw {
        RawHookMessage::CallWndProc(msg) => match msg.message {
            // wParam is zero when the window is being hidden
            messages::WM_SHOWWINDOW if msg.wparam != 0 => Some(WindowEvent::Shown(msg.window)),
            _ => None,
        },
        RawHookMessage::CallWndProcRet(msg) => match msg.message {
            messages::WM_DESTROY => Some(WindowEvent::Destroyed {
                window: msg.window,
                result: msg.result,
            }),
            messages::WM_SIZE => Some(WindowEvent::Resized {
                window: msg.window,
                result: msg.result,
            }),
            _ => None,
        },
        RawHookMessage::GetMessage(msg) => {
            if msg.window.is_null() && msg.message == wake_message {
                Some(WindowEvent::Wake)
            } else {
                None
            }
        }
    }
}

struct SinkEntry {
    id: u64,
    kind: HookKind,
    active: Cell<bool>,
    callback: Box<dyn Fn(&RawHookMessage)>,
}

static NEXT_SINK: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SINKS: RefCell<Vec<Rc<SinkEntry>>> = const { RefCell::new(Vec::new()) };
}

/// Route a raw message to the subscribers of the calling thread.
///
/// Called by platform hook procedures. Re-entrant: a subscriber may cause
/// further messages to be dispatched before it returns.
pub fn dispatch(raw: &RawHookMessage) {
    let kind = raw.kind();
    let sinks: Vec<Rc<SinkEntry>> = SINKS.with(|sinks| {
        sinks
            .borrow()
            .iter()
            .filter(|sink| sink.kind == kind)
            .cloned()
            .collect()
    });

    for sink in sinks {
        // Checked per call: an earlier subscriber may have unsubscribed this one
        if sink.active.get() {
            (sink.callback)(raw);
        }
    }
}

/// Number of live subscribers on the calling thread
pub fn subscriber_count() -> usize {
    SINKS.with(|sinks| sinks.borrow().len())
}

/// One installed hook and its thread-local subscriber
///
/// Not `Send`: it must be released on the thread it was created on.
/// Dropping it unsubscribes.
pub struct Subscription {
    platform: Arc<dyn WindowPlatform>,
    hook: Option<HookId>,
    entry: Rc<SinkEntry>,
}

impl Subscription {
    /// Subscribe the calling thread to `kind` messages.
    pub fn new(
        platform: Arc<dyn WindowPlatform>,
        thread: ThreadId,
        kind: HookKind,
        callback: impl Fn(&RawHookMessage) + 'static,
    ) -> PlatformResult<Self> {
        if platform.current_thread() != thread {
            return Err(PlatformError::Unsupported("cross-thread hook subscription"));
        }

        let entry = Rc::new(SinkEntry {
            id: NEXT_SINK.fetch_add(1, Ordering::Relaxed),
            kind,
            active: Cell::new(true),
            callback: Box::new(callback),
        });
        SINKS.with(|sinks| sinks.borrow_mut().push(entry.clone()));

        let hook = match platform.install_hook(thread, kind) {
            Ok(hook) => hook,
            Err(e) => {
                entry.active.set(false);
                SINKS.with(|sinks| sinks.borrow_mut().retain(|sink| sink.id != entry.id));
                return Err(e);
            }
        };

        debug!("Installed {:?} hook {:?} for thread {}", kind, hook, thread);

        Ok(Self {
            platform,
            hook: Some(hook),
            entry,
        })
    }

    pub fn kind(&self) -> HookKind {
        self.entry.kind
    }

    pub fn is_active(&self) -> bool {
        self.hook.is_some()
    }

    /// Stop delivery and remove the hook. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        let Some(hook) = self.hook.take() else {
            return;
        };

        // Deactivate before unhooking so in-flight dispatches skip us
        self.entry.active.set(false);
        let id = self.entry.id;
        SINKS.with(|sinks| sinks.borrow_mut().retain(|sink| sink.id != id));

        if let Err(e) = self.platform.remove_hook(hook) {
            warn!("Failed to remove {:?} hook {:?}: {}", self.entry.kind, hook, e);
        } else {
            debug!("Removed {:?} hook {:?}", self.entry.kind, hook);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Delivers decoded window events for one thread
///
/// Holds the pre-dispatch, post-dispatch and queue hooks. Released
/// deterministically by `unsubscribe` or drop.
pub struct WindowEventInterceptor {
    subscriptions: Vec<Subscription>,
    thread: ThreadId,
}

impl WindowEventInterceptor {
    /// Subscribe to window events of `thread`, which must be the calling thread.
    pub fn subscribe(
        platform: Arc<dyn WindowPlatform>,
        thread: ThreadId,
        handler: impl Fn(WindowEvent) + 'static,
    ) -> PlatformResult<Self> {
        let handler: Rc<dyn Fn(WindowEvent)> = Rc::new(handler);
        let wake_message = platform.wake_message();

        let mut subscriptions = Vec::with_capacity(3);
        for kind in [HookKind::CallWndProc, HookKind::CallWndProcRet, HookKind::GetMessage] {
            let handler = handler.clone();
            // Earlier subscriptions are released by drop on error
            let subscription = Subscription::new(platform.clone(), thread, kind, move |raw| {
                if let Some(event) = decode(raw, wake_message) {
                    handler(event);
                }
            })?;
            subscriptions.push(subscription);
        }

        Ok(Self { subscriptions, thread })
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn is_active(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }

    /// Stop all delivery. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
