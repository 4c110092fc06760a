//! Platform Module
//!
//! The narrow windowing surface the host consumes: style bits, structural
//! parent, geometry, close requests and per-thread message hooks.
//! Implementations live under `crate::platform`.

use crate::error::PlatformResult;
use crate::host::hook::HookKind;
use crate::host::style::{WindowStyle, WindowStyleEx};
use crate::shared::{Rect, ThreadId, WindowHandle};

/// Identifier of an installed per-thread hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub usize);

/// Native windowing operations
///
/// Every call targets a single window and may fail independently; callers
/// treat failures as "leave that window alone", never as fatal.
pub trait WindowPlatform: Send + Sync {
    /// Native id of the calling thread
    fn current_thread(&self) -> ThreadId;

    /// Called first on the hosted thread, before any hook is installed.
    fn prepare_thread(&self) -> PlatformResult<()> {
        Ok(())
    }

    /// The desktop root window. Parenting to it counts as unparented.
    fn desktop_window(&self) -> WindowHandle;

    fn style(&self, window: WindowHandle) -> PlatformResult<WindowStyle>;

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> PlatformResult<()>;

    fn style_ex(&self, window: WindowHandle) -> PlatformResult<WindowStyleEx>;

    /// Parent of a child window or owner of an owned window, `None` for
    /// unowned top-level windows
    fn parent(&self, window: WindowHandle) -> PlatformResult<Option<WindowHandle>>;

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> PlatformResult<()>;

    fn window_rect(&self, window: WindowHandle) -> PlatformResult<Rect>;

    /// Move and resize in one call, in parent client coordinates
    fn move_window(&self, window: WindowHandle, bounds: Rect, repaint: bool) -> PlatformResult<()>;

    /// Tell the window its frame changed without moving, resizing,
    /// reordering or redrawing it.
    fn notify_frame_changed(&self, window: WindowHandle) -> PlatformResult<()>;

    /// Post a non-blocking close request
    fn post_close(&self, window: WindowHandle) -> PlatformResult<()>;

    /// Install a hook of `kind` for `thread`. Raw messages are handed to
    /// `crate::host::hook::dispatch` on that thread.
    fn install_hook(&self, thread: ThreadId, kind: HookKind) -> PlatformResult<HookId>;

    fn remove_hook(&self, hook: HookId) -> PlatformResult<()>;

    /// Thread message id used to wake the hosted thread
    fn wake_message(&self) -> u32;

    /// Post `wake_message` to `thread` so its message hook runs.
    fn wake(&self, thread: ThreadId) -> PlatformResult<()>;
}
