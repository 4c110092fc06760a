//! Win32 Platform
//!
//! `WindowPlatform` over user32: thread-scoped `WH_CALLWNDPROC`,
//! `WH_CALLWNDPROCRET` and `WH_GETMESSAGE` hooks feeding
//! `crate::host::hook::dispatch`, plus the window style, parent and
//! geometry calls the filters need.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use windows::Win32::Foundation::{BOOL, HINSTANCE, HWND, LPARAM, LRESULT, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::ScreenToClient;
use windows::Win32::System::Com::{COINIT_APARTMENTTHREADED, CoInitializeEx};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CWPRETSTRUCT, CWPSTRUCT, CallNextHookEx, GWL_EXSTYLE, GWL_STYLE, GetDesktopWindow, GetParent, GetWindowLongW,
    GetWindowRect, HHOOK, IsWindow, MSG, MoveWindow, PM_REMOVE, PostMessageW, PostThreadMessageW,
    RegisterWindowMessageW, SWP_FRAMECHANGED, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SetParent, SetWindowLongW,
    SetWindowPos, SetWindowsHookExW, UnhookWindowsHookEx, WH_CALLWNDPROC, WH_CALLWNDPROCRET, WH_GETMESSAGE,
    WINDOWS_HOOK_ID, WM_CLOSE,
};
use windows::core::w;

use crate::error::{PlatformError, PlatformResult};
use crate::host::hook::{self, CallWndProcMessage, CallWndProcRetMessage, HookKind, QueuedMessage, RawHookMessage};
use crate::host::panic_message;
use crate::host::platform::{HookId, WindowPlatform};
use crate::host::style::{WindowStyle, WindowStyleEx};
use crate::shared::{Rect, ThreadId, WindowHandle};

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.raw() as *mut _)
}

fn handle(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

fn call_failed(op: &'static str, e: windows::core::Error) -> PlatformError {
    PlatformError::CallFailed { op, code: e.code().0 }
}

/// Hand a hooked message to the interceptors. Nothing may unwind out of a
/// hook procedure, so a panicking subscriber is logged and dropped here.
fn dispatch_from_hook(raw: RawHookMessage) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook::dispatch(&raw))) {
        warn!("Window event subscriber panicked: {}", panic_message(panic.as_ref()));
    }
}

unsafe extern "system" fn call_wnd_proc(code: i32, wp: WPARAM, lp: LPARAM) -> LRESULT {
    if code >= 0 {
        let cwp = unsafe { &*(lp.0 as *const CWPSTRUCT) };
        dispatch_from_hook(RawHookMessage::CallWndProc(CallWndProcMessage {
            window: handle(cwp.hwnd),
            message: cwp.message,
            wparam: cwp.wParam.0,
            lparam: cwp.lParam.0,
        }));
    }
    unsafe { CallNextHookEx(HHOOK::default(), code, wp, lp) }
}

unsafe extern "system" fn call_wnd_proc_ret(code: i32, wp: WPARAM, lp: LPARAM) -> LRESULT {
    if code >= 0 {
        let cwp = unsafe { &*(lp.0 as *const CWPRETSTRUCT) };
        dispatch_from_hook(RawHookMessage::CallWndProcRet(CallWndProcRetMessage {
            window: handle(cwp.hwnd),
            message: cwp.message,
            wparam: cwp.wParam.0,
            lparam: cwp.lParam.0,
            result: cwp.lResult.0,
        }));
    }
    unsafe { CallNextHookEx(HHOOK::default(), code, wp, lp) }
}

unsafe extern "system" fn get_message(code: i32, wp: WPARAM, lp: LPARAM) -> LRESULT {
    // Peeked messages stay queued and show up again; report removal only
    if code >= 0 && wp.0 == PM_REMOVE.0 as usize {
        let msg = unsafe { &*(lp.0 as *const MSG) };
        dispatch_from_hook(RawHookMessage::GetMessage(QueuedMessage {
            window: handle(msg.hwnd),
            message: msg.message,
            wparam: msg.wParam.0,
            lparam: msg.lParam.0,
        }));
    }
    unsafe { CallNextHookEx(HHOOK::default(), code, wp, lp) }
}

/// user32 backed `WindowPlatform`
pub struct Win32Platform {
    hooks: Mutex<HashMap<HookId, isize>>,
    next_hook: AtomicUsize,
    wake_message: u32,
}

impl Win32Platform {
    pub fn new() -> PlatformResult<Self> {
        let wake_message = unsafe { RegisterWindowMessageW(w!("AppHost.WakeHostedThread")) };
        if wake_message == 0 {
            return Err(PlatformError::CallFailed {
                op: "RegisterWindowMessageW",
                code: windows::core::Error::from_win32().code().0,
            });
        }

        Ok(Self {
            hooks: Mutex::new(HashMap::new()),
            next_hook: AtomicUsize::new(1),
            wake_message,
        })
    }

    fn verify(&self, window: WindowHandle) -> PlatformResult<HWND> {
        let hwnd = hwnd(window);
        if unsafe { IsWindow(hwnd) }.as_bool() {
            Ok(hwnd)
        } else {
            Err(PlatformError::InvalidWindow(window))
        }
    }
}

impl WindowPlatform for Win32Platform {
    fn current_thread(&self) -> ThreadId {
        ThreadId(unsafe { GetCurrentThreadId() })
    }

    /// Hosted UI code expects a single-threaded apartment
    fn prepare_thread(&self) -> PlatformResult<()> {
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
            .ok()
            .map_err(|e| call_failed("CoInitializeEx", e))
    }

    fn desktop_window(&self) -> WindowHandle {
        handle(unsafe { GetDesktopWindow() })
    }

    fn style(&self, window: WindowHandle) -> PlatformResult<WindowStyle> {
        let hwnd = self.verify(window)?;
        let bits = unsafe { GetWindowLongW(hwnd, GWL_STYLE) };
        Ok(WindowStyle::from_bits_retain(bits as u32))
    }

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> PlatformResult<()> {
        let hwnd = self.verify(window)?;
        unsafe { SetWindowLongW(hwnd, GWL_STYLE, style.bits() as i32) };
        Ok(())
    }

    fn style_ex(&self, window: WindowHandle) -> PlatformResult<WindowStyleEx> {
        let hwnd = self.verify(window)?;
        let bits = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) };
        Ok(WindowStyleEx::from_bits_retain(bits as u32))
    }

    /// Parent for child windows, owner for owned pop-ups and dialogs
    fn parent(&self, window: WindowHandle) -> PlatformResult<Option<WindowHandle>> {
        let hwnd = self.verify(window)?;
        Ok(match unsafe { GetParent(hwnd) } {
            Ok(parent) if !parent.is_invalid() => Some(handle(parent)),
            _ => None,
        })
    }

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> PlatformResult<()> {
        let hwnd = self.verify(window)?;
        unsafe { SetParent(hwnd, self::hwnd(parent)) }
            .map(|_| ())
            .map_err(|e| call_failed("SetParent", e))
    }

    /// Bounds in the parent's client coordinates
    fn window_rect(&self, window: WindowHandle) -> PlatformResult<Rect> {
        let hwnd = self.verify(window)?;
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd, &mut rect) }.map_err(|e| call_failed("GetWindowRect", e))?;

        let mut origin = POINT {
            x: rect.left,
            y: rect.top,
        };
        let parent = unsafe { GetAncestor(hwnd, GA_PARENT) };
        if !parent.is_invalid() && parent != unsafe { GetDesktopWindow() } {
            let _ = unsafe { ScreenToClient(parent, &mut origin) };
        }

        Ok(Rect::new(origin.x, origin.y, rect.right - rect.left, rect.bottom - rect.top))
    }

    fn move_window(&self, window: WindowHandle, bounds: Rect, repaint: bool) -> PlatformResult<()> {
        let hwnd = self.verify(window)?;
        unsafe {
            MoveWindow(
                hwnd,
                bounds.left,
                bounds.top,
                bounds.width(),
                bounds.height(),
                BOOL::from(repaint),
            )
        }
        .map_err(|e| call_failed("MoveWindow", e))
    }

    fn notify_frame_changed(&self, window: WindowHandle) -> PlatformResult<()> {
        let hwnd = self.verify(window)?;
        unsafe {
            SetWindowPos(
                hwnd,
                HWND::default(),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_FRAMECHANGED,
            )
        }
        .map_err(|e| call_failed("SetWindowPos", e))
    }

    fn post_close(&self, window: WindowHandle) -> PlatformResult<()> {
        let hwnd = self.verify(window)?;
        unsafe { PostMessageW(hwnd, WM_CLOSE, WPARAM(0), LPARAM(0)) }.map_err(|e| call_failed("PostMessageW", e))
    }

    fn install_hook(&self, thread: ThreadId, kind: HookKind) -> PlatformResult<HookId> {
        let (id, proc): (WINDOWS_HOOK_ID, unsafe extern "system" fn(i32, WPARAM, LPARAM) -> LRESULT) = match kind {
            HookKind::CallWndProc => (WH_CALLWNDPROC, call_wnd_proc),
            HookKind::CallWndProcRet => (WH_CALLWNDPROCRET, call_wnd_proc_ret),
            HookKind::GetMessage => (WH_GETMESSAGE, get_message),
        };

        let hhook = unsafe { SetWindowsHookExW(id, Some(proc), HINSTANCE::default(), thread.0) }
            .map_err(|e| call_failed("SetWindowsHookExW", e))?;

        let hook = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(hook, hhook.0 as isize);
        debug!("SetWindowsHookExW({:?}) for thread {} -> {:?}", kind, thread, hook);
        Ok(hook)
    }

    fn remove_hook(&self, hook: HookId) -> PlatformResult<()> {
        let raw = self
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&hook);

        let Some(raw) = raw else {
            warn!("Hook {:?} is not installed", hook);
            return Err(PlatformError::CallFailed {
                op: "UnhookWindowsHookEx",
                code: -1,
            });
        };

        unsafe { UnhookWindowsHookEx(HHOOK(raw as *mut _)) }.map_err(|e| call_failed("UnhookWindowsHookEx", e))
    }

    fn wake_message(&self) -> u32 {
        self.wake_message
    }

    fn wake(&self, thread: ThreadId) -> PlatformResult<()> {
        unsafe { PostThreadMessageW(thread.0, self.wake_message, WPARAM(0), LPARAM(0)) }
            .map_err(|e| call_failed("PostThreadMessageW", e))
    }
}
