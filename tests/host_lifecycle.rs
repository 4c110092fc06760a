//! End-to-end hosting on the headless platform

use anyhow::bail;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use apphost::host::{
    Container, FilterContext, HookId, ProgramDomain, WindowFilter, WindowPlatform, WindowStyle, WindowStyleEx,
};
use apphost::host::hook::HookKind;
use apphost::platform::{HeadlessPlatform, WindowSpec};
use apphost::shared::{Rect, Size, ThreadId, WindowHandle};
use apphost::{AppHost, HostError, HostState, PlatformResult, RunOutcome};

const ENTRY: &str = "apps/editor/editor.exe";

struct Windows {
    main: WindowHandle,
    splash: WindowHandle,
    dialog: WindowHandle,
    tool: WindowHandle,
}

/// Claims tool windows, even parented ones
struct ToolWindowFilter;

impl WindowFilter for ToolWindowFilter {
    fn name(&self) -> &str {
        "tool-window"
    }

    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::TOOL_WINDOW
    }

    fn resize(&self, _cx: &FilterContext<'_>, _window: WindowHandle) -> PlatformResult<()> {
        Ok(())
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A program that opens its windows and pumps until its main window is gone
fn register_editor(domain: &ProgramDomain, platform: &Arc<HeadlessPlatform>) -> Arc<Mutex<Option<Windows>>> {
    let shown = Arc::new(Mutex::new(None));
    let platform = platform.clone();
    let published = shown.clone();

    domain.register(ENTRY, move || {
        let main = platform.create_window(
            WindowSpec::new(WindowStyle::overlapped_window(), WindowStyleEx::APP_WINDOW)
                .bounds(Rect::new(40, 40, 640, 480)),
        );
        let splash = platform.create_window(
            WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::APP_WINDOW).bounds(Rect::new(0, 0, 200, 100)),
        );
        let dialog = platform.create_window(
            WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::empty()).bounds(Rect::new(10, 10, 300, 200)),
        );
        let tool = platform.create_window(WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::TOOL_WINDOW));

        for window in [main, splash, dialog, tool] {
            platform.show_window(window)?;
        }
        *published.lock().unwrap() = Some(Windows { main, splash, dialog, tool });

        while platform.exists(main) {
            platform.pump_wait(Duration::from_millis(5));
        }
        for window in [splash, dialog, tool] {
            if platform.exists(window) {
                platform.destroy_window(window)?;
            }
        }
        Ok(())
    });

    shown
}

fn new_host(platform: &Arc<HeadlessPlatform>, domain: &Arc<ProgramDomain>) -> (AppHost, WindowHandle) {
    let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
    let host = AppHost::new(platform.clone(), domain.clone(), Container::new(container, Size::new(800, 600)));
    (host, container)
}

fn take_windows(shown: &Arc<Mutex<Option<Windows>>>) -> Windows {
    wait_until("hosted windows", || shown.lock().unwrap().is_some());
    shown.lock().unwrap().take().unwrap()
}

#[tokio::test]
async fn test_hosted_windows_embedded_resized_and_closed() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    let shown = register_editor(&domain, &platform);
    let (mut host, container) = new_host(&platform, &domain);
    host.filters_mut().push(Arc::new(ToolWindowFilter)).unwrap();

    let closed = Arc::new(Mutex::new(Vec::new()));
    {
        let closed = closed.clone();
        host.on_application_closed(move |outcome| closed.lock().unwrap().push(outcome.clone()));
    }

    host.start(ENTRY).unwrap();
    assert_eq!(host.state(), HostState::Running);
    let w = take_windows(&shown);

    assert_eq!(platform.parent(w.main).unwrap(), Some(container));
    assert_eq!(platform.parent(w.splash).unwrap(), Some(container));
    assert_eq!(platform.parent(w.tool).unwrap(), Some(container));
    assert_eq!(platform.parent(w.dialog).unwrap(), None);

    host.resize_container(Size::new(1024, 768));
    wait_until("main window maximized", || {
        platform.window_rect(w.main).unwrap() == Rect::new(0, 0, 1024, 768)
    });
    wait_until("splash centered", || {
        platform.window_rect(w.splash).unwrap() == Rect::new(412, 334, 200, 100)
    });
    assert!(!platform.style(w.main).unwrap().intersects(WindowStyle::chrome()));
    assert_eq!(platform.window_rect(w.dialog).unwrap(), Rect::new(10, 10, 300, 200));

    host.close();
    let outcome = tokio::time::timeout(Duration::from_secs(5), host.wait_for_exit())
        .await
        .unwrap();

    assert_eq!(outcome, Some(RunOutcome::Completed));
    assert_eq!(host.state(), HostState::Closed);
    assert_eq!(domain.loaded_contexts(), 0);
    assert_eq!(*closed.lock().unwrap(), vec![RunOutcome::Completed]);

    let mut requested = platform.close_requests();
    requested.sort();
    let mut expected = vec![w.main, w.splash, w.tool];
    expected.sort();
    assert_eq!(requested, expected);
    assert!(!platform.exists(w.dialog));
}

#[tokio::test]
async fn test_second_start_and_late_filter_changes_rejected() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    let shown = register_editor(&domain, &platform);
    let (mut host, _) = new_host(&platform, &domain);

    host.start(ENTRY).unwrap();
    let w = take_windows(&shown);

    assert!(matches!(host.start(ENTRY), Err(HostError::AlreadyStarted)));
    assert!(matches!(
        host.filters_mut().push(Arc::new(ToolWindowFilter)),
        Err(HostError::FiltersFrozen)
    ));
    assert!(host.filters().is_empty());
    assert_eq!(domain.loaded_contexts(), 1);

    // The tool window was not claimed: the filter was rejected
    assert_eq!(platform.parent(w.tool).unwrap(), None);

    host.close();
    host.wait_for_exit().await;
    assert!(matches!(host.start(ENTRY), Err(HostError::AlreadyStarted)));
    assert_eq!(host.state(), HostState::Closed);
}

#[tokio::test]
async fn test_faulted_program_reports_completion_and_unloads() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    domain.register("broken.exe", || bail!("missing resource file"));
    domain.register("panics.exe", || panic!("index out of bounds"));

    for (entry, reason) in [("broken.exe", "missing resource file"), ("panics.exe", "index out of bounds")] {
        let (mut host, _) = new_host(&platform, &domain);
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            host.on_application_closed(move |outcome| *seen.lock().unwrap() = Some(outcome.clone()));
        }

        host.start(entry).unwrap();
        let outcome = host.wait_for_exit().await.unwrap();

        assert!(outcome.is_faulted());
        assert_eq!(outcome, RunOutcome::Faulted(reason.to_string()));
        assert_eq!(*seen.lock().unwrap(), Some(outcome));
        assert_eq!(host.state(), HostState::Closed);
    }

    assert_eq!(domain.loaded_contexts(), 0);
}

#[test]
fn test_dropping_running_host_requests_close() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    let shown = register_editor(&domain, &platform);
    let (mut host, _) = new_host(&platform, &domain);

    host.start(ENTRY).unwrap();
    let w = take_windows(&shown);
    drop(host);

    wait_until("hosted program exit", || !platform.exists(w.main) && !platform.exists(w.dialog));
    assert!(platform.close_requests().contains(&w.main));
}

#[test]
fn test_dialogs_captured_when_enabled() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    let shown = register_editor(&domain, &platform);
    let (mut host, container) = new_host(&platform, &domain);
    host.capture_mut().dialogs = true;
    host.capture_mut().maximize_main_windows = false;

    host.start(ENTRY).unwrap();
    let w = take_windows(&shown);
    assert_eq!(platform.parent(w.dialog).unwrap(), Some(container));

    // Changing the configuration of a running host has no effect
    host.capture_mut().maximize_main_windows = true;
    host.resize_container(Size::new(800, 600));
    wait_until("dialog centered", || {
        platform.window_rect(w.dialog).unwrap() == Rect::new(250, 200, 300, 200)
    });
    assert_eq!(platform.window_rect(w.main).unwrap(), Rect::new(40, 40, 640, 480));

    host.close();
    wait_until("completion", || host.poll_completion().is_some());
    assert_eq!(host.outcome(), Some(&RunOutcome::Completed));
}

/// Tool-window filter whose resize always panics
struct BrokenResizeFilter;

impl WindowFilter for BrokenResizeFilter {
    fn name(&self) -> &str {
        "broken-resize"
    }

    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::TOOL_WINDOW
    }

    fn resize(&self, _cx: &FilterContext<'_>, _window: WindowHandle) -> PlatformResult<()> {
        panic!("custom filter bug");
    }
}

#[tokio::test]
async fn test_panicking_filter_leaves_other_windows_managed() {
    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    let shown = register_editor(&domain, &platform);
    let (mut host, container) = new_host(&platform, &domain);
    host.filters_mut().push(Arc::new(BrokenResizeFilter)).unwrap();

    host.start(ENTRY).unwrap();
    let w = take_windows(&shown);
    assert_eq!(platform.parent(w.tool).unwrap(), Some(container));

    host.resize_container(Size::new(800, 600));
    wait_until("splash centered", || {
        platform.window_rect(w.splash).unwrap() == Rect::new(300, 250, 200, 100)
    });
    wait_until("main window maximized", || {
        platform.window_rect(w.main).unwrap() == Rect::new(0, 0, 800, 600)
    });

    host.close();
    let outcome = tokio::time::timeout(Duration::from_secs(5), host.wait_for_exit())
        .await
        .unwrap();
    assert_eq!(outcome, Some(RunOutcome::Completed));
    assert!(platform.close_requests().contains(&w.tool));
}

/// Holds the hosted thread in `prepare_thread` until released, so commands
/// can be queued before it subscribes
struct GatedPlatform {
    inner: Arc<HeadlessPlatform>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl WindowPlatform for GatedPlatform {
    fn current_thread(&self) -> ThreadId {
        self.inner.current_thread()
    }

    fn prepare_thread(&self) -> PlatformResult<()> {
        let _ = self.gate.lock().unwrap().recv();
        self.inner.prepare_thread()
    }

    fn desktop_window(&self) -> WindowHandle {
        self.inner.desktop_window()
    }

    fn style(&self, window: WindowHandle) -> PlatformResult<WindowStyle> {
        self.inner.style(window)
    }

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> PlatformResult<()> {
        self.inner.set_style(window, style)
    }

    fn style_ex(&self, window: WindowHandle) -> PlatformResult<WindowStyleEx> {
        self.inner.style_ex(window)
    }

    fn parent(&self, window: WindowHandle) -> PlatformResult<Option<WindowHandle>> {
        self.inner.parent(window)
    }

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> PlatformResult<()> {
        self.inner.set_parent(window, parent)
    }

    fn window_rect(&self, window: WindowHandle) -> PlatformResult<Rect> {
        self.inner.window_rect(window)
    }

    fn move_window(&self, window: WindowHandle, bounds: Rect, repaint: bool) -> PlatformResult<()> {
        self.inner.move_window(window, bounds, repaint)
    }

    fn notify_frame_changed(&self, window: WindowHandle) -> PlatformResult<()> {
        self.inner.notify_frame_changed(window)
    }

    fn post_close(&self, window: WindowHandle) -> PlatformResult<()> {
        self.inner.post_close(window)
    }

    fn install_hook(&self, thread: ThreadId, kind: HookKind) -> PlatformResult<HookId> {
        self.inner.install_hook(thread, kind)
    }

    fn remove_hook(&self, hook: HookId) -> PlatformResult<()> {
        self.inner.remove_hook(hook)
    }

    fn wake_message(&self) -> u32 {
        self.inner.wake_message()
    }

    fn wake(&self, thread: ThreadId) -> PlatformResult<()> {
        self.inner.wake(thread)
    }
}

/// Records the container size each attached tool window was embedded at
struct AttachSizeRecorder(Arc<Mutex<Vec<Size>>>);

impl WindowFilter for AttachSizeRecorder {
    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::TOOL_WINDOW
    }

    fn attach(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        self.0.lock().unwrap().push(cx.container.size);
        cx.platform.set_parent(window, cx.container.handle)
    }
}

#[tokio::test]
async fn test_resize_queued_before_subscription_is_applied_first() {
    let inner = Arc::new(HeadlessPlatform::new());
    let (release, gate) = mpsc::channel();
    let platform = Arc::new(GatedPlatform {
        inner: inner.clone(),
        gate: Mutex::new(gate),
    });

    let domain = Arc::new(ProgramDomain::new());
    {
        let inner = inner.clone();
        domain.register("palette.exe", move || {
            let tool = inner.create_window(WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::TOOL_WINDOW));
            inner.show_window(tool)?;
            while inner.exists(tool) {
                inner.pump_wait(Duration::from_millis(5));
            }
            Ok(())
        });
    }

    let container = inner.create_window(WindowSpec::container(Size::new(800, 600)));
    let mut host = AppHost::new(platform.clone(), domain.clone(), Container::new(container, Size::new(800, 600)));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    host.filters_mut().push(Arc::new(AttachSizeRecorder(sizes.clone()))).unwrap();

    host.start("palette.exe").unwrap();
    host.resize_container(Size::new(400, 300));

    // Not subscribed yet, so nothing could have woken the hosted thread
    assert_eq!(host.hosted_thread(), None);
    release.send(()).unwrap();

    wait_until("tool window attached", || !sizes.lock().unwrap().is_empty());
    assert_eq!(*sizes.lock().unwrap(), vec![Size::new(400, 300)]);

    host.close();
    let outcome = tokio::time::timeout(Duration::from_secs(5), host.wait_for_exit())
        .await
        .unwrap();
    assert_eq!(outcome, Some(RunOutcome::Completed));
}
