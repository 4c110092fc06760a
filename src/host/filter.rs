//! Filter Module
//!
//! Window classification filters. A filter decides whether a newly observed
//! window belongs to its category and, if so, how the host treats it:
//! attach (reparent into the container), resize and detach.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::PlatformResult;
use crate::host::platform::WindowPlatform;
use crate::host::style::{WindowStyle, WindowStyleEx};
use crate::shared::{Rect, Size, WindowHandle};

/// The host control windows are embedded into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container {
    pub handle: WindowHandle,
    /// Current client area size
    pub size: Size,
}

impl Container {
    pub fn new(handle: WindowHandle, size: Size) -> Self {
        Self { handle, size }
    }
}

/// What a filter action gets to work with
pub struct FilterContext<'a> {
    pub platform: &'a dyn WindowPlatform,
    pub container: Container,
}

/// Defines how a window created by the hosted program is treated
///
/// Implement this for windows the built-in filters don't handle correctly.
/// A filter must declare a style mask, an extended style mask or both;
/// a filter with neither never matches.
pub trait WindowFilter: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    /// Style bits that must all be set
    fn style(&self) -> WindowStyle {
        WindowStyle::empty()
    }

    /// Extended style bits that must all be set
    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::empty()
    }

    /// Only match windows without a structural parent
    fn require_unparented(&self) -> bool {
        true
    }

    fn is_well_formed(&self) -> bool {
        !self.style().is_empty() || !self.style_ex().is_empty()
    }

    fn matches(&self, platform: &dyn WindowPlatform, window: WindowHandle) -> PlatformResult<bool> {
        default_match(self, platform, window)
    }

    /// Reparents unparented windows into the container. Windows that
    /// already have a parent (some dialogs) are left alone.
    fn attach(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        if !is_parented(cx.platform, window)? {
            cx.platform.set_parent(window, cx.container.handle)?;
        }
        Ok(())
    }

    fn detach(&self, _cx: &FilterContext<'_>, _window: WindowHandle) -> PlatformResult<()> {
        Ok(())
    }

    /// Called for every attached window when the container or the window
    /// itself is resized.
    fn resize(&self, _cx: &FilterContext<'_>, _window: WindowHandle) -> PlatformResult<()> {
        Ok(())
    }
}

/// Mask based match shared by every filter
pub fn default_match<F: WindowFilter + ?Sized>(
    filter: &F,
    platform: &dyn WindowPlatform,
    window: WindowHandle,
) -> PlatformResult<bool> {
    let mask = filter.style();
    let mask_ex = filter.style_ex();

    // Guard against catch-all filters
    if mask.is_empty() && mask_ex.is_empty() {
        return Ok(false);
    }

    if filter.require_unparented() && is_parented(platform, window)? {
        return Ok(false);
    }

    if !mask.is_empty() && !platform.style(window)?.contains(mask) {
        return Ok(false);
    }

    if !mask_ex.is_empty() && !platform.style_ex(window)?.contains(mask_ex) {
        return Ok(false);
    }

    Ok(true)
}

static DESKTOP_WINDOW: OnceLock<WindowHandle> = OnceLock::new();

/// Desktop root, resolved on first use
pub fn desktop_window(platform: &dyn WindowPlatform) -> WindowHandle {
    *DESKTOP_WINDOW.get_or_init(|| platform.desktop_window())
}

/// Whether `window` has a parent other than the desktop root
pub fn is_parented(platform: &dyn WindowPlatform, window: WindowHandle) -> PlatformResult<bool> {
    Ok(match platform.parent(window)? {
        Some(parent) => !parent.is_null() && parent != desktop_window(platform),
        None => false,
    })
}

/// Center `window` inside an area of `size`, keeping its own dimensions.
pub fn center_window(platform: &dyn WindowPlatform, window: WindowHandle, size: Size) -> PlatformResult<()> {
    let bounds = platform.window_rect(window)?;
    let width = bounds.width();
    let height = bounds.height();

    platform.move_window(
        window,
        Rect::new(
            size.width.saturating_sub(width) / 2,
            size.height.saturating_sub(height) / 2,
            width,
            height,
        ),
        true,
    )
}

/// Resize `window` to exactly fill an area of `size` at the origin.
pub fn maximize_window(platform: &dyn WindowPlatform, window: WindowHandle, size: Size) -> PlatformResult<()> {
    platform.move_window(window, Rect::new(0, 0, size.width, size.height), true)
}

/// Top-level application windows: caption, sizing frame, on the taskbar
#[derive(Debug, Clone, Copy)]
pub struct MainWindowFilter {
    maximize: bool,
}

impl MainWindowFilter {
    pub fn new(maximize: bool) -> Self {
        Self { maximize }
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }
}

impl WindowFilter for MainWindowFilter {
    fn name(&self) -> &str {
        "main-window"
    }

    fn style(&self) -> WindowStyle {
        WindowStyle::CAPTION | WindowStyle::SIZE_FRAME
    }

    /// Captioned, resizable frames only count as main windows when they
    /// are also application windows
    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::APP_WINDOW
    }

    fn attach(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        cx.platform.set_parent(window, cx.container.handle)
    }

    /// Main windows are never centered; only the maximize case is handled,
    /// and only for windows that allow maximizing.
    fn resize(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        let style = cx.platform.style(window)?;

        if !self.maximize || !style.contains(WindowStyle::MAXIMIZE_BOX) {
            return Ok(());
        }

        if style.intersects(WindowStyle::chrome()) {
            debug!("Removing chrome from main window {}", window);
            cx.platform.set_style(window, style - WindowStyle::chrome())?;
            cx.platform.notify_frame_changed(window)?;
        }

        maximize_window(cx.platform, window, cx.container.size)
    }
}

/// Popups such as splash screens: on the taskbar, often without a frame
#[derive(Debug, Clone, Copy, Default)]
pub struct PopupWindowFilter;

impl WindowFilter for PopupWindowFilter {
    fn name(&self) -> &str {
        "popup-window"
    }

    fn style_ex(&self) -> WindowStyleEx {
        WindowStyleEx::APP_WINDOW
    }

    fn resize(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        center_window(cx.platform, window, cx.container.size)
    }
}

/// Dialogs: anything with a caption
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogWindowFilter;

impl WindowFilter for DialogWindowFilter {
    fn name(&self) -> &str {
        "dialog-window"
    }

    fn style(&self) -> WindowStyle {
        WindowStyle::CAPTION
    }

    fn resize(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        center_window(cx.platform, window, cx.container.size)
    }
}

/// A filter in a frozen chain, dispatched on its kind
#[derive(Clone)]
pub enum Filter {
    Main(MainWindowFilter),
    Popup(PopupWindowFilter),
    Dialog(DialogWindowFilter),
    Custom(Arc<dyn WindowFilter>),
}

impl Filter {
    pub fn behavior(&self) -> &dyn WindowFilter {
        match self {
            Self::Main(filter) => filter as &dyn WindowFilter,
            Self::Popup(filter) => filter as &dyn WindowFilter,
            Self::Dialog(filter) => filter as &dyn WindowFilter,
            Self::Custom(filter) => filter.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        self.behavior().name()
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    pub fn matches(&self, platform: &dyn WindowPlatform, window: WindowHandle) -> PlatformResult<bool> {
        self.behavior().matches(platform, window)
    }

    pub fn attach(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        self.behavior().attach(cx, window)
    }

    pub fn detach(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        self.behavior().detach(cx, window)
    }

    pub fn resize(&self, cx: &FilterContext<'_>, window: WindowHandle) -> PlatformResult<()> {
        self.behavior().resize(cx, window)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main(filter) => f.debug_tuple("Main").field(&filter.maximize).finish(),
            Self::Popup(_) => f.write_str("Popup"),
            Self::Dialog(_) => f.write_str("Dialog"),
            Self::Custom(filter) => f.debug_tuple("Custom").field(&filter.name()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::{HeadlessPlatform, WindowSpec};

    struct NoMaskFilter;

    impl WindowFilter for NoMaskFilter {}

    struct ParentedToolFilter;

    impl WindowFilter for ParentedToolFilter {
        fn style_ex(&self) -> WindowStyleEx {
            WindowStyleEx::TOOL_WINDOW
        }

        fn require_unparented(&self) -> bool {
            false
        }
    }

    fn main_spec() -> WindowSpec {
        WindowSpec::new(WindowStyle::overlapped_window(), WindowStyleEx::APP_WINDOW)
            .bounds(Rect::new(50, 50, 640, 480))
    }

    fn context(platform: &HeadlessPlatform, container: WindowHandle) -> FilterContext<'_> {
        FilterContext {
            platform,
            container: Container::new(container, Size::new(800, 600)),
        }
    }

    #[test]
    fn test_filter_without_masks_never_matches() {
        let platform = HeadlessPlatform::new();
        let window = platform.create_window(main_spec());
        assert!(!NoMaskFilter.is_well_formed());
        assert!(!NoMaskFilter.matches(&platform, window).unwrap());
    }

    #[test]
    fn test_main_filter_requires_caption_frame_and_app_window() {
        let platform = HeadlessPlatform::new();
        let main = platform.create_window(main_spec());
        let no_frame = platform.create_window(WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::APP_WINDOW));
        let no_app = platform.create_window(WindowSpec::new(WindowStyle::overlapped_window(), WindowStyleEx::empty()));

        let filter = MainWindowFilter::new(true);
        assert!(filter.matches(&platform, main).unwrap());
        assert!(!filter.matches(&platform, no_frame).unwrap());
        assert!(!filter.matches(&platform, no_app).unwrap());
    }

    #[test]
    fn test_parented_window_is_rejected_unless_allowed() {
        let platform = HeadlessPlatform::new();
        let owner = platform.create_window(main_spec());
        let tool = platform.create_window(
            WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::TOOL_WINDOW).parent(owner),
        );

        assert!(!DialogWindowFilter.matches(&platform, tool).unwrap());
        assert!(ParentedToolFilter.matches(&platform, tool).unwrap());
    }

    #[test]
    fn test_desktop_parent_counts_as_unparented() {
        let platform = HeadlessPlatform::new();
        let desktop = platform.desktop_window();
        let dialog = platform.create_window(WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::empty()).parent(desktop));
        assert!(!is_parented(&platform, dialog).unwrap());
        assert!(DialogWindowFilter.matches(&platform, dialog).unwrap());
    }

    #[test]
    fn test_default_attach_skips_parented_windows() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let owner = platform.create_window(main_spec());
        let dialog = platform.create_window(WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::empty()).parent(owner));
        let loose = platform.create_window(WindowSpec::new(WindowStyle::CAPTION, WindowStyleEx::empty()));

        let cx = context(&platform, container);
        DialogWindowFilter.attach(&cx, dialog).unwrap();
        DialogWindowFilter.attach(&cx, loose).unwrap();

        assert_eq!(platform.parent(dialog).unwrap(), Some(owner));
        assert_eq!(platform.parent(loose).unwrap(), Some(container));
    }

    #[test]
    fn test_default_detach_is_noop() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let window = platform.create_window(main_spec());
        let cx = context(&platform, container);

        PopupWindowFilter.detach(&cx, window).unwrap();
        PopupWindowFilter.detach(&cx, window).unwrap();
        assert_eq!(platform.parent(window).unwrap(), None);
    }

    #[test]
    fn test_main_filter_resize_strips_chrome_and_fills_container() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let window = platform.create_window(main_spec());
        let cx = context(&platform, container);

        let filter = MainWindowFilter::new(true);
        filter.attach(&cx, window).unwrap();
        filter.resize(&cx, window).unwrap();

        let style = platform.style(window).unwrap();
        assert!(!style.intersects(WindowStyle::chrome()));
        assert!(style.contains(WindowStyle::MAXIMIZE_BOX));
        assert_eq!(platform.frame_changes(window), 1);
        assert_eq!(platform.window_rect(window).unwrap(), Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn test_main_filter_resize_ignored_without_maximize() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let window = platform.create_window(main_spec());
        let fixed = platform.create_window(
            WindowSpec::new(WindowStyle::CAPTION | WindowStyle::SIZE_FRAME, WindowStyleEx::APP_WINDOW)
                .bounds(Rect::new(5, 5, 300, 200)),
        );
        let cx = context(&platform, container);

        MainWindowFilter::new(false).resize(&cx, window).unwrap();
        assert_eq!(platform.window_rect(window).unwrap(), Rect::new(50, 50, 640, 480));

        // No maximize box: left alone even when maximizing is on
        MainWindowFilter::new(true).resize(&cx, fixed).unwrap();
        assert_eq!(platform.window_rect(fixed).unwrap(), Rect::new(5, 5, 300, 200));
        assert!(platform.style(fixed).unwrap().contains(WindowStyle::CAPTION));
    }

    #[test]
    fn test_popup_resize_centers_window() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let splash = platform.create_window(
            WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::APP_WINDOW).bounds(Rect::new(0, 0, 200, 100)),
        );
        let cx = context(&platform, container);

        PopupWindowFilter.resize(&cx, splash).unwrap();
        assert_eq!(platform.window_rect(splash).unwrap(), Rect::new(300, 250, 200, 100));
    }

    #[test]
    fn test_center_handles_extreme_bounds() {
        let platform = HeadlessPlatform::new();
        let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
        let huge = platform.create_window(WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::APP_WINDOW).bounds(Rect {
            left: i32::MIN,
            top: 0,
            right: i32::MAX,
            bottom: 100,
        }));
        let cx = context(&platform, container);

        center_window(cx.platform, huge, cx.container.size).unwrap();
        let moved = platform.window_rect(huge).unwrap();
        assert_eq!(moved.width(), i32::MAX);
        assert_eq!(moved.left, 800i32.saturating_sub(i32::MAX) / 2);
        assert_eq!(moved.top, 250);
    }

    #[test]
    fn test_failed_query_is_reported_not_matched() {
        let platform = HeadlessPlatform::new();
        let gone = WindowHandle(0xdead);
        assert!(MainWindowFilter::new(true).matches(&platform, gone).is_err());
    }
}
