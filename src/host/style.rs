//! Window Style Flags
//!
//! Bitfield flags for native window style and extended style bits, as read
//! from and written back to the window by the platform.

use bitflags::bitflags;

bitflags! {
    /// Window style bits (`GWL_STYLE`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WindowStyle: u32 {
        const OVERLAPPED        = 0x0000_0000;
        const MAXIMIZE_BOX      = 0x0001_0000;
        const TAB_STOP          = 0x0001_0000;
        const MINIMIZE_BOX      = 0x0002_0000;
        const GROUP             = 0x0002_0000;
        const SIZE_FRAME        = 0x0004_0000;
        const THICK_FRAME       = 0x0004_0000;
        const SYSTEM_MENU       = 0x0008_0000;
        const HORIZONTAL_SCROLL = 0x0010_0000;
        const VERTICAL_SCROLL   = 0x0020_0000;
        const DIALOG_FRAME      = 0x0040_0000;
        const BORDER            = 0x0080_0000;
        /// Title bar; includes `BORDER`
        const CAPTION           = 0x00c0_0000;
        const MAXIMIZE          = 0x0100_0000;
        const CLIP_CHILDREN     = 0x0200_0000;
        const CLIP_SIBLINGS     = 0x0400_0000;
        const DISABLED          = 0x0800_0000;
        const VISIBLE           = 0x1000_0000;
        const MINIMIZE          = 0x2000_0000;
        const CHILD             = 0x4000_0000;
        const POPUP             = 0x8000_0000;
    }
}

impl WindowStyle {
    /// Standard top-level application frame
    pub fn overlapped_window() -> Self {
        Self::CAPTION | Self::SYSTEM_MENU | Self::SIZE_FRAME | Self::MINIMIZE_BOX | Self::MAXIMIZE_BOX
    }

    pub fn popup_window() -> Self {
        Self::POPUP | Self::BORDER | Self::SYSTEM_MENU
    }

    /// Decoration removed from main windows when they are maximized into the host
    pub fn chrome() -> Self {
        Self::CAPTION | Self::SIZE_FRAME
    }
}

bitflags! {
    /// Extended window style bits (`GWL_EXSTYLE`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WindowStyleEx: u32 {
        const DLG_MODAL_FRAME  = 0x0000_0001;
        const NO_PARENT_NOTIFY = 0x0000_0004;
        const TOPMOST          = 0x0000_0008;
        const ACCEPT_FILES     = 0x0000_0010;
        const TRANSPARENT      = 0x0000_0020;
        const MDI_CHILD        = 0x0000_0040;
        const TOOL_WINDOW      = 0x0000_0080;
        const WINDOW_EDGE      = 0x0000_0100;
        const CLIENT_EDGE      = 0x0000_0200;
        const CONTEXT_HELP     = 0x0000_0400;
        const RIGHT            = 0x0000_1000;
        const RTL_READING      = 0x0000_2000;
        const LEFT_SCROLLBAR   = 0x0000_4000;
        const CONTROL_PARENT   = 0x0001_0000;
        const STATIC_EDGE      = 0x0002_0000;
        /// Forces a top-level window onto the taskbar when visible
        const APP_WINDOW       = 0x0004_0000;
        const LAYERED          = 0x0008_0000;
        const NO_INHERIT_LAYOUT = 0x0010_0000;
        const LAYOUT_RTL       = 0x0040_0000;
        const COMPOSITED       = 0x0200_0000;
        const NO_ACTIVATE      = 0x0800_0000;
    }
}
