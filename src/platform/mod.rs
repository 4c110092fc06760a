//! Platform backends for the host
//!
//! `headless` keeps all window state in memory and runs everywhere; `win32`
//! drives real windows through user32 hooks.

pub mod headless;
#[cfg(windows)]
pub mod win32;

pub use headless::{HeadlessPlatform, WindowSpec};
#[cfg(windows)]
pub use win32::Win32Platform;
