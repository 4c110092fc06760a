//! Shared types

pub mod window_state;

pub use window_state::{Rect, Size, ThreadId, WindowHandle};
