//! Registry Module
//!
//! Authoritative map from window handle to the filter that claimed it (or
//! `None` for windows that matched nothing), plus the mutation gate that
//! defers registry changes while a bulk operation walks the map.

use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::host::chain::FilterId;
use crate::shared::WindowHandle;

/// A registry change, applied directly or replayed from the backlog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationLog {
    Add(WindowHandle, Option<FilterId>),
    Remove(WindowHandle),
}

/// Tracked windows of one hosted run
///
/// While suspended, `add` and `remove` are queued and replayed in order by
/// the `resume` that brings the depth back to zero.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: BTreeMap<WindowHandle, Option<FilterId>>,
    suspend_depth: usize,
    backlog: Vec<MutationLog>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, window: WindowHandle, filter: Option<FilterId>) {
        self.register(MutationLog::Add(window, filter));
    }

    pub fn remove(&mut self, window: WindowHandle) {
        self.register(MutationLog::Remove(window));
    }

    /// Apply `entry` now, or queue it while suspended.
    pub fn register(&mut self, entry: MutationLog) {
        if self.suspend_depth > 0 {
            debug!("Deferred {:?} (depth {})", entry, self.suspend_depth);
            self.backlog.push(entry);
        } else {
            self.apply(entry);
        }
    }

    pub fn suspend(&mut self) {
        self.suspend_depth += 1;
        debug!("Suspended window mutation (depth {})", self.suspend_depth);
    }

    /// Leave one suspension level; the outermost one replays the backlog.
    pub fn resume(&mut self) {
        if self.suspend_depth == 0 {
            warn!("resume() without matching suspend()");
            return;
        }

        self.suspend_depth -= 1;
        debug!("Resumed window mutation (depth {})", self.suspend_depth);

        if self.suspend_depth == 0 && !self.backlog.is_empty() {
            let backlog = std::mem::take(&mut self.backlog);
            debug!("Replaying {} deferred window changes", backlog.len());
            for entry in backlog {
                self.apply(entry);
            }
        }
    }

    pub fn suspend_depth(&self) -> usize {
        self.suspend_depth
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }

    pub fn backlog(&self) -> &[MutationLog] {
        &self.backlog
    }

    /// Committed entry for `window`: `None` if untracked, `Some(None)` if
    /// tracked but unmatched.
    pub fn get(&self, window: WindowHandle) -> Option<Option<FilterId>> {
        self.windows.get(&window).copied()
    }

    pub fn contains(&self, window: WindowHandle) -> bool {
        self.windows.contains_key(&window)
    }

    /// Entry for `window` as it will be once the backlog is replayed.
    pub fn effective(&self, window: WindowHandle) -> Option<Option<FilterId>> {
        for entry in self.backlog.iter().rev() {
            match *entry {
                MutationLog::Add(w, filter) if w == window => return Some(filter),
                MutationLog::Remove(w) if w == window => return None,
                _ => {}
            }
        }
        self.get(window)
    }

    /// Whether `window` has been seen and not destroyed, counting deferred changes
    pub fn is_known(&self, window: WindowHandle) -> bool {
        self.effective(window).is_some()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WindowHandle, Option<FilterId>)> + '_ {
        self.windows.iter().map(|(window, filter)| (*window, *filter))
    }

    /// Committed windows that matched a filter, in handle order
    pub fn classified(&self) -> Vec<(WindowHandle, FilterId)> {
        self.windows
            .iter()
            .filter_map(|(window, filter)| filter.map(|id| (*window, id)))
            .collect()
    }

    fn apply(&mut self, entry: MutationLog) {
        match entry {
            MutationLog::Add(window, filter) => {
                debug!("Registered window {} -> {:?}", window, filter);
                self.windows.insert(window, filter);
            }
            MutationLog::Remove(window) => {
                if self.windows.remove(&window).is_some() {
                    debug!("Unregistered window {}", window);
                }
            }
        }
    }
}

/// Suspends registry mutation for its lifetime
///
/// Borrows the registry only to suspend and resume, so the guarded work may
/// freely re-enter the registry. Resume happens on every exit path,
/// including unwinding.
pub struct MutationScope<'a> {
    registry: &'a RefCell<WindowRegistry>,
}

impl<'a> MutationScope<'a> {
    pub fn new(registry: &'a RefCell<WindowRegistry>) -> Self {
        registry.borrow_mut().suspend();
        Self { registry }
    }
}

impl Drop for MutationScope<'_> {
    fn drop(&mut self) {
        match self.registry.try_borrow_mut() {
            Ok(mut registry) => registry.resume(),
            Err(_) => warn!("Window registry busy while leaving mutation scope"),
        }
    }
}
