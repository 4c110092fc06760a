//! Chain Module
//!
//! The user-supplied filter collection (mutable until the hosted run starts)
//! and the frozen chain evaluated for every new window.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::error::{HostError, HostResult};
use crate::host::filter::{DialogWindowFilter, Filter, MainWindowFilter, PopupWindowFilter, WindowFilter};
use crate::host::panic_message;
use crate::host::platform::WindowPlatform;
use crate::shared::WindowHandle;

/// Position of a filter in a frozen chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterId(pub usize);

/// Custom filters, evaluated after the built-in ones
///
/// Every mutator fails with `HostError::FiltersFrozen` once the hosted run
/// has started.
#[derive(Default)]
pub struct FilterCollection {
    filters: Vec<Arc<dyn WindowFilter>>,
    frozen: bool,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn WindowFilter>> {
        self.filters.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn WindowFilter>> {
        self.filters.iter()
    }

    pub fn push(&mut self, filter: Arc<dyn WindowFilter>) -> HostResult<()> {
        self.verify_not_frozen()?;
        Self::verify_well_formed(filter.as_ref())?;
        self.filters.push(filter);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, filter: Arc<dyn WindowFilter>) -> HostResult<()> {
        self.verify_not_frozen()?;
        if index > self.filters.len() {
            return Err(HostError::IndexOutOfRange {
                index,
                len: self.filters.len(),
            });
        }
        Self::verify_well_formed(filter.as_ref())?;
        self.filters.insert(index, filter);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> HostResult<Arc<dyn WindowFilter>> {
        self.verify_not_frozen()?;
        self.verify_index(index)?;
        Ok(self.filters.remove(index))
    }

    /// Replace the filter at `index`, returning the previous one.
    pub fn replace(&mut self, index: usize, filter: Arc<dyn WindowFilter>) -> HostResult<Arc<dyn WindowFilter>> {
        self.verify_not_frozen()?;
        self.verify_index(index)?;
        Self::verify_well_formed(filter.as_ref())?;
        Ok(std::mem::replace(&mut self.filters[index], filter))
    }

    pub fn clear(&mut self) -> HostResult<()> {
        self.verify_not_frozen()?;
        self.filters.clear();
        Ok(())
    }

    /// Freeze the collection; there is no way back.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    fn verify_not_frozen(&self) -> HostResult<()> {
        if self.frozen {
            warn!("Rejected filter change: hosted application is running");
            return Err(HostError::FiltersFrozen);
        }
        Ok(())
    }

    fn verify_index(&self, index: usize) -> HostResult<()> {
        if index >= self.filters.len() {
            return Err(HostError::IndexOutOfRange {
                index,
                len: self.filters.len(),
            });
        }
        Ok(())
    }

    fn verify_well_formed(filter: &dyn WindowFilter) -> HostResult<()> {
        if !filter.is_well_formed() {
            return Err(HostError::MalformedFilter {
                name: filter.name().to_string(),
            });
        }
        Ok(())
    }
}

/// Ordered filters for one hosted run. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    /// Built-in filters selected by `capture`, then the custom filters in
    /// their collection order.
    pub fn build(capture: &CaptureConfig, custom: &FilterCollection) -> Self {
        let mut filters = Vec::new();

        if capture.main_windows {
            filters.push(Filter::Main(MainWindowFilter::new(capture.maximize_main_windows)));
        }

        if capture.popup_windows {
            filters.push(Filter::Popup(PopupWindowFilter));
        }

        if capture.dialogs {
            filters.push(Filter::Dialog(DialogWindowFilter));
        }

        filters.extend(custom.iter().cloned().map(Filter::Custom));

        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, id: FilterId) -> Option<&Filter> {
        self.filters.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterId, &Filter)> {
        self.filters.iter().enumerate().map(|(i, filter)| (FilterId(i), filter))
    }

    /// Names in evaluation order, for logging
    pub fn describe(&self) -> Vec<&str> {
        self.filters.iter().map(Filter::name).collect()
    }

    /// The first filter, in chain order, that matches `window`.
    ///
    /// A filter whose platform queries fail, or that panics, is treated as
    /// not matching.
    pub fn evaluate(&self, platform: &dyn WindowPlatform, window: WindowHandle) -> Option<FilterId> {
        for (id, filter) in self.iter() {
            match catch_unwind(AssertUnwindSafe(|| filter.matches(platform, window))) {
                Ok(Ok(true)) => return Some(id),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    debug!("Filter {} could not inspect window {}: {}", filter.name(), window, e);
                }
                Err(panic) => {
                    warn!(
                        "Filter {} panicked matching window {}: {}",
                        filter.name(),
                        window,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        None
    }
}
