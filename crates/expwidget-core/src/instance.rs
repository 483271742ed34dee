//! Single active widget per page.

use std::cell::RefCell;
use thiserror::Error;

/// Why [`InstanceSlot::install_with`] did not install a widget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError<E> {
    /// A widget is already active
    #[error("a widget is already active on this page")]
    AlreadyActive,
    /// The widget could not be created
    #[error("widget initialization failed: {0}")]
    Failed(E),
}

/// Holds at most one active widget.
#[derive(Debug)]
pub struct InstanceSlot<W> {
    active: RefCell<Option<W>>,
}

impl<W> Default for InstanceSlot<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> InstanceSlot<W> {
    /// Empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: RefCell::new(None),
        }
    }

    /// Create and install a widget unless one is already active.
    ///
    /// `create` is not called when the slot is occupied.
    pub fn install_with<E, F>(&self, create: F) -> Result<(), InstallError<E>>
    where
        F: FnOnce() -> Result<W, E>,
    {
        if self.is_active() {
            return Err(InstallError::AlreadyActive);
        }
        let widget = create().map_err(InstallError::Failed)?;

        let mut active = self.active.borrow_mut();
        if active.is_some() {
            return Err(InstallError::AlreadyActive);
        }
        *active = Some(widget);
        Ok(())
    }

    /// Run `f` against the active widget.
    pub fn with<R>(&self, f: impl FnOnce(&W) -> R) -> Option<R> {
        self.active.borrow().as_ref().map(f)
    }

    /// Remove the active widget, leaving the slot empty.
    pub fn take(&self) -> Option<W> {
        self.active.borrow_mut().take()
    }

    /// Whether a widget is installed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.borrow().is_some()
    }
}
