//! Valid/stale memoization slots for derived mesh quantities.
//!
//! Every lazily derived quantity on the mesh lives in its own [`Cached`]
//! slot. A slot is either *valid* (holds the computed value) or *stale*
//! (empty, recompute on next read). Mutation paths either [`invalidate`] the
//! slot wholesale or patch the held value in place via [`value_mut`] (the
//! edge-flip engine does the latter for the cheaply patchable arrays).
//!
//! [`invalidate`]: Cached::invalidate
//! [`value_mut`]: Cached::value_mut

#![forbid(unsafe_code)]

/// A derived quantity that is either valid or stale.
///
/// The usual read pattern is two-phase, so the computation can borrow the
/// rest of the owning struct freely:
///
/// ```rust,ignore
/// if !self.control_volumes.is_valid() {
///     let value = self.compute_control_volumes()?;
///     self.control_volumes.fill(value);
/// }
/// Ok(self.control_volumes.get())
/// ```
#[derive(Clone, Debug)]
pub(crate) struct Cached<T>(Option<T>);

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Cached<T> {
    /// A stale slot.
    pub(crate) const fn stale() -> Self {
        Self(None)
    }

    /// Whether the slot currently holds a value.
    pub(crate) const fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    /// Stores a freshly computed value, marking the slot valid.
    pub(crate) fn fill(&mut self, value: T) -> &mut T {
        self.0.insert(value)
    }

    /// Reads the held value.
    ///
    /// # Panics
    ///
    /// Panics if the slot is stale. Callers must check [`is_valid`] (or
    /// [`fill`] first); reading a stale slot is a bug in the mutation
    /// bookkeeping, not a recoverable condition.
    ///
    /// [`is_valid`]: Cached::is_valid
    /// [`fill`]: Cached::fill
    #[track_caller]
    pub(crate) fn get(&self) -> &T {
        self.0
            .as_ref()
            .expect("stale cache slot read; missing fill() on this path")
    }

    /// Mutable access to the held value.
    ///
    /// # Panics
    ///
    /// Panics if the slot is stale, like [`get`](Cached::get).
    #[track_caller]
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.0
            .as_mut()
            .expect("stale cache slot read; missing fill() on this path")
    }

    /// Mutable access to the held value for in-place patching, if any.
    pub(crate) fn value_mut(&mut self) -> Option<&mut T> {
        self.0.as_mut()
    }

    /// Marks the slot stale, dropping any held value.
    pub(crate) fn invalidate(&mut self) {
        self.0 = None;
    }
}
