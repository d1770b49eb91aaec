//! Server-side cursors.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::result::ResultHandle;

/// Cursor scrolling model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CursorType {
    /// Keyset-driven.
    #[default]
    Keyset = 1,
    /// Dynamic.
    Dynamic = 2,
    /// Forward only.
    ForwardOnly = 4,
    /// Static (snapshot).
    Static = 8,
}

/// Cursor locking model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CursorConcurrency {
    /// No updates through the cursor.
    ReadOnly = 1,
    /// Scroll locks.
    Lock = 2,
    /// Optimistic, compared by row version.
    #[default]
    Optimistic = 4,
    /// Optimistic, compared by values.
    OptimisticValues = 8,
}

bitflags! {
    /// Which cursor operations have been sent or are pending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CursorStatus: u8 {
        /// Declared on the server.
        const DECLARED = 0x01;
        /// Row count option sent.
        const ROWS_SET = 0x02;
        /// Opened.
        const OPENED = 0x04;
        /// Fetch in progress.
        const FETCHING = 0x08;
        /// Closed.
        const CLOSED = 0x10;
        /// Deallocated.
        const DEALLOCATED = 0x20;
    }
}

#[derive(Debug, Default)]
struct CursorState {
    cursor_id: i32,
    query: Option<String>,
    cursor_type: CursorType,
    concurrency: CursorConcurrency,
    status: CursorStatus,
    cursor_rows: u32,
    res_info: Option<ResultHandle>,
    deallocated: bool,
}

/// A named server-side cursor.
pub struct Cursor {
    name: String,
    state: Mutex<CursorState>,
}

impl Cursor {
    pub(crate) fn new(name: String, query: Option<&str>) -> Self {
        Self {
            name,
            state: Mutex::new(CursorState {
                query: query.map(str::to_owned),
                cursor_rows: 1,
                ..CursorState::default()
            }),
        }
    }

    pub(crate) fn result(&self) -> Option<ResultHandle> {
        self.state.lock().res_info.clone()
    }

    pub(crate) fn mark_deallocated(&self) {
        let mut state = self.state.lock();
        state.deallocated = true;
        state.cursor_id = 0;
        state.status.insert(CursorStatus::DEALLOCATED);
    }

    pub(crate) fn detach_result(&self) {
        if let Some(result) = self.state.lock().res_info.as_ref() {
            result.detach();
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(result) = self.state.get_mut().res_info.take() {
            result.detach();
        }
        tracing::debug!(name = %self.name, "cursor freed");
    }
}

/// Shared handle to a [`Cursor`].
#[derive(Clone)]
pub struct CursorHandle(pub(crate) Arc<Cursor>);

impl CursorHandle {
    /// Cursor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Server cursor id.
    #[must_use]
    pub fn cursor_id(&self) -> i32 {
        self.0.state.lock().cursor_id
    }

    /// Record the server cursor id.
    pub fn set_cursor_id(&self, id: i32) {
        self.0.state.lock().cursor_id = id;
    }

    /// Query text.
    #[must_use]
    pub fn query(&self) -> Option<String> {
        self.0.state.lock().query.clone()
    }

    /// Scrolling model.
    #[must_use]
    pub fn cursor_type(&self) -> CursorType {
        self.0.state.lock().cursor_type
    }

    /// Locking model.
    #[must_use]
    pub fn concurrency(&self) -> CursorConcurrency {
        self.0.state.lock().concurrency
    }

    /// Set scrolling and locking models.
    pub fn set_options(&self, cursor_type: CursorType, concurrency: CursorConcurrency) {
        let mut state = self.0.state.lock();
        state.cursor_type = cursor_type;
        state.concurrency = concurrency;
    }

    /// Operation status.
    #[must_use]
    pub fn status(&self) -> CursorStatus {
        self.0.state.lock().status
    }

    /// Replace the operation status.
    pub fn set_status(&self, status: CursorStatus) {
        self.0.state.lock().status = status;
    }

    /// Rows per fetch.
    #[must_use]
    pub fn cursor_rows(&self) -> u32 {
        self.0.state.lock().cursor_rows
    }

    /// Set rows per fetch.
    pub fn set_cursor_rows(&self, rows: u32) {
        self.0.state.lock().cursor_rows = rows;
    }

    /// Result description.
    #[must_use]
    pub fn result(&self) -> Option<ResultHandle> {
        self.0.result()
    }

    /// Replace the result description, detaching the old one.
    pub fn set_result(&self, result: Option<ResultHandle>) {
        let old = std::mem::replace(&mut self.0.state.lock().res_info, result);
        if let Some(old) = old {
            old.detach();
        }
    }

    /// Whether the server dropped the cursor.
    #[must_use]
    pub fn is_deallocated(&self) -> bool {
        self.0.state.lock().deallocated
    }

    /// Number of live references, the registry's included.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Release this reference. Returns `true` if the cursor was freed.
    pub fn release(self) -> bool {
        Arc::into_inner(self.0).is_some()
    }

    /// Whether both handles refer to the same cursor.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("CursorHandle")
            .field("name", &self.0.name)
            .field("cursor_id", &state.cursor_id)
            .field("status", &state.status)
            .field("ref_count", &Arc::strong_count(&self.0))
            .finish()
    }
}
