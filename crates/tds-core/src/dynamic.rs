//! Prepared (dynamic) statements.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::result::ResultHandle;

#[derive(Debug, Default)]
struct DynamicState {
    num_id: i32,
    query: Option<String>,
    params: Option<ResultHandle>,
    res_info: Option<ResultHandle>,
    deallocated: bool,
    emulated: bool,
}

/// A server-side prepared statement.
pub struct DynamicStatement {
    id: String,
    state: Mutex<DynamicState>,
}

impl DynamicStatement {
    pub(crate) fn new(id: String, query: Option<&str>) -> Self {
        Self {
            id,
            state: Mutex::new(DynamicState {
                query: query.map(str::to_owned),
                ..DynamicState::default()
            }),
        }
    }

    pub(crate) fn result(&self) -> Option<ResultHandle> {
        self.state.lock().res_info.clone()
    }

    pub(crate) fn mark_deallocated(&self) {
        let mut state = self.state.lock();
        state.deallocated = true;
        state.num_id = 0;
    }

    pub(crate) fn detach_result(&self) {
        if let Some(result) = self.state.lock().res_info.as_ref() {
            result.detach();
        }
    }
}

impl Drop for DynamicStatement {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(result) = state.res_info.take() {
            result.detach();
        }
        state.params = None;
        state.query = None;
        tracing::debug!(id = %self.id, "dynamic statement freed");
    }
}

/// Shared handle to a [`DynamicStatement`].
///
/// The connection registry holds one reference and every handle another.
#[derive(Clone)]
pub struct DynamicHandle(pub(crate) Arc<DynamicStatement>);

impl DynamicHandle {
    /// Statement id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Numeric id assigned by the server.
    #[must_use]
    pub fn num_id(&self) -> i32 {
        self.0.state.lock().num_id
    }

    /// Record the server's numeric id.
    pub fn set_num_id(&self, num_id: i32) {
        self.0.state.lock().num_id = num_id;
    }

    /// Statement text.
    #[must_use]
    pub fn query(&self) -> Option<String> {
        self.0.state.lock().query.clone()
    }

    /// Replace the statement text.
    pub fn set_query(&self, query: impl Into<String>) {
        self.0.state.lock().query = Some(query.into());
    }

    /// Input parameters.
    #[must_use]
    pub fn params(&self) -> Option<ResultHandle> {
        self.0.state.lock().params.clone()
    }

    /// Replace the input parameters.
    pub fn set_params(&self, params: Option<ResultHandle>) {
        self.0.state.lock().params = params;
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

    /// Whether the server dropped the statement.
    #[must_use]
    pub fn is_deallocated(&self) -> bool {
        self.0.state.lock().deallocated
    }

    /// Whether execution is emulated client-side.
    #[must_use]
    pub fn is_emulated(&self) -> bool {
        self.0.state.lock().emulated
    }

    /// Mark execution as emulated client-side.
    pub fn set_emulated(&self, emulated: bool) {
        self.0.state.lock().emulated = emulated;
    }

    /// Number of live references, the registry's included.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Release this reference. Returns `true` if the statement was freed.
    pub fn release(self) -> bool {
        Arc::into_inner(self.0).is_some()
    }

    /// Whether both handles refer to the same statement.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DynamicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("DynamicHandle")
            .field("id", &self.0.id)
            .field("num_id", &state.num_id)
            .field("deallocated", &state.deallocated)
            .field("ref_count", &Arc::strong_count(&self.0))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let handle = DynamicHandle(Arc::new(DynamicStatement::new(
            "stmt1".to_string(),
            Some("select ?"),
        )));
        assert_eq!(handle.id(), "stmt1");
        assert_eq!(handle.query().as_deref(), Some("select ?"));
        handle.set_num_id(42);
        assert_eq!(handle.num_id(), 42);

        handle.0.mark_deallocated();
        assert!(handle.is_deallocated());
        assert_eq!(handle.num_id(), 0);
    }

    #[test]
    fn test_set_result_replaces() {
        let handle = DynamicHandle(Arc::new(DynamicStatement::new("s".to_string(), None)));
        let first = ResultHandle::new(1).unwrap();
        handle.set_result(Some(first.clone()));
        assert_eq!(first.ref_count(), 2);
        handle.set_result(None);
        assert_eq!(first.ref_count(), 1);
    }

    #[test]
    fn test_release_frees_last_reference() {
        let handle = DynamicHandle(Arc::new(DynamicStatement::new("s".to_string(), None)));
        let result = ResultHandle::new(1).unwrap();
        handle.set_result(Some(result.clone()));

        let second = handle.clone();
        assert!(!second.release());
        assert!(handle.release());
        assert_eq!(result.ref_count(), 1);
    }
}
