//! Result, parameter and compute stores.
//!
//! A [`ResultHandle`] is a shared, reference-counted [`ResultInfo`]. Cloning
//! the handle retains it; dropping or [`ResultHandle::release`] releases it.
//! A result may be attached to at most one session. The attachment is a pair
//! of weak back-references kept consistent by [`crate::Session::set_current_results`]
//! and [`ResultHandle::detach`].

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::column::{Column, Row, align_row};
use crate::error::{Error, Result};
use crate::session::SessionShared;

/// Columns plus the current row.
#[derive(Debug, Default)]
pub struct ResultInfo {
    /// Column descriptions, in result order.
    pub columns: Vec<Column>,
    /// `BY` columns of a compute result.
    pub by_cols: Vec<u16>,
    /// Compute id of a compute result.
    pub compute_id: u16,
    /// Whether at least one row has been read.
    pub rows_exist: bool,
    row_size: usize,
    current_row: Option<Row>,
}

impl ResultInfo {
    /// Store with `num_cols` untyped columns.
    pub fn with_columns(num_cols: usize) -> Result<Self> {
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(num_cols)
            .map_err(|_| Error::Allocation {
                requested: num_cols,
            })?;
        columns.resize_with(num_cols, Column::new);
        Ok(Self {
            columns,
            ..Self::default()
        })
    }

    /// Number of columns.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    /// Total row buffer size, 0 until a row is allocated.
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// The current row, if allocated.
    #[must_use]
    pub fn current_row(&self) -> Option<&Row> {
        self.current_row.as_ref()
    }

    /// Mutable current row, if allocated.
    pub fn current_row_mut(&mut self) -> Option<&mut Row> {
        self.current_row.as_mut()
    }

    /// Column `index` together with the current row.
    pub fn column_and_row_mut(&mut self, index: usize) -> Result<(&Column, &mut Row)> {
        let column = self.columns.get(index).ok_or(Error::OutOfRange {
            what: "column",
            value: index as i64,
        })?;
        let row = self.current_row.as_mut().ok_or(Error::NoRow)?;
        Ok((column, row))
    }

    /// Lay out and allocate the row buffer.
    ///
    /// Every column's slot is padded to [`crate::column::ROW_ALIGNMENT`].
    /// Offsets are only assigned once the buffer exists, so a failure
    /// leaves the store described but rowless. A store that already has a
    /// row keeps it.
    pub fn allocate_row(&mut self) -> Result<()> {
        if self.current_row.is_some() {
            return Ok(());
        }

        let mut offsets: SmallVec<[usize; 16]> = SmallVec::with_capacity(self.columns.len());
        let mut row_size = 0usize;
        for (index, column) in self.columns.iter().enumerate() {
            let len = column.row_len().inspect_err(|_| {
                tracing::debug!(column = index, "cannot lay out untyped column");
            })?;
            offsets.push(row_size);
            row_size += align_row(len);
        }

        let alloc_len = row_size.max(1);
        let mut data = Vec::new();
        data.try_reserve_exact(alloc_len)
            .map_err(|_| Error::Allocation {
                requested: alloc_len,
            })?;
        data.resize(alloc_len, 0);

        for (column, offset) in self.columns.iter_mut().zip(offsets) {
            column.set_offset(offset);
        }
        self.row_size = row_size;
        self.current_row = Some(Row::new(data, self.columns.len()));
        tracing::trace!(num_cols = self.columns.len(), row_size, "row allocated");
        Ok(())
    }

    /// Drop the row buffer and every column's out-of-line data.
    pub fn free_row(&mut self) {
        self.current_row = None;
        self.row_size = 0;
    }
}

pub(crate) struct ResultShared {
    info: Mutex<ResultInfo>,
    attached_to: Mutex<Option<Weak<SessionShared>>>,
}

impl ResultShared {
    pub(crate) fn attached_session(&self) -> Option<Arc<SessionShared>> {
        self.attached_to.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_attached(&self, session: Option<Weak<SessionShared>>) {
        *self.attached_to.lock() = session;
    }

    /// Clear the back-reference if it points at `session`.
    pub(crate) fn clear_attached_if(&self, session: *const SessionShared) {
        let mut attached = self.attached_to.lock();
        if attached.as_ref().is_some_and(|w| w.as_ptr() == session) {
            *attached = None;
        }
    }

    pub(crate) fn take_attached(&self) -> Option<Weak<SessionShared>> {
        self.attached_to.lock().take()
    }
}

impl Drop for ResultShared {
    fn drop(&mut self) {
        if let Some(session) = self.take_attached().and_then(|w| w.upgrade()) {
            session.clear_attachment_if(self as *const Self);
        }
    }
}

/// Shared handle to a [`ResultInfo`].
#[derive(Clone)]
pub struct ResultHandle(pub(crate) Arc<ResultShared>);

impl ResultHandle {
    /// New store with `num_cols` untyped columns.
    pub fn new(num_cols: usize) -> Result<Self> {
        Ok(Self::from_info(ResultInfo::with_columns(num_cols)?))
    }

    /// Wrap an existing store.
    #[must_use]
    pub fn from_info(info: ResultInfo) -> Self {
        Self(Arc::new(ResultShared {
            info: Mutex::new(info),
            attached_to: Mutex::new(None),
        }))
    }

    /// New compute store.
    pub fn new_compute(num_cols: usize, by_cols: &[u16]) -> Result<Self> {
        let mut info = ResultInfo::with_columns(num_cols)?;
        info.by_cols
            .try_reserve_exact(by_cols.len())
            .map_err(|_| Error::Allocation {
                requested: by_cols.len(),
            })?;
        info.by_cols.extend_from_slice(by_cols);
        Ok(Self::from_info(info))
    }

    /// Lock the store.
    pub fn lock(&self) -> MutexGuard<'_, ResultInfo> {
        self.0.info.lock()
    }

    /// Number of live handles.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Release this reference. Returns `true` if it was the last one and
    /// the store was freed.
    pub fn release(self) -> bool {
        let freed = Arc::into_inner(self.0).is_some();
        if freed {
            tracing::trace!("result released");
        }
        freed
    }

    /// Whether both handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Id of the session this store is attached to, if any.
    #[must_use]
    pub fn attached_sid(&self) -> Option<u16> {
        self.0.attached_session().map(|s| s.sid)
    }

    /// Whether the store is attached to some live session.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.0.attached_session().is_some()
    }

    /// Remove the attachment on both sides.
    pub fn detach(&self) {
        if let Some(session) = self.0.take_attached().and_then(|w| w.upgrade()) {
            session.clear_attachment_if(Arc::as_ptr(&self.0));
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ResultShared> {
        Arc::downgrade(&self.0)
    }
}

impl fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0.info.lock();
        f.debug_struct("ResultHandle")
            .field("num_cols", &info.num_cols())
            .field("row_size", &info.row_size)
            .field("has_row", &info.current_row.is_some())
            .field("ref_count", &Arc::strong_count(&self.0))
            .finish()
    }
}

/// Append one column to a parameter store, creating the store if needed.
///
/// Parameters carry no row data, so a store that already holds a row is
/// refused. On failure the caller's store is unchanged.
pub fn append_param_column(params: Option<&ResultHandle>) -> Result<ResultHandle> {
    let handle = match params {
        Some(existing) => existing.clone(),
        None => ResultHandle::new(0)?,
    };

    {
        let mut info = handle.lock();
        if info.current_row.is_some() {
            return Err(Error::ParamsHaveRow);
        }
        info.columns
            .try_reserve_exact(1)
            .map_err(|_| Error::Allocation { requested: 1 })?;
        info.columns.push(Column::new());
        tracing::trace!(num_params = info.columns.len(), "parameter column added");
    }
    Ok(handle)
}

/// Pop and release the last parameter column. No-op on an empty or absent
/// store.
pub fn remove_last_param_column(params: Option<&ResultHandle>) {
    let Some(params) = params else {
        return;
    };
    let mut info = params.lock();
    if let Some(mut column) = info.columns.pop() {
        column.free_param_data();
    }
    if info.columns.is_empty() {
        info.columns = Vec::new();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::TypeId;

    fn typed(sizes: &[(TypeId, usize)]) -> ResultHandle {
        let handle = ResultHandle::new(sizes.len()).unwrap();
        {
            let mut info = handle.lock();
            for (column, (ty, size)) in info.columns.iter_mut().zip(sizes) {
                column.set_type(*ty, *size);
            }
        }
        handle
    }

    #[test]
    fn test_row_layout_scenario() {
        let handle = typed(&[
            (TypeId::Binary, 4),
            (TypeId::Binary, 8),
            (TypeId::Binary, 2),
        ]);
        let mut info = handle.lock();
        info.allocate_row().unwrap();

        let offsets: Vec<_> = info.columns.iter().map(Column::offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(info.row_size(), 24);
        assert_eq!(info.current_row().unwrap().len(), 24);
    }

    #[test]
    fn test_empty_store_gets_one_byte_row() {
        let handle = ResultHandle::new(0).unwrap();
        let mut info = handle.lock();
        info.allocate_row().unwrap();
        assert_eq!(info.row_size(), 0);
        assert_eq!(info.current_row().unwrap().len(), 1);
    }

    #[test]
    fn test_untyped_column_fails_without_row() {
        let handle = ResultHandle::new(2).unwrap();
        let mut info = handle.lock();
        info.columns[0].set_type(TypeId::Int4, 4);
        assert!(matches!(info.allocate_row(), Err(Error::InvalidColumnType)));
        assert!(info.current_row().is_none());
        assert_eq!(info.row_size(), 0);
    }

    #[test]
    fn test_layout_fixed_after_allocation() {
        let handle = typed(&[(TypeId::Int4, 4), (TypeId::Int8, 8)]);
        let mut info = handle.lock();
        info.allocate_row().unwrap();
        info.columns[0].set_type(TypeId::BigChar, 100);
        info.allocate_row().unwrap();
        assert_eq!(info.columns[1].offset(), 8);
        assert_eq!(info.row_size(), 16);
    }

    #[test]
    fn test_append_param_column() {
        let params = append_param_column(None).unwrap();
        let same = append_param_column(Some(&params)).unwrap();
        assert!(params.ptr_eq(&same));
        assert_eq!(params.lock().num_cols(), 2);
    }

    #[test]
    fn test_append_param_column_refused_with_row() {
        let params = append_param_column(None).unwrap();
        params.lock().columns[0].set_type(TypeId::Int4, 4);
        params.lock().allocate_row().unwrap();

        assert!(matches!(
            append_param_column(Some(&params)),
            Err(Error::ParamsHaveRow)
        ));
        assert_eq!(params.lock().num_cols(), 1);
        assert_eq!(params.ref_count(), 1);
    }

    #[test]
    fn test_remove_last_param_column() {
        let params = append_param_column(None).unwrap();
        append_param_column(Some(&params)).unwrap();
        remove_last_param_column(Some(&params));
        assert_eq!(params.lock().num_cols(), 1);
        remove_last_param_column(Some(&params));
        remove_last_param_column(Some(&params));
        assert_eq!(params.lock().num_cols(), 0);
        remove_last_param_column(None);
    }

    #[test]
    fn test_release_counts() {
        let handle = ResultHandle::new(1).unwrap();
        let other = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        assert!(!other.release());
        assert_eq!(handle.ref_count(), 1);
        assert!(handle.release());
    }

    #[test]
    fn test_compute_store() {
        let handle = ResultHandle::new_compute(2, &[1, 3]).unwrap();
        let info = handle.lock();
        assert_eq!(info.num_cols(), 2);
        assert_eq!(info.by_cols, vec![1, 3]);
    }
}
