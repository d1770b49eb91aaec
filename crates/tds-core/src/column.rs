//! Column descriptions and row buffers.
//!
//! A column's storage needs are resolved once, when its server type is set,
//! into a [`ColumnKind`]. Row layout code only ever asks the kind.

use tds_protocol::TypeId;

use crate::bcp::{BcpColumnData, ColumnBinding};
use crate::error::{Error, Result};

/// Every column's slot in a row buffer starts on this boundary.
pub const ROW_ALIGNMENT: usize = 8;

/// Row storage for decimal and numeric values.
pub const NUMERIC_ROW_SIZE: usize = 35;

/// Row storage for blob columns: a descriptor, the data lives out of line.
pub const BLOB_ROW_SIZE: usize = 16;

/// Extra room a `sql_variant` slot needs for its embedded type header.
pub const VARIANT_HEADER_SIZE: usize = 8;

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnKind {
    /// No type set yet. Unusable.
    #[default]
    Invalid,
    /// Fixed-width scalar.
    Fixed,
    /// Length-prefixed value held inline up to the declared size.
    Variable,
    /// Decimal or numeric.
    Numeric,
    /// Large object kept out of line.
    Blob,
    /// `sql_variant`.
    Variant,
}

impl ColumnKind {
    /// Storage class for a server type.
    #[must_use]
    pub fn for_type(ty: TypeId) -> Self {
        if ty.is_blob() {
            Self::Blob
        } else if ty.is_numeric() {
            Self::Numeric
        } else if ty.is_variant() {
            Self::Variant
        } else if ty.is_fixed_length() {
            Self::Fixed
        } else {
            Self::Variable
        }
    }

    /// Bytes a column of this kind and declared size takes in a row.
    #[must_use]
    pub fn row_len(self, size: usize) -> Option<usize> {
        match self {
            Self::Invalid => None,
            Self::Fixed | Self::Variable => Some(size),
            Self::Numeric => Some(NUMERIC_ROW_SIZE),
            Self::Blob => Some(BLOB_ROW_SIZE),
            Self::Variant => Some(size + VARIANT_HEADER_SIZE),
        }
    }

    /// Whether values live outside the row buffer.
    #[must_use]
    pub fn is_blob(self) -> bool {
        matches!(self, Self::Blob)
    }
}

/// Round `len` up to the next multiple of [`ROW_ALIGNMENT`].
#[must_use]
pub const fn align_row(len: usize) -> usize {
    (len + ROW_ALIGNMENT - 1) & !(ROW_ALIGNMENT - 1)
}

/// One result, parameter or bulk-copy column.
#[derive(Debug, Clone, Default)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Table the column belongs to, if the server said.
    pub table_name: String,
    /// Column name as it appears in the table.
    pub table_column_name: String,
    /// Declared size in bytes.
    pub size: usize,
    /// Precision for numeric types.
    pub precision: u8,
    /// Scale for numeric types.
    pub scale: u8,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this is an identity column.
    pub identity: bool,
    /// Whether the column may be updated.
    pub writeable: bool,
    /// Server user type.
    pub user_type: i32,
    /// Length of the current value, `None` for NULL.
    pub cur_size: Option<usize>,
    /// Bulk-copy client binding.
    pub binding: Option<ColumnBinding>,
    /// Bulk-copy transfer buffer.
    pub bcp_data: Option<BcpColumnData>,
    /// Bulk-copy field terminator.
    pub bcp_terminator: Option<Vec<u8>>,
    column_type: Option<TypeId>,
    kind: ColumnKind,
    offset: usize,
    param_data: Option<Vec<u8>>,
}

impl Column {
    /// An untyped column. [`Column::set_type`] must be called before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A typed column, mostly for building parameter and test stores.
    #[must_use]
    pub fn with_type(ty: TypeId, size: usize) -> Self {
        let mut column = Self::new();
        column.set_type(ty, size);
        column
    }

    /// Set the server type and declared size, resolving the storage kind.
    pub fn set_type(&mut self, ty: TypeId, size: usize) {
        self.column_type = Some(ty);
        self.size = ty.fixed_size().unwrap_or(size);
        self.kind = ColumnKind::for_type(ty);
    }

    /// Server type, if set.
    #[must_use]
    pub fn column_type(&self) -> Option<TypeId> {
        self.column_type
    }

    /// Storage kind.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Bytes this column needs in a row buffer, before alignment.
    pub fn row_len(&self) -> Result<usize> {
        self.kind
            .row_len(self.size)
            .ok_or(Error::InvalidColumnType)
    }

    /// Byte offset of this column inside the row buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Allocate a zeroed parameter value buffer sized for this column.
    pub fn alloc_param_data(&mut self) -> Result<&mut [u8]> {
        let len = self.row_len()?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::Allocation { requested: len })?;
        data.resize(len, 0);
        Ok(self.param_data.insert(data).as_mut_slice())
    }

    /// Parameter value buffer, if allocated.
    #[must_use]
    pub fn param_data(&self) -> Option<&[u8]> {
        self.param_data.as_deref()
    }

    /// Release the parameter value.
    pub fn free_param_data(&mut self) {
        self.param_data = None;
    }
}

/// A row buffer laid out by [`crate::ResultInfo::allocate_row`].
#[derive(Debug, Clone)]
pub struct Row {
    data: Vec<u8>,
    blobs: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub(crate) fn new(data: Vec<u8>, num_cols: usize) -> Self {
        Self {
            data,
            blobs: vec![None; num_cols],
        }
    }

    /// Buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty (never true for an allocated row).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Slot of `column` in the buffer.
    pub fn column_data(&self, column: &Column) -> Result<&[u8]> {
        let len = column.row_len()?;
        self.data
            .get(column.offset()..column.offset() + len)
            .ok_or(Error::NoRow)
    }

    /// Mutable slot of `column` in the buffer.
    pub fn column_data_mut(&mut self, column: &Column) -> Result<&mut [u8]> {
        let len = column.row_len()?;
        self.data
            .get_mut(column.offset()..column.offset() + len)
            .ok_or(Error::NoRow)
    }

    /// Out-of-line value of blob column `index`.
    #[must_use]
    pub fn blob(&self, index: usize) -> Option<&[u8]> {
        self.blobs.get(index)?.as_deref()
    }

    /// Store the out-of-line value of blob column `index`.
    pub fn set_blob(&mut self, index: usize, value: Vec<u8>) -> Result<()> {
        let slot = self.blobs.get_mut(index).ok_or(Error::OutOfRange {
            what: "column",
            value: index as i64,
        })?;
        *slot = Some(value);
        Ok(())
    }
}
