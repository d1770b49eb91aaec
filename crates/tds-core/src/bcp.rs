//! Bulk copy.
//!
//! A [`BcpInfo`] holds the state of one bulk copy: direction, table, hints,
//! the table's column descriptions (with the caller's bindings hanging off
//! each column) and whether the transfer has started. Talking to the server
//! goes through [`BulkTransport`].
//!
//! Diagnostics are numbered (see [`Error::message_number`]) and reported to
//! the context's message handler as well as returned.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tds_protocol::{TdsVersion, TypeId};

use crate::column::Column;
use crate::context::Context;
use crate::convert::{BindType, client_to_server, server_to_client};
use crate::error::{Error, Result};
use crate::result::{ResultHandle, ResultInfo};

/// Length meaning "the string runs to its end".
pub const NULL_TERMINATED: i32 = -9;

/// Length or count meaning "not supplied".
pub const UNUSED: i32 = -99999;

/// Indicator value marking a NULL.
pub const NULL_INDICATOR: i16 = -1;

/// Table names: up to four dot-separated parts, bare, bracketed or quoted.
#[allow(clippy::unwrap_used)]
static TABLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\[[^\]]+\]|"[^"]+"|[#@A-Za-z_][\w@#$]*)(?:\.(?:\[[^\]]+\]|"[^"]+"|[#@A-Za-z_][\w@#$]*)?){0,3}$"#,
    )
    .unwrap()
});

/// Direction of a bulk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BcpDirection {
    /// Client to server.
    In = 1,
    /// Server to client.
    Out = 2,
}

impl BcpDirection {
    /// Parse a direction code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Self::In),
            2 => Ok(Self::Out),
            other => Err(Error::InvalidDirection(other)),
        }
    }
}

/// A caller's array binding for one column.
#[derive(Debug, Clone)]
pub struct ColumnBinding {
    /// Client type of the bound values.
    pub bind_type: BindType,
    /// Bytes per element for variable types, [`UNUSED`] for fixed types.
    pub max_length: i32,
    /// Rows in the bound arrays.
    pub count: usize,
    /// `count` elements, each [`ColumnBinding::stride`] bytes.
    pub data: Vec<u8>,
    /// Per-row value lengths. Missing means each value fills its element.
    pub lengths: Option<Vec<i32>>,
    /// Per-row indicators; [`NULL_INDICATOR`] marks a NULL.
    pub indicators: Option<Vec<i16>>,
}

impl ColumnBinding {
    /// Zeroed binding of `count` rows.
    #[must_use]
    pub fn new(bind_type: BindType, max_length: i32, count: usize) -> Self {
        let count = count.max(1);
        let mut binding = Self {
            bind_type,
            max_length,
            count,
            data: Vec::new(),
            lengths: None,
            indicators: None,
        };
        binding.data = vec![0; binding.stride() * count];
        binding
    }

    /// Keep per-row lengths.
    #[must_use]
    pub fn with_lengths(mut self) -> Self {
        self.lengths = Some(vec![0; self.count]);
        self
    }

    /// Keep per-row indicators.
    #[must_use]
    pub fn with_indicators(mut self) -> Self {
        self.indicators = Some(vec![0; self.count]);
        self
    }

    /// Bytes per element.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.bind_type
            .fixed_len()
            .unwrap_or_else(|| usize::try_from(self.max_length).unwrap_or(0))
    }

    /// Element `row`.
    #[must_use]
    pub fn element(&self, row: usize) -> Option<&[u8]> {
        let stride = self.stride();
        self.data.get(row * stride..(row + 1) * stride)
    }

    /// Store `value` as element `row`, recording its length.
    pub fn set_element(&mut self, row: usize, value: &[u8]) -> Result<()> {
        let stride = self.stride();
        let slot = self
            .data
            .get_mut(row * stride..(row + 1) * stride)
            .ok_or(Error::OutOfRange {
                what: "row",
                value: row as i64,
            })?;
        if value.len() > stride {
            return Err(Error::conversion(
                "bytes",
                format!("{:?}", self.bind_type),
                "value too long",
            ));
        }
        slot.fill(0);
        slot[..value.len()].copy_from_slice(value);
        if let Some(length) = self.lengths.as_mut().and_then(|l| l.get_mut(row)) {
            *length = value.len() as i32;
        }
        self.set_null(row, false);
        Ok(())
    }

    /// Mark element `row` NULL or not.
    pub fn set_null(&mut self, row: usize, null: bool) {
        if let Some(indicator) = self.indicators.as_mut().and_then(|i| i.get_mut(row)) {
            *indicator = if null { NULL_INDICATOR } else { 0 };
        }
        if null {
            if let Some(length) = self.lengths.as_mut().and_then(|l| l.get_mut(row)) {
                *length = 0;
            }
        }
    }

    /// Whether element `row`'s indicator marks it NULL.
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        self.indicators
            .as_ref()
            .and_then(|i| i.get(row))
            .is_some_and(|&i| i == NULL_INDICATOR)
    }

    /// Whether element `row` goes to the server as NULL: its indicator says
    /// so and no length was given for it.
    fn stages_null(&self, row: usize) -> bool {
        let declared = match self.lengths.as_ref().and_then(|l| l.get(row)).copied() {
            None => 0,
            Some(UNUSED) => self.bind_type.fixed_len().unwrap_or(0),
            Some(len) => usize::try_from(len).unwrap_or(0),
        };
        declared == 0 && self.is_null(row)
    }

    /// Length of element `row`'s value.
    fn source_len(&self, row: usize) -> usize {
        let supplied = self
            .lengths
            .as_ref()
            .and_then(|l| l.get(row))
            .copied()
            .filter(|&len| len != UNUSED);
        match (self.bind_type.fixed_len(), supplied) {
            (Some(fixed), _) => fixed,
            (None, Some(len)) => usize::try_from(len).unwrap_or(0).min(self.stride()),
            (None, None) => self.stride(),
        }
    }
}

/// Server-typed value staged for sending.
#[derive(Debug, Clone, Default)]
pub struct BcpColumnData {
    /// Encoded value.
    pub data: Vec<u8>,
    /// Bytes of `data` in use.
    pub datalen: usize,
    /// Whether the value is NULL.
    pub is_null: bool,
}

/// Column default kept for Sybase servers, which send defaults client-side.
#[derive(Debug, Clone, Default)]
pub struct SybaseColumnInfo {
    /// Column name.
    pub name: String,
    /// Encoded default value, if any.
    pub default_value: Option<Vec<u8>>,
}

/// Table description returned by [`BulkTransport::bcp_init`].
#[derive(Debug, Default)]
pub struct BcpTable {
    /// Column descriptions.
    pub columns: ResultInfo,
    /// Sybase column defaults.
    pub sybase_colinfo: Vec<SybaseColumnInfo>,
}

/// What [`BcpInfo::describe`] reports about a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Column name.
    pub name: String,
    /// Server type.
    pub column_type: Option<TypeId>,
    /// Declared size.
    pub max_length: usize,
    /// Precision.
    pub precision: u8,
    /// Scale.
    pub scale: u8,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this is an identity column.
    pub identity: bool,
}

/// Bulk-copy property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcpProperty {
    /// Send explicit identity values.
    Identity,
    /// Server hints.
    Hints,
}

/// Property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// Boolean property.
    Bool(bool),
    /// Text property.
    Text(Option<String>),
}

/// How much of the copy [`BcpInfo::done`] finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneKind {
    /// Commit the rows sent so far and continue.
    Batch,
    /// Finish the copy.
    All,
}

/// Outcome of [`BcpInfo::rowxfer`], with the rows handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferStatus {
    /// All requested rows were handled.
    Succeed(usize),
    /// No more data to copy out.
    EndData(usize),
    /// A row could not be transferred.
    RowFail(usize),
}

/// What the token layer found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenResult {
    /// A regular row.
    Row,
    /// A compute row.
    Compute,
    /// The reply is exhausted.
    NoMoreResults,
    /// Anything else.
    Other,
}

/// Server side of a bulk copy.
pub trait BulkTransport {
    /// Fetch the description of the target table.
    fn bcp_init(&mut self, bcp: &BcpInfo) -> Result<BcpTable>;

    /// Send the insert-bulk statement and wait for the go-ahead.
    fn start_copy_in(&mut self, bcp: &BcpInfo) -> Result<()>;

    /// Send one staged row.
    fn send_record(&mut self, bcp: &BcpInfo) -> Result<()>;

    /// Send a language query.
    fn submit_query(&mut self, query: &str) -> Result<()>;

    /// Consume tokens up to the next row or the end of the reply.
    fn process_tokens(&mut self) -> Result<TokenResult>;

    /// Results holding the row found by [`BulkTransport::process_tokens`].
    fn current_results(&self) -> Option<ResultHandle>;

    /// Finish the current batch, returning the rows the server took.
    fn bcp_done(&mut self) -> Result<u64>;

    /// Start a new batch.
    fn bcp_start(&mut self, bcp: &BcpInfo) -> Result<()>;
}

/// State of one bulk copy.
#[derive(Debug)]
pub struct BcpInfo {
    context: Arc<Context>,
    version: TdsVersion,
    direction: Option<BcpDirection>,
    table_name: String,
    hint: Option<String>,
    insert_stmt: Option<String>,
    identity_insert_on: bool,
    xfer_init: bool,
    row_pending: bool,
    bind_count: i32,
    bindinfo: Option<ResultInfo>,
    sybase_colinfo: Vec<SybaseColumnInfo>,
}

fn transfer_failed(err: Error) -> Error {
    match err {
        Error::Transfer(_) => err,
        other => Error::Transfer(other.to_string()),
    }
}

impl BcpInfo {
    /// Empty bulk-copy state for a connection speaking `version`.
    pub fn new(context: Arc<Context>, version: TdsVersion) -> Result<Self> {
        if !version.at_least(TdsVersion::V5_0) {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self {
            context,
            version,
            direction: None,
            table_name: String::new(),
            hint: None,
            insert_stmt: None,
            identity_insert_on: false,
            xfer_init: false,
            row_pending: false,
            bind_count: UNUSED,
            bindinfo: None,
            sybase_colinfo: Vec::new(),
        })
    }

    fn report(&self, routine: &'static str, err: Error) -> Error {
        self.context.report_error(routine, err)
    }

    /// Start a copy of `table_name` in `direction`.
    ///
    /// `name_len` is the number of bytes of `table_name` to use, or
    /// [`NULL_TERMINATED`] for all of it. Any earlier copy state is
    /// discarded.
    pub fn init(
        &mut self,
        transport: &mut dyn BulkTransport,
        direction: i32,
        table_name: Option<&str>,
        name_len: i32,
    ) -> Result<()> {
        const ROUTINE: &str = "blk_init";

        let direction =
            BcpDirection::from_code(direction).map_err(|e| self.report(ROUTINE, e))?;
        let table_name = table_name.ok_or(Error::MissingTableName).map_err(|e| self.report(ROUTINE, e))?;
        let name = match name_len {
            NULL_TERMINATED if !table_name.is_empty() => table_name,
            n if n > 0 => usize::try_from(n)
                .ok()
                .and_then(|n| table_name.get(..n))
                .ok_or(Error::InvalidNameLength(n))
                .map_err(|e| self.report(ROUTINE, e))?,
            n => return Err(self.report(ROUTINE, Error::InvalidNameLength(n))),
        };
        if !TABLE_NAME_RE.is_match(name) {
            return Err(self.report(ROUTINE, Error::InvalidIdentifier(name.to_string())));
        }

        self.deinit();
        self.table_name = name.to_string();
        self.direction = Some(direction);
        self.bind_count = UNUSED;
        self.xfer_init = false;
        self.row_pending = false;

        let table = transport
            .bcp_init(self)
            .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?;
        self.bindinfo = Some(table.columns);
        if self.version.is_sybase() {
            self.sybase_colinfo = table.sybase_colinfo;
        }
        tracing::debug!(
            table = %self.table_name,
            direction = ?direction,
            columns = self.num_cols(),
            "bulk copy initialised"
        );
        Ok(())
    }

    /// Release the table, hint, statement, column descriptions and
    /// Sybase column defaults.
    pub fn deinit(&mut self) {
        self.table_name.clear();
        self.hint = None;
        self.insert_stmt = None;
        self.bindinfo = None;
        self.sybase_colinfo.clear();
    }

    /// Direction, once initialised.
    #[must_use]
    pub fn direction(&self) -> Option<BcpDirection> {
        self.direction
    }

    /// Target table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Server hints.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Statement that started the copy in.
    #[must_use]
    pub fn insert_statement(&self) -> Option<&str> {
        self.insert_stmt.as_deref()
    }

    /// Whether explicit identity values are sent.
    #[must_use]
    pub fn identity_insert(&self) -> bool {
        self.identity_insert_on
    }

    /// Whether the transfer has started.
    #[must_use]
    pub fn transfer_started(&self) -> bool {
        self.xfer_init
    }

    /// Rows per binding, once something is bound.
    #[must_use]
    pub fn bind_count(&self) -> Option<usize> {
        usize::try_from(self.bind_count).ok()
    }

    /// Column descriptions with their bindings.
    #[must_use]
    pub fn columns(&self) -> Option<&ResultInfo> {
        self.bindinfo.as_ref()
    }

    /// Sybase column defaults.
    #[must_use]
    pub fn sybase_colinfo(&self) -> &[SybaseColumnInfo] {
        &self.sybase_colinfo
    }

    fn num_cols(&self) -> usize {
        self.bindinfo.as_ref().map_or(0, ResultInfo::num_cols)
    }

    fn column_mut(&mut self, routine: &'static str, item: usize) -> Result<&mut Column> {
        let num_cols = self.num_cols();
        if item == 0 || item > num_cols {
            return Err(self.report(
                routine,
                Error::OutOfRange {
                    what: "column",
                    value: item as i64,
                },
            ));
        }
        match self.bindinfo.as_mut() {
            Some(info) => Ok(&mut info.columns[item - 1]),
            None => Err(Error::Transfer("bulk copy not initialised".to_string())),
        }
    }

    /// Bind column `item` (1-based), or clear bindings.
    ///
    /// With no item and no binding every binding is cleared. Every binding
    /// must cover the same number of rows.
    pub fn bind(&mut self, item: Option<usize>, binding: Option<ColumnBinding>) -> Result<()> {
        const ROUTINE: &str = "blk_bind";

        let Some(item) = item else {
            if binding.is_some() {
                return Err(self.report(
                    ROUTINE,
                    Error::OutOfRange {
                        what: "column",
                        value: 0,
                    },
                ));
            }
            if let Some(info) = self.bindinfo.as_mut() {
                for column in &mut info.columns {
                    column.binding = None;
                }
            }
            self.bind_count = UNUSED;
            return Ok(());
        };

        let Some(binding) = binding else {
            self.column_mut(ROUTINE, item)?.binding = None;
            return Ok(());
        };

        let count = binding.count.max(1);
        let found = i32::try_from(count).map_err(|_| {
            self.report(
                ROUTINE,
                Error::OutOfRange {
                    what: "count",
                    value: count as i64,
                },
            )
        })?;
        if self.bind_count != UNUSED && self.bind_count != found {
            let expected = usize::try_from(self.bind_count).unwrap_or(0);
            return Err(self.report(ROUTINE, Error::BindCountMismatch { expected, found: count }));
        }
        self.column_mut(ROUTINE, item)?.binding = Some(binding);
        self.bind_count = found;
        Ok(())
    }

    /// Describe column `item` (1-based).
    pub fn describe(&self, item: usize) -> Result<ColumnDescription> {
        let column = self
            .bindinfo
            .as_ref()
            .and_then(|info| item.checked_sub(1).and_then(|i| info.columns.get(i)))
            .ok_or(Error::OutOfRange {
                what: "column",
                value: item as i64,
            })
            .map_err(|e| self.report("blk_describe", e))?;
        Ok(ColumnDescription {
            name: column.name.clone(),
            column_type: column.column_type(),
            max_length: column.size,
            precision: column.precision,
            scale: column.scale,
            nullable: column.nullable,
            identity: column.identity,
        })
    }

    /// Get a property, or set it when `value` is given. Returns the value in
    /// effect afterwards.
    pub fn props(&mut self, property: BcpProperty, value: Option<PropValue>) -> Result<PropValue> {
        match (property, value) {
            (BcpProperty::Identity, None) => Ok(PropValue::Bool(self.identity_insert_on)),
            (BcpProperty::Identity, Some(PropValue::Bool(on))) => {
                self.identity_insert_on = on;
                Ok(PropValue::Bool(on))
            }
            (BcpProperty::Hints, None) => Ok(PropValue::Text(self.hint.clone())),
            (BcpProperty::Hints, Some(PropValue::Text(hint))) => {
                self.hint = hint.filter(|h| !h.is_empty());
                Ok(PropValue::Text(self.hint.clone()))
            }
            (property, Some(_)) => Err(self.report(
                "blk_props",
                Error::OutOfRange {
                    what: "property value",
                    value: property as i64,
                },
            )),
        }
    }

    /// Transfer `rows` rows (default: the bind count).
    ///
    /// Copying in, a row that cannot be converted is reported and skipped;
    /// the call still succeeds with the number of rows attempted.
    pub fn rowxfer(
        &mut self,
        transport: &mut dyn BulkTransport,
        rows: Option<usize>,
    ) -> Result<XferStatus> {
        let rows = rows.unwrap_or_else(|| self.bind_count().unwrap_or(1));
        match self.direction {
            Some(BcpDirection::In) => self.copy_in(transport, rows),
            Some(BcpDirection::Out) => self.copy_out(transport, rows),
            None => Err(self.report(
                "blk_rowxfer",
                Error::Transfer("bulk copy not initialised".to_string()),
            )),
        }
    }

    fn copy_in(&mut self, transport: &mut dyn BulkTransport, rows: usize) -> Result<XferStatus> {
        const ROUTINE: &str = "blk_rowxfer";

        if !self.xfer_init {
            let mut stmt = format!("insert bulk {}", self.table_name);
            if let Some(hint) = self.hint.as_deref() {
                stmt.push_str(" with (");
                stmt.push_str(hint);
                stmt.push(')');
            }
            self.insert_stmt = Some(stmt);
            transport
                .start_copy_in(self)
                .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?;
            self.xfer_init = true;
            tracing::debug!(table = %self.table_name, "bulk copy in started");
        }

        let mut failed = 0usize;
        for row in 0..rows {
            let staged = self.stage_row(row);
            let sent = staged.and_then(|()| transport.send_record(self));
            if let Err(e) = sent {
                failed += 1;
                let e = self.report(ROUTINE, e);
                tracing::warn!(row = row + 1, error = %e, "bulk copy row failed");
            }
        }
        tracing::debug!(rows, failed, "bulk copy rows sent");
        Ok(XferStatus::Succeed(rows))
    }

    /// Convert bound element `row` of every column into its staged server
    /// value.
    fn stage_row(&mut self, row: usize) -> Result<()> {
        let info = self
            .bindinfo
            .as_mut()
            .ok_or_else(|| Error::Transfer("bulk copy not initialised".to_string()))?;

        for (index, column) in info.columns.iter_mut().enumerate() {
            let staged = match column.binding.as_ref() {
                Some(binding) if !binding.stages_null(row) => {
                    let len = binding.source_len(row);
                    let src = binding
                        .element(row)
                        .and_then(|e| e.get(..len))
                        .ok_or(Error::OutOfRange {
                            what: "row",
                            value: row as i64,
                        })?;
                    let data = client_to_server(binding.bind_type, src, column)?;
                    BcpColumnData {
                        datalen: data.len(),
                        data,
                        is_null: false,
                    }
                }
                _ => {
                    if !column.nullable {
                        return Err(Error::NullNotAllowed {
                            column: index + 1,
                            row: row + 1,
                        });
                    }
                    BcpColumnData {
                        is_null: true,
                        ..BcpColumnData::default()
                    }
                }
            };
            column.bcp_data = Some(staged);
        }
        Ok(())
    }

    fn copy_out(&mut self, transport: &mut dyn BulkTransport, rows: usize) -> Result<XferStatus> {
        const ROUTINE: &str = "blk_rowxfer";

        if !self.xfer_init {
            let query = format!("select * from {}", self.table_name);
            transport
                .submit_query(&query)
                .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?;
            loop {
                match transport
                    .process_tokens()
                    .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?
                {
                    TokenResult::Row => break,
                    TokenResult::NoMoreResults => {
                        let err =
                            Error::Transfer(format!("no rows returned from {}", self.table_name));
                        return Err(self.report(ROUTINE, err));
                    }
                    TokenResult::Compute | TokenResult::Other => {}
                }
            }
            self.xfer_init = true;
            self.row_pending = true;
            tracing::debug!(table = %self.table_name, "bulk copy out started");
        }

        // Every result uses up one bound slot; only regular rows are bound.
        let mut done = 0usize;
        for slot in 0..rows {
            if self.row_pending {
                self.row_pending = false;
            } else {
                match transport
                    .process_tokens()
                    .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?
                {
                    TokenResult::Row => {}
                    TokenResult::Compute => continue,
                    TokenResult::NoMoreResults | TokenResult::Other => {
                        return Ok(XferStatus::EndData(done));
                    }
                }
            }

            let results = transport.current_results().ok_or_else(|| {
                self.report(ROUTINE, Error::Transfer("no current results".to_string()))
            })?;
            if let Err(e) = self.bind_out_row(&results, slot) {
                let e = self.report(ROUTINE, e);
                tracing::warn!(row = slot + 1, error = %e, "bulk copy row failed");
                return Ok(XferStatus::RowFail(done));
            }
            done += 1;
        }
        Ok(XferStatus::Succeed(done))
    }

    /// Copy the current server row into element `row` of every binding.
    fn bind_out_row(&mut self, results: &ResultHandle, row: usize) -> Result<()> {
        let info = self
            .bindinfo
            .as_mut()
            .ok_or_else(|| Error::Transfer("bulk copy not initialised".to_string()))?;
        let source = results.lock();
        let current = source.current_row().ok_or(Error::NoRow)?;

        for (index, column) in info.columns.iter_mut().enumerate() {
            let Some(binding) = column.binding.as_mut() else {
                continue;
            };
            let src_column = source.columns.get(index).ok_or(Error::OutOfRange {
                what: "column",
                value: index as i64 + 1,
            })?;
            let Some(len) = src_column.cur_size else {
                binding.set_null(row, true);
                continue;
            };
            let data = if src_column.kind().is_blob() {
                current.blob(index).unwrap_or_default()
            } else {
                let slot = current.column_data(src_column)?;
                &slot[..len.min(slot.len())]
            };
            let max_len = usize::try_from(binding.max_length).unwrap_or(0);
            let value = server_to_client(src_column, data, binding.bind_type, max_len)?;
            binding.set_element(row, &value)?;
        }
        Ok(())
    }

    /// Finish a batch or the whole copy, returning the rows the server
    /// took.
    pub fn done(&mut self, transport: &mut dyn BulkTransport, kind: DoneKind) -> Result<u64> {
        const ROUTINE: &str = "blk_done";

        let copying_in = self.direction == Some(BcpDirection::In) && self.xfer_init;
        let rows = if copying_in {
            transport
                .bcp_done()
                .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?
        } else {
            0
        };

        match kind {
            DoneKind::Batch => {
                if copying_in {
                    transport
                        .bcp_start(self)
                        .map_err(|e| self.report(ROUTINE, transfer_failed(e)))?;
                }
                tracing::debug!(rows, "bulk copy batch done");
            }
            DoneKind::All => {
                self.deinit();
                self.direction = None;
                self.bind_count = UNUSED;
                self.xfer_init = false;
                self.row_pending = false;
                tracing::debug!(rows, "bulk copy done");
            }
        }
        Ok(rows)
    }
}
