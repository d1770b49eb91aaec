//! Bulk copy against a scripted server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tds_core::bcp::{NULL_INDICATOR, NULL_TERMINATED, UNUSED};
use tds_core::{
    BcpColumnData, BcpDirection, BcpInfo, BcpProperty, BcpTable, BindType, BulkTransport,
    ClientMessage, Column, ColumnBinding, Context, DoneKind, Error, PropValue, ResultHandle,
    ResultInfo, TdsVersion, TokenResult, TypeId, XferStatus,
};

// =============================================================================
// Scripted server
// =============================================================================

/// One scripted reply from `process_tokens`. Rows carry the id and the
/// optional name to place in the current results.
enum Step {
    Row(i32, Option<&'static str>),
    Compute,
    Other,
    Done,
}

#[derive(Default)]
struct ScriptedServer {
    fail_init: bool,
    queries: Vec<String>,
    insert_statements: Vec<String>,
    records: Vec<Vec<BcpColumnData>>,
    steps: VecDeque<Step>,
    results: Option<ResultHandle>,
    batches: u64,
    starts: usize,
}

fn table_columns() -> ResultInfo {
    let mut id = Column::with_type(TypeId::Int4, 4);
    id.name = "id".to_string();
    id.nullable = false;
    id.identity = true;

    let mut name = Column::with_type(TypeId::VarChar, 10);
    name.name = "name".to_string();
    name.nullable = true;

    let mut info = ResultInfo::default();
    info.columns = vec![id, name];
    info
}

impl ScriptedServer {
    fn with_rows(steps: Vec<Step>) -> Self {
        let mut info = table_columns();
        info.allocate_row().unwrap();
        Self {
            steps: steps.into(),
            results: Some(ResultHandle::from_info(info)),
            ..Self::default()
        }
    }

    fn load_row(&self, id: i32, name: Option<&str>) {
        let results = self.results.as_ref().unwrap();
        let mut info = results.lock();
        {
            let (column, row) = info.column_and_row_mut(0).unwrap();
            row.column_data_mut(column)
                .unwrap()
                .copy_from_slice(&id.to_le_bytes());
        }
        info.columns[0].cur_size = Some(4);

        match name {
            Some(name) => {
                {
                    let (column, row) = info.column_and_row_mut(1).unwrap();
                    let slot = row.column_data_mut(column).unwrap();
                    slot.fill(0);
                    slot[..name.len()].copy_from_slice(name.as_bytes());
                }
                info.columns[1].cur_size = Some(name.len());
            }
            None => info.columns[1].cur_size = None,
        }
    }
}

impl BulkTransport for ScriptedServer {
    fn bcp_init(&mut self, _bcp: &BcpInfo) -> tds_core::Result<BcpTable> {
        if self.fail_init {
            return Err(Error::Config("no such table".to_string()));
        }
        Ok(BcpTable {
            columns: table_columns(),
            sybase_colinfo: Vec::new(),
        })
    }

    fn start_copy_in(&mut self, bcp: &BcpInfo) -> tds_core::Result<()> {
        self.insert_statements
            .push(bcp.insert_statement().unwrap_or_default().to_string());
        Ok(())
    }

    fn send_record(&mut self, bcp: &BcpInfo) -> tds_core::Result<()> {
        let staged = bcp
            .columns()
            .unwrap()
            .columns
            .iter()
            .map(|c| c.bcp_data.clone().unwrap())
            .collect();
        self.records.push(staged);
        Ok(())
    }

    fn submit_query(&mut self, query: &str) -> tds_core::Result<()> {
        self.queries.push(query.to_string());
        Ok(())
    }

    fn process_tokens(&mut self) -> tds_core::Result<TokenResult> {
        Ok(match self.steps.pop_front() {
            Some(Step::Row(id, name)) => {
                self.load_row(id, name);
                TokenResult::Row
            }
            Some(Step::Compute) => TokenResult::Compute,
            Some(Step::Other) => TokenResult::Other,
            Some(Step::Done) | None => TokenResult::NoMoreResults,
        })
    }

    fn current_results(&self) -> Option<ResultHandle> {
        self.results.clone()
    }

    fn bcp_done(&mut self) -> tds_core::Result<u64> {
        let taken = self.records.len() as u64 - self.batches;
        self.batches += taken;
        Ok(taken)
    }

    fn bcp_start(&mut self, _bcp: &BcpInfo) -> tds_core::Result<()> {
        self.starts += 1;
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn recording_context() -> (Arc<Context>, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let context = Context::default().with_message_handler(move |message: &ClientMessage| {
        sink.lock().push(message.number);
    });
    (Arc::new(context), seen)
}

fn bcp() -> (BcpInfo, Arc<Mutex<Vec<u32>>>) {
    let (context, seen) = recording_context();
    (BcpInfo::new(context, TdsVersion::V7_4).unwrap(), seen)
}

fn id_binding(ids: &[i32]) -> ColumnBinding {
    let mut binding = ColumnBinding::new(BindType::Int, UNUSED, ids.len()).with_indicators();
    for (row, id) in ids.iter().enumerate() {
        binding.set_element(row, &id.to_le_bytes()).unwrap();
    }
    binding
}

fn name_binding(names: &[Option<&str>]) -> ColumnBinding {
    let mut binding = ColumnBinding::new(BindType::VarChar, 10, names.len())
        .with_lengths()
        .with_indicators();
    for (row, name) in names.iter().enumerate() {
        match name {
            Some(name) => binding.set_element(row, name.as_bytes()).unwrap(),
            None => binding.set_null(row, true),
        }
    }
    binding
}

// =============================================================================
// Initialisation
// =============================================================================

#[test]
fn test_init_reports_numbered_errors() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();

    assert!(matches!(
        bcp.init(&mut server, 3, Some("t"), NULL_TERMINATED),
        Err(Error::InvalidDirection(3))
    ));
    assert!(matches!(
        bcp.init(&mut server, 1, None, NULL_TERMINATED),
        Err(Error::MissingTableName)
    ));
    assert!(matches!(
        bcp.init(&mut server, 1, Some("t"), 0),
        Err(Error::InvalidNameLength(0))
    ));

    server.fail_init = true;
    assert!(matches!(
        bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED),
        Err(Error::Transfer(_))
    ));
    assert_eq!(*seen.lock(), vec![15, 6, 4, 140]);
    assert!(bcp.columns().is_none());
}

#[test]
fn test_init_rejects_bad_identifier() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    assert!(matches!(
        bcp.init(&mut server, 1, Some("t; drop table x"), NULL_TERMINATED),
        Err(Error::InvalidIdentifier(_))
    ));
    assert!(seen.lock().is_empty());
}

#[test]
fn test_init_with_name_length() {
    let (mut bcp, _seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 2, Some("dbo.orders_extra"), 10).unwrap();
    assert_eq!(bcp.table_name(), "dbo.orders");
    assert_eq!(bcp.direction(), Some(BcpDirection::Out));
    assert_eq!(bcp.columns().unwrap().num_cols(), 2);
    assert!(bcp.bind_count().is_none());
    assert!(!bcp.transfer_started());
}

// =============================================================================
// Binding, describing and properties
// =============================================================================

#[test]
fn test_bind_errors() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED).unwrap();

    assert!(matches!(
        bcp.bind(Some(3), Some(id_binding(&[1]))),
        Err(Error::OutOfRange { .. })
    ));
    bcp.bind(Some(1), Some(id_binding(&[1, 2]))).unwrap();
    assert_eq!(bcp.bind_count(), Some(2));
    assert!(matches!(
        bcp.bind(Some(2), Some(name_binding(&[Some("a")]))),
        Err(Error::BindCountMismatch {
            expected: 2,
            found: 1
        })
    ));
    assert_eq!(*seen.lock(), vec![141, 137]);

    bcp.bind(None, None).unwrap();
    assert!(bcp.bind_count().is_none());
    assert!(bcp.columns().unwrap().columns.iter().all(|c| c.binding.is_none()));
    bcp.bind(Some(2), Some(name_binding(&[Some("a")]))).unwrap();
    assert_eq!(bcp.bind_count(), Some(1));
}

#[test]
fn test_describe() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED).unwrap();

    let id = bcp.describe(1).unwrap();
    assert_eq!(id.name, "id");
    assert_eq!(id.column_type, Some(TypeId::Int4));
    assert_eq!(id.max_length, 4);
    assert!(!id.nullable);
    assert!(id.identity);

    let name = bcp.describe(2).unwrap();
    assert_eq!(name.max_length, 10);
    assert!(name.nullable);

    assert!(bcp.describe(0).is_err());
    assert!(bcp.describe(3).is_err());
    assert_eq!(*seen.lock(), vec![141, 141]);
}

#[test]
fn test_props() {
    let (mut bcp, _seen) = bcp();
    assert_eq!(
        bcp.props(BcpProperty::Identity, None).unwrap(),
        PropValue::Bool(false)
    );
    bcp.props(BcpProperty::Identity, Some(PropValue::Bool(true)))
        .unwrap();
    assert!(bcp.identity_insert());

    bcp.props(
        BcpProperty::Hints,
        Some(PropValue::Text(Some("TABLOCK".to_string()))),
    )
    .unwrap();
    assert_eq!(bcp.hint(), Some("TABLOCK"));
    bcp.props(BcpProperty::Hints, Some(PropValue::Text(Some(String::new()))))
        .unwrap();
    assert_eq!(bcp.hint(), None);

    assert!(matches!(
        bcp.props(BcpProperty::Identity, Some(PropValue::Text(None))),
        Err(Error::OutOfRange { .. })
    ));
}

// =============================================================================
// Copy in
// =============================================================================

#[test]
fn test_copy_in_rows() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("dbo.people"), NULL_TERMINATED)
        .unwrap();
    bcp.props(
        BcpProperty::Hints,
        Some(PropValue::Text(Some("TABLOCK".to_string()))),
    )
    .unwrap();
    bcp.bind(Some(1), Some(id_binding(&[1, 2, 3]))).unwrap();
    bcp.bind(Some(2), Some(name_binding(&[Some("ann"), None, Some("cy")])))
        .unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::Succeed(3));
    assert!(bcp.transfer_started());
    assert_eq!(
        server.insert_statements,
        vec!["insert bulk dbo.people with (TABLOCK)"]
    );
    assert!(seen.lock().is_empty());

    assert_eq!(server.records.len(), 3);
    let first = &server.records[0];
    assert_eq!(first[0].data, 1i32.to_le_bytes());
    assert_eq!(first[1].data, b"ann");
    assert_eq!(first[1].datalen, 3);
    assert!(server.records[1][1].is_null);
    assert_eq!(server.records[2][1].data, b"cy");

    // A second call reuses the started transfer.
    assert_eq!(
        bcp.rowxfer(&mut server, Some(1)).unwrap(),
        XferStatus::Succeed(1)
    );
    assert_eq!(server.insert_statements.len(), 1);

    assert_eq!(bcp.done(&mut server, DoneKind::Batch).unwrap(), 4);
    assert_eq!(server.starts, 1);
    assert!(bcp.transfer_started());

    assert_eq!(bcp.done(&mut server, DoneKind::All).unwrap(), 0);
    assert!(bcp.direction().is_none());
    assert!(bcp.columns().is_none());
    assert!(!bcp.transfer_started());
}

#[test]
fn test_null_indicator_needs_zero_length() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED).unwrap();

    // The indicator says NULL but the length says three bytes: the value wins.
    let mut ids = id_binding(&[1, 2]);
    ids.lengths = Some(vec![4, 0]);
    ids.indicators = Some(vec![NULL_INDICATOR, NULL_INDICATOR]);
    let mut names = name_binding(&[Some("ann"), None]);
    names.indicators = Some(vec![NULL_INDICATOR, NULL_INDICATOR]);
    bcp.bind(Some(1), Some(ids)).unwrap();
    bcp.bind(Some(2), Some(names)).unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::Succeed(2));
    assert_eq!(server.records.len(), 1);
    let record = &server.records[0];
    assert!(!record[0].is_null);
    assert_eq!(record[0].data, 1i32.to_le_bytes());
    assert!(!record[1].is_null);
    assert_eq!(record[1].data, b"ann");
    assert_eq!(record[1].datalen, 3);

    // Row two has a zero length and the NULL indicator on a NOT NULL column.
    assert_eq!(*seen.lock(), vec![142]);
}

#[test]
fn test_copy_in_skips_null_in_not_null_column() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED).unwrap();

    let mut ids = id_binding(&[1, 2, 3]);
    ids.set_null(1, true);
    bcp.bind(Some(1), Some(ids)).unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::Succeed(3));
    assert_eq!(server.records.len(), 2);
    assert_eq!(*seen.lock(), vec![142]);
    // The unbound name column goes out as NULL.
    assert!(server.records.iter().all(|r| r[1].is_null));
    assert_eq!(server.records[1][0].data, 3i32.to_le_bytes());
}

#[test]
fn test_done_before_transfer_sends_nothing() {
    let (mut bcp, _seen) = bcp();
    let mut server = ScriptedServer::default();
    bcp.init(&mut server, 1, Some("t"), NULL_TERMINATED).unwrap();
    assert_eq!(bcp.done(&mut server, DoneKind::Batch).unwrap(), 0);
    assert_eq!(server.starts, 0);
}

// =============================================================================
// Copy out
// =============================================================================

#[test]
fn test_copy_out_rows() {
    let (mut bcp, _seen) = bcp();
    let mut server = ScriptedServer::with_rows(vec![
        Step::Row(7, Some("gus")),
        Step::Row(8, None),
        Step::Done,
    ]);
    bcp.init(&mut server, 2, Some("t"), NULL_TERMINATED).unwrap();
    bcp.bind(Some(1), Some(id_binding(&[0, 0, 0]))).unwrap();
    bcp.bind(Some(2), Some(name_binding(&[None, None, None])))
        .unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::EndData(2));
    assert_eq!(server.queries, vec!["select * from t"]);

    let columns = &bcp.columns().unwrap().columns;
    let ids = columns[0].binding.as_ref().unwrap();
    assert_eq!(ids.element(0).unwrap(), 7i32.to_le_bytes());
    assert_eq!(ids.element(1).unwrap(), 8i32.to_le_bytes());

    let names = columns[1].binding.as_ref().unwrap();
    assert_eq!(&names.element(0).unwrap()[..3], b"gus");
    assert_eq!(names.lengths.as_ref().unwrap()[0], 3);
    assert!(!names.is_null(0));
    assert!(names.is_null(1));
}

#[test]
fn test_copy_out_compute_row_takes_a_slot() {
    let (mut bcp, _seen) = bcp();
    let mut server = ScriptedServer::with_rows(vec![
        Step::Row(7, Some("gus")),
        Step::Compute,
        Step::Row(8, Some("hal")),
        Step::Done,
    ]);
    bcp.init(&mut server, 2, Some("t"), NULL_TERMINATED).unwrap();
    bcp.bind(Some(1), Some(id_binding(&[0, 0, 0]))).unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::Succeed(2));
    let ids = bcp.columns().unwrap().columns[0].binding.clone().unwrap();
    assert_eq!(ids.element(0).unwrap(), 7i32.to_le_bytes());
    assert_eq!(ids.element(1).unwrap(), 0i32.to_le_bytes());
    assert_eq!(ids.element(2).unwrap(), 8i32.to_le_bytes());

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::EndData(0));
}

#[test]
fn test_copy_out_stops_at_other_results() {
    let (mut bcp, _seen) = bcp();
    let mut server = ScriptedServer::with_rows(vec![
        Step::Other,
        Step::Row(7, None),
        Step::Other,
        Step::Row(8, None),
    ]);
    bcp.init(&mut server, 2, Some("t"), NULL_TERMINATED).unwrap();
    bcp.bind(Some(1), Some(id_binding(&[0, 0]))).unwrap();

    // Results ahead of the first row are skipped; later ones end the copy.
    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::EndData(1));
    assert_eq!(server.steps.len(), 1);
}

#[test]
fn test_copy_out_empty_table_fails() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::with_rows(vec![Step::Done]);
    bcp.init(&mut server, 2, Some("t"), NULL_TERMINATED).unwrap();
    bcp.bind(Some(1), Some(id_binding(&[0]))).unwrap();

    let err = bcp.rowxfer(&mut server, None).unwrap_err();
    assert!(matches!(err, Error::Transfer(_)));
    assert_eq!(err.message_number(), Some(140));
    assert_eq!(*seen.lock(), vec![140]);
    assert!(!bcp.transfer_started());
}

#[test]
fn test_copy_out_conversion_failure() {
    let (mut bcp, seen) = bcp();
    let mut server = ScriptedServer::with_rows(vec![Step::Row(1, Some("abcdef"))]);
    bcp.init(&mut server, 2, Some("t"), NULL_TERMINATED).unwrap();
    let narrow = ColumnBinding::new(BindType::VarChar, 3, 1).with_lengths();
    bcp.bind(Some(2), Some(narrow)).unwrap();

    assert_eq!(bcp.rowxfer(&mut server, None).unwrap(), XferStatus::RowFail(0));
    assert!(seen.lock().is_empty());
}
