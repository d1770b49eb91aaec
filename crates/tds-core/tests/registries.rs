//! Prepared statement and cursor registries.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use tds_core::{
    Connection, ConnectionOptions, Context, CursorConcurrency, CursorStatus, CursorType, Error,
    ResultHandle,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn connection() -> Arc<Connection> {
    Connection::new(Arc::new(Context::default()), ConnectionOptions::default()).unwrap()
}

// =============================================================================
// Ordering and lookup
// =============================================================================

#[test]
fn test_dynamics_listed_newest_first() {
    let conn = connection();
    conn.alloc_dynamic(Some("a"), None).unwrap();
    conn.alloc_dynamic(Some("b"), None).unwrap();
    conn.alloc_dynamic(Some("c"), None).unwrap();
    assert_eq!(conn.dynamic_ids(), vec!["c", "b", "a"]);
}

#[test]
fn test_cursors_listed_oldest_first() {
    let conn = connection();
    conn.alloc_cursor(Some("a"), None).unwrap();
    conn.alloc_cursor(Some("b"), None).unwrap();
    conn.alloc_cursor(Some("c"), None).unwrap();
    assert_eq!(conn.cursor_names(), vec!["a", "b", "c"]);
}

#[test]
fn test_find_returns_same_entry() {
    let conn = connection();
    let dynamic = conn.alloc_dynamic(None, Some("select ?")).unwrap();
    let found = conn.find_dynamic(dynamic.id()).unwrap();
    assert!(found.ptr_eq(&dynamic));
    assert_eq!(found.query().as_deref(), Some("select ?"));
    assert_eq!(dynamic.ref_count(), 3);
    assert!(conn.find_dynamic("missing").is_none());

    let cursor = conn.alloc_cursor(Some("c1"), Some("select * from t")).unwrap();
    assert!(conn.find_cursor("c1").unwrap().ptr_eq(&cursor));
    assert!(conn.find_cursor("c2").is_none());
}

#[test]
fn test_duplicate_names_refused() {
    let conn = connection();
    conn.alloc_dynamic(Some("s"), None).unwrap();
    let err = conn.alloc_dynamic(Some("s"), None).unwrap_err();
    assert!(matches!(err, Error::DuplicateId(ref id) if id == "s"));
    assert!(err.is_misuse());

    conn.alloc_cursor(Some("s"), None).unwrap();
    assert!(matches!(
        conn.alloc_cursor(Some("s"), None),
        Err(Error::DuplicateId(_))
    ));
    assert_eq!(conn.dynamic_ids().len(), 1);
    assert_eq!(conn.cursor_names().len(), 1);
}

// =============================================================================
// Deallocation and release
// =============================================================================

#[test]
fn test_deallocated_dynamic_outlives_registry() {
    init_tracing();
    let conn = connection();
    let dynamic = conn.alloc_dynamic(Some("s1"), Some("select 1")).unwrap();
    dynamic.set_num_id(42);
    assert_eq!(dynamic.ref_count(), 2);

    conn.dynamic_deallocated(&dynamic);
    assert!(dynamic.is_deallocated());
    assert_eq!(dynamic.num_id(), 0);
    assert_eq!(dynamic.ref_count(), 1);
    assert!(conn.find_dynamic("s1").is_none());
    assert_eq!(dynamic.query().as_deref(), Some("select 1"));

    // A second notice finds nothing to unlink.
    conn.dynamic_deallocated(&dynamic);
    assert_eq!(dynamic.ref_count(), 1);

    // The id can be reused once unlinked.
    let again = conn.alloc_dynamic(Some("s1"), None).unwrap();
    assert!(!again.ptr_eq(&dynamic));
    assert!(dynamic.release());
}

#[test]
fn test_release_reports_last_reference() {
    let conn = connection();
    let cursor = conn.alloc_cursor(Some("c"), None).unwrap();
    let extra = cursor.clone();
    assert!(!extra.release());
    assert_eq!(cursor.ref_count(), 2);

    conn.cursor_deallocated(&cursor);
    let status = cursor.status();
    assert!(status.contains(CursorStatus::DEALLOCATED));
    assert!(cursor.is_deallocated());
    assert!(cursor.release());
}

#[test]
fn test_cursor_options() {
    let conn = connection();
    let cursor = conn.alloc_cursor(None, Some("select * from t")).unwrap();
    assert_eq!(cursor.name().len(), 10);
    assert_eq!(cursor.cursor_type(), CursorType::Keyset);
    assert_eq!(cursor.concurrency(), CursorConcurrency::Optimistic);
    assert_eq!(cursor.cursor_rows(), 1);

    cursor.set_options(CursorType::ForwardOnly, CursorConcurrency::ReadOnly);
    cursor.set_cursor_rows(50);
    cursor.set_cursor_id(7);
    cursor.set_status(CursorStatus::DECLARED | CursorStatus::OPENED);

    let found = conn.find_cursor(cursor.name()).unwrap();
    assert_eq!(found.cursor_type(), CursorType::ForwardOnly);
    assert_eq!(found.concurrency(), CursorConcurrency::ReadOnly);
    assert_eq!(found.cursor_rows(), 50);
    assert_eq!(found.cursor_id(), 7);
    assert!(found.status().contains(CursorStatus::OPENED));
}

#[test]
fn test_replacing_result_detaches_old_one() {
    let conn = connection();
    let dynamic = conn.alloc_dynamic(None, None).unwrap();
    let first = ResultHandle::new(1).unwrap();
    let second = ResultHandle::new(2).unwrap();

    dynamic.set_result(Some(first.clone()));
    assert_eq!(first.ref_count(), 2);
    dynamic.set_result(Some(second.clone()));
    assert_eq!(first.ref_count(), 1);
    assert!(dynamic.result().unwrap().ptr_eq(&second));

    dynamic.set_params(Some(ResultHandle::new(3).unwrap()));
    assert_eq!(dynamic.params().unwrap().lock().num_cols(), 3);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_allocation_yields_distinct_ids() {
    let conn = connection();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                (0..25)
                    .map(|_| conn.alloc_dynamic(None, None).unwrap().id().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 200);
    assert_eq!(conn.dynamic_ids().len(), 200);
}

#[test]
fn test_concurrent_named_allocation_has_one_winner() {
    let conn = connection();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.alloc_cursor(Some("shared"), None).is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conn.cursor_names(), vec!["shared"]);
}

#[test]
fn test_concurrent_release_frees_once() {
    let conn = connection();
    let cursor = conn.alloc_cursor(Some("c"), None).unwrap();
    let dynamic = conn.alloc_dynamic(Some("d"), None).unwrap();
    let cursor_result = ResultHandle::new(1).unwrap();
    let dynamic_result = ResultHandle::new(1).unwrap();
    cursor.set_result(Some(cursor_result.clone()));
    dynamic.set_result(Some(dynamic_result.clone()));

    conn.cursor_deallocated(&cursor);
    conn.dynamic_deallocated(&dynamic);

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS * 2));
    let mut cursors: Vec<_> = (1..THREADS).map(|_| cursor.clone()).collect();
    cursors.push(cursor);
    let mut dynamics: Vec<_> = (1..THREADS).map(|_| dynamic.clone()).collect();
    dynamics.push(dynamic);
    assert_eq!(cursors[0].ref_count(), THREADS);
    assert_eq!(cursor_result.ref_count(), 2);

    let mut handles = Vec::new();
    for cursor in cursors {
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            (true, cursor.release())
        }));
    }
    for dynamic in dynamics {
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            (false, dynamic.release())
        }));
    }

    let outcomes: Vec<(bool, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let last = |is_cursor: bool| {
        outcomes
            .iter()
            .filter(|(kind, freed)| *kind == is_cursor && *freed)
            .count()
    };
    assert_eq!(last(true), 1);
    assert_eq!(last(false), 1);
    assert_eq!(cursor_result.ref_count(), 1);
    assert_eq!(dynamic_result.ref_count(), 1);
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_teardown_releases_registry_references() {
    init_tracing();
    let conn = connection();
    let dynamic = conn.alloc_dynamic(Some("d"), None).unwrap();
    let cursor = conn.alloc_cursor(Some("c"), None).unwrap();
    let result = ResultHandle::new(1).unwrap();
    cursor.set_result(Some(result.clone()));

    conn.teardown();
    assert!(conn.is_closed());
    assert!(dynamic.is_deallocated());
    assert!(cursor.is_deallocated());
    assert_eq!(dynamic.ref_count(), 1);
    assert_eq!(cursor.ref_count(), 1);
    assert!(!result.is_attached());

    // Dropping the last cursor handle releases its result.
    drop(cursor);
    assert_eq!(result.ref_count(), 1);
}
