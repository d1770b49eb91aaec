//! # tds-core
//!
//! Client-side TDS session engine.
//!
//! This crate owns everything between the packet framing in `tds-codec` and
//! an API facade: physical connections, the sessions multiplexed over them,
//! and the objects the wire protocol fills in and reads from.
//!
//! ## Features
//!
//! - **Connections and sessions**: one session per connection, or many over
//!   MARS with SMP envelopes, per-session receive windows and a shared
//!   reader that routes frames by session id
//! - **Result objects**: column descriptions, aligned row buffers, output
//!   parameters and compute results, shared by reference count and attached
//!   to at most one session
//! - **Registries**: prepared statements and server cursors, listed per
//!   connection and released when the server drops them
//! - **Bulk copy**: array bindings, client/server value conversion and
//!   row transfer in both directions
//!
//! ## Object model
//!
//! ```text
//! Context ──< Connection ──< Session ── current results ─┐
//!               │   │                                    │
//!               │   └──< DynamicHandle ── ResultHandle ──┤ (weak, either side)
//!               └──────< CursorHandle  ── ResultHandle ──┘
//! ```
//!
//! Handles are `Arc`s. A connection lives until its last session is closed;
//! a result lives until its last handle is dropped, and the session it was
//! attached to forgets it at that moment.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tds_core::{Context, Login, Session};
//!
//! let login = Login::from_connection_string("Server=db;MARS=true")?;
//! let mut primary = Session::connect(Arc::new(Context::new()), login.connection_options())?;
//! let conn = Arc::clone(primary.connection().unwrap());
//! conn.attach_transport(Box::new(std::net::TcpStream::connect("db:1433")?))?;
//! primary.mark_connected()?;
//!
//! let mut second = Session::new_secondary(&conn)?;
//! let stmt = conn.alloc_dynamic(None, Some("select * from t where id = ?"))?;
//! second.set_current_dynamic(Some(stmt));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bcp;
pub mod column;
pub mod config;
pub mod connection;
pub mod context;
pub mod convert;
pub mod cursor;
pub mod dynamic;
pub mod error;
pub mod message;
mod registry;
pub mod result;
pub mod session;
pub mod transport;

pub use bcp::{
    BcpColumnData, BcpDirection, BcpInfo, BcpProperty, BcpTable, BulkTransport, ColumnBinding,
    ColumnDescription, DoneKind, PropValue, TokenResult, XferStatus,
};
pub use column::{Column, ColumnKind, Row};
pub use config::{ConnectionOptions, Locale, Login};
pub use connection::{Connection, Env};
pub use context::{Context, InterruptAction, InterruptHandler, MessageHandler};
pub use convert::{BindType, Value};
pub use cursor::{CursorConcurrency, CursorHandle, CursorStatus, CursorType};
pub use dynamic::DynamicHandle;
pub use error::{Error, Result};
pub use message::{ClientMessage, MessageOrigin};
pub use result::{ResultHandle, ResultInfo, append_param_column, remove_last_param_column};
pub use session::{EnvChange, Session, SessionState};
pub use transport::{Authentication, CharsetState, TlsSession, Transport, Wakeup};

pub use tds_codec::{Message, Packet};
pub use tds_protocol::{PacketType, TdsVersion, TypeId};
