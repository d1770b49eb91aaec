//! Physical connection shared by one or more sessions.
//!
//! The connection owns the transport, TLS and authentication collaborators,
//! charset state, the environment, and the registries of prepared statements
//! and cursors. In MARS mode it also owns the session slot table and routes
//! incoming frames to sessions by id.
//!
//! Locking: the list mutex covers the slot table and both registries and is
//! never held across I/O. The reader and writer halves have their own
//! mutexes. When the list mutex and a session inbox are both needed, the list
//! mutex is taken first.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use tds_codec::{Packet, PacketCache, PacketChain, TdsCodec};
use tds_protocol::{SmpFlags, SmpHeader, TdsVersion};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::ConnectionOptions;
use crate::context::Context;
use crate::cursor::{Cursor, CursorHandle};
use crate::dynamic::{DynamicHandle, DynamicStatement};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::session::SessionShared;
use crate::transport::{
    Authentication, CharsetState, TlsSession, Transport, Wakeup, is_timeout,
};

/// Session slots reserved up front, and added each time the table fills.
pub const SESSION_SLOT_CHUNK: usize = 64;

/// Identifier buffer size; ids are at most one less.
pub const MAX_DYNID_LEN: usize = 30;

/// Attempts at generating an unused identifier.
const ID_ATTEMPTS: usize = 256;

const READ_CHUNK: usize = 8192;

static ID_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Server environment as last reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    /// Negotiated packet size.
    pub block_size: usize,
    /// Current database.
    pub database: Option<String>,
    /// Current language.
    pub language: Option<String>,
    /// Current server charset.
    pub charset: Option<String>,
}

pub(crate) struct ReadHalf {
    transport: Option<Box<dyn Transport>>,
    codec: TdsCodec,
    buf: BytesMut,
    timeout: Option<Duration>,
}

struct WriteHalf {
    transport: Option<Box<dyn Transport>>,
    codec: TdsCodec,
    buf: BytesMut,
}

struct Lists {
    sessions: Vec<Option<Arc<SessionShared>>>,
    dyns: Registry<DynamicStatement>,
    cursors: Registry<Cursor>,
}

/// A physical connection.
pub struct Connection {
    context: Arc<Context>,
    mars: bool,
    query_timeout: Option<Duration>,
    tds_version: Mutex<TdsVersion>,
    env: Mutex<Env>,
    charsets: Mutex<CharsetState>,
    wakeup: Wakeup,
    reader: Mutex<ReadHalf>,
    writer: Mutex<WriteHalf>,
    tls: Mutex<Option<Box<dyn TlsSession>>>,
    authentication: Mutex<Option<Box<dyn Authentication>>>,
    lists: Mutex<Lists>,
    control: Mutex<PacketChain>,
    packet_cache: Mutex<PacketCache>,
    closed: AtomicBool,
}

impl Connection {
    /// Create an unconnected connection.
    ///
    /// Any failing step drops everything built before it.
    pub fn new(context: Arc<Context>, options: ConnectionOptions) -> Result<Arc<Self>> {
        let wakeup = Wakeup::new()?;
        let charsets = CharsetState::new(
            &context.locale.client_charset,
            context.locale.server_charset.as_deref(),
        )?;

        let slots = if options.mars { SESSION_SLOT_CHUNK } else { 1 };
        let mut sessions = Vec::new();
        sessions
            .try_reserve_exact(slots)
            .map_err(|_| Error::Allocation { requested: slots })?;
        sessions.resize(slots, None);

        let codec = || {
            if options.mars {
                TdsCodec::mars()
            } else {
                TdsCodec::new()
            }
        };

        tracing::debug!(
            block_size = options.block_size,
            mars = options.mars,
            tds_version = %options.tds_version,
            "connection created"
        );

        Ok(Arc::new(Self {
            context,
            mars: options.mars,
            query_timeout: options.query_timeout,
            tds_version: Mutex::new(options.tds_version),
            env: Mutex::new(Env {
                block_size: options.block_size,
                ..Env::default()
            }),
            charsets: Mutex::new(charsets),
            wakeup,
            reader: Mutex::new(ReadHalf {
                transport: None,
                codec: codec(),
                buf: BytesMut::new(),
                timeout: None,
            }),
            writer: Mutex::new(WriteHalf {
                transport: None,
                codec: codec(),
                buf: BytesMut::new(),
            }),
            tls: Mutex::new(None),
            authentication: Mutex::new(None),
            lists: Mutex::new(Lists {
                sessions,
                dyns: Registry::default(),
                cursors: Registry::default(),
            }),
            control: Mutex::new(PacketChain::new()),
            packet_cache: Mutex::new(PacketCache::default()),
            closed: AtomicBool::new(false),
        }))
    }

    /// Context this connection was created from.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Whether sessions are multiplexed.
    #[must_use]
    pub fn is_mars(&self) -> bool {
        self.mars
    }

    /// Default per-read timeout for sessions.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    /// Protocol version in use.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        *self.tds_version.lock()
    }

    /// Record the version the server agreed to.
    pub fn set_tds_version(&self, version: TdsVersion) {
        *self.tds_version.lock() = version;
    }

    /// Current environment.
    pub fn env(&self) -> MutexGuard<'_, Env> {
        self.env.lock()
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.env.lock().block_size
    }

    /// Charset state.
    #[must_use]
    pub fn charsets(&self) -> CharsetState {
        *self.charsets.lock()
    }

    pub(crate) fn set_server_charset(&self, label: &str) -> Result<()> {
        self.charsets.lock().set_server(label)
    }

    /// Wakeup primitive for interrupting waits.
    #[must_use]
    pub fn wakeup(&self) -> &Wakeup {
        &self.wakeup
    }

    /// Raise the wakeup and rouse every session waiting for a packet.
    pub fn interrupt(&self) {
        self.wakeup.notify();
        let waiting: Vec<Arc<SessionShared>> = self
            .lists
            .lock()
            .sessions
            .iter()
            .flatten()
            .filter(|s| s.is_waiting())
            .cloned()
            .collect();
        for session in &waiting {
            session.notify();
        }
        tracing::debug!(woken = waiting.len(), "connection interrupted");
    }

    /// Install the byte stream. A second handle is taken for reading.
    pub fn attach_transport(&self, transport: Box<dyn Transport>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let read_half = transport.try_clone_box()?;
        {
            let mut reader = self.reader.lock();
            reader.transport = Some(read_half);
            reader.timeout = None;
            reader.buf.clear();
        }
        self.writer.lock().transport = Some(transport);
        tracing::debug!("transport attached");
        Ok(())
    }

    /// Install the TLS state.
    pub fn set_tls(&self, tls: Box<dyn TlsSession>) {
        *self.tls.lock() = Some(tls);
    }

    /// Install the authentication context.
    pub fn set_authentication(&self, authentication: Box<dyn Authentication>) {
        *self.authentication.lock() = Some(authentication);
    }

    /// Whether a transport is installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.writer.lock().transport.is_some()
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lists.lock().sessions.iter().flatten().count()
    }

    /// Number of session slots, used or not.
    #[must_use]
    pub fn session_slots(&self) -> usize {
        self.lists.lock().sessions.len()
    }

    // ========================================================================
    // Session slots
    // ========================================================================

    pub(crate) fn install_primary(&self, shared: &Arc<SessionShared>) -> Result<()> {
        let mut lists = self.lists.lock();
        match lists.sessions.first_mut() {
            Some(slot) if slot.is_none() => {
                *slot = Some(Arc::clone(shared));
                Ok(())
            }
            _ => Err(Error::SessionIdExhausted),
        }
    }

    /// Take the lowest free slot above 0, growing the table if it is full.
    pub(crate) fn install_secondary(
        &self,
        make: impl FnOnce(u16) -> Arc<SessionShared>,
    ) -> Result<Arc<SessionShared>> {
        let mut lists = self.lists.lock();
        let free = lists
            .sessions
            .iter()
            .skip(1)
            .position(Option::is_none)
            .map(|i| i + 1);

        let at = match free {
            Some(at) => at,
            None => {
                let at = lists.sessions.len().max(1);
                let grown = at + SESSION_SLOT_CHUNK;
                let add = grown - lists.sessions.len();
                lists
                    .sessions
                    .try_reserve_exact(add)
                    .map_err(|_| Error::Allocation {
                        requested: SESSION_SLOT_CHUNK,
                    })?;
                lists.sessions.resize(grown, None);
                tracing::debug!(slots = grown, "session table grown");
                at
            }
        };

        let sid = u16::try_from(at).map_err(|_| Error::SessionIdExhausted)?;
        let shared = make(sid);
        lists.sessions[at] = Some(Arc::clone(&shared));
        Ok(shared)
    }

    /// Unlink session `sid`. The last session out tears the connection down;
    /// otherwise `fin` is sent to tell the server the session ended.
    pub(crate) fn remove_session(&self, sid: u16, fin: Option<Packet>) {
        let remaining = {
            let mut lists = self.lists.lock();
            if let Some(slot) = lists.sessions.get_mut(usize::from(sid)) {
                *slot = None;
            }
            lists.sessions.iter().flatten().count()
        };
        tracing::debug!(sid, remaining, "session removed");

        if !self.mars || remaining == 0 {
            self.teardown();
            return;
        }
        if let Some(fin) = fin {
            self.queue_control(fin);
            if let Err(e) = self.flush_queued() {
                tracing::warn!(sid, error = %e, "failed to send session FIN");
            }
        }
    }

    fn session(&self, sid: u16) -> Option<Arc<SessionShared>> {
        self.lists
            .lock()
            .sessions
            .get(usize::from(sid))
            .cloned()
            .flatten()
    }

    // ========================================================================
    // Wire
    // ========================================================================

    /// Queue an SMP control packet (SYN, ACK, FIN).
    pub(crate) fn queue_control(&self, packet: Packet) {
        self.control.lock().push_back(packet);
    }

    /// Build a control packet for session `sid`.
    pub(crate) fn control_packet(
        &self,
        flags: SmpFlags,
        sid: u16,
        seq: u32,
        window: u32,
    ) -> Result<Packet> {
        let mut packet = self.packet_cache.lock().take(0)?;
        packet.set_sid(sid);
        packet.set_envelope(Some(SmpHeader::new(flags, sid, 0, seq, window)));
        Ok(packet)
    }

    /// Write every queued control packet.
    pub fn flush_queued(&self) -> Result<()> {
        let mut queued = std::mem::take(&mut *self.control.lock());
        if queued.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        while let Some(packet) = queued.pop_front() {
            write_frame(&mut writer, &packet, false)?;
            self.packet_cache.lock().give_back(packet);
        }
        Ok(())
    }

    /// Write one packet. `end_of_message` restarts packet numbering.
    pub(crate) fn write_packet(&self, packet: &Packet, end_of_message: bool) -> Result<()> {
        let mut writer = self.writer.lock();
        write_frame(&mut writer, packet, end_of_message)
    }

    pub(crate) fn lock_reader(&self) -> MutexGuard<'_, ReadHalf> {
        self.reader.lock()
    }

    pub(crate) fn try_lock_reader(&self) -> Option<MutexGuard<'_, ReadHalf>> {
        self.reader.try_lock()
    }

    /// Whether some session currently holds the reading side.
    pub(crate) fn reader_busy(&self) -> bool {
        self.reader.try_lock().is_none()
    }

    /// Read one frame. `Ok(None)` means the read timed out.
    pub(crate) fn read_frame(
        &self,
        reader: &mut ReadHalf,
        timeout: Option<Duration>,
    ) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = reader.codec.decode(&mut reader.buf)? {
                return Ok(Some(packet));
            }

            let ReadHalf {
                transport,
                buf,
                timeout: current,
                ..
            } = &mut *reader;
            let transport = transport.as_mut().ok_or(Error::ConnectionClosed)?;
            if *current != timeout {
                transport.set_read_timeout(timeout)?;
                *current = timeout;
            }

            let mut chunk = [0u8; READ_CHUNK];
            match transport.read(&mut chunk) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one frame and hand it to the session it is addressed to.
    ///
    /// Returns `Ok(false)` if the read timed out.
    pub(crate) fn pump(&self, reader: &mut ReadHalf, timeout: Option<Duration>) -> Result<bool> {
        let Some(packet) = self.read_frame(reader, timeout)? else {
            return Ok(false);
        };
        let sid = packet.sid();
        match self.session(sid) {
            Some(session) => {
                if let Some(spent) = session.deliver(packet) {
                    self.packet_cache.lock().give_back(spent);
                }
            }
            None => {
                tracing::warn!(sid, "dropping frame for unknown session");
                self.packet_cache.lock().give_back(packet);
            }
        }
        Ok(true)
    }

    /// Wake one session, other than `except`, that is waiting for input so
    /// it can take over reading.
    pub(crate) fn wake_next_reader(&self, except: u16) {
        let lists = self.lists.lock();
        if let Some(session) = lists
            .sessions
            .iter()
            .flatten()
            .find(|s| s.sid != except && s.is_waiting())
        {
            session.notify();
        }
    }

    /// Return a consumed packet to the staging cache.
    pub(crate) fn recycle(&self, packet: Packet) {
        self.packet_cache.lock().give_back(packet);
    }

    // ========================================================================
    // Dynamic statements and cursors
    // ========================================================================

    /// Register a prepared statement.
    ///
    /// A supplied id must be unused. Without one an id is generated. The
    /// new statement is listed first.
    pub fn alloc_dynamic(&self, id: Option<&str>, query: Option<&str>) -> Result<DynamicHandle> {
        let mut lists = self.lists.lock();
        let id = self.choose_id(id, |key| lists.dyns.contains(key))?;
        let entry = Arc::new(DynamicStatement::new(id.clone(), query));
        lists.dyns.push_front(id.clone(), Arc::clone(&entry));
        tracing::debug!(id = %id, "dynamic statement allocated");
        Ok(DynamicHandle(entry))
    }

    /// The server dropped `dynamic`: unlink it and release the registry's
    /// reference.
    pub fn dynamic_deallocated(&self, dynamic: &DynamicHandle) {
        let removed = self.lists.lock().dyns.remove_ptr(dynamic.id(), &dynamic.0);
        match removed {
            Some(entry) => {
                entry.mark_deallocated();
                drop(entry);
                tracing::debug!(id = dynamic.id(), "dynamic statement deallocated");
            }
            None => tracing::warn!(id = dynamic.id(), "deallocated dynamic statement not listed"),
        }
    }

    /// Look up a prepared statement.
    #[must_use]
    pub fn find_dynamic(&self, id: &str) -> Option<DynamicHandle> {
        self.lists
            .lock()
            .dyns
            .get(id)
            .map(|entry| DynamicHandle(Arc::clone(entry)))
    }

    /// Listed prepared statement ids, most recent first.
    #[must_use]
    pub fn dynamic_ids(&self) -> Vec<String> {
        self.lists.lock().dyns.keys_in_order()
    }

    /// Register a cursor. The new cursor is listed last.
    pub fn alloc_cursor(&self, name: Option<&str>, query: Option<&str>) -> Result<CursorHandle> {
        let mut lists = self.lists.lock();
        let name = self.choose_id(name, |key| lists.cursors.contains(key))?;
        let entry = Arc::new(Cursor::new(name.clone(), query));
        lists.cursors.push_back(name.clone(), Arc::clone(&entry));
        tracing::debug!(name = %name, "cursor allocated");
        Ok(CursorHandle(entry))
    }

    /// The server dropped `cursor`: unlink it and release the registry's
    /// reference.
    pub fn cursor_deallocated(&self, cursor: &CursorHandle) {
        let removed = self.lists.lock().cursors.remove_ptr(cursor.name(), &cursor.0);
        match removed {
            Some(entry) => {
                entry.mark_deallocated();
                drop(entry);
                tracing::debug!(name = cursor.name(), "cursor deallocated");
            }
            None => tracing::warn!(name = cursor.name(), "deallocated cursor not listed"),
        }
    }

    /// Look up a cursor.
    #[must_use]
    pub fn find_cursor(&self, name: &str) -> Option<CursorHandle> {
        self.lists
            .lock()
            .cursors
            .get(name)
            .map(|entry| CursorHandle(Arc::clone(entry)))
    }

    /// Listed cursor names, oldest first.
    #[must_use]
    pub fn cursor_names(&self) -> Vec<String> {
        self.lists.lock().cursors.keys_in_order()
    }

    fn choose_id(&self, supplied: Option<&str>, in_use: impl Fn(&str) -> bool) -> Result<String> {
        if let Some(id) = supplied {
            let id: String = id.chars().take(MAX_DYNID_LEN - 1).collect();
            if in_use(&id) {
                return Err(Error::DuplicateId(id));
            }
            return Ok(id);
        }
        for _ in 0..ID_ATTEMPTS {
            let id = self.generate_id();
            if !in_use(&id) {
                return Ok(id);
            }
        }
        Err(Error::IdExhausted)
    }

    /// Ten-character id from the connection address and a sequence number.
    fn generate_id(&self) -> String {
        let inc = (ID_SEQUENCE.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0xffff) as u64;
        let mut n = self as *const Self as usize as u64;

        let mut id = String::with_capacity(10);
        id.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
        for i in 0..9 {
            let digit = (n % 36) as u32;
            id.push(char::from_digit(digit, 36).unwrap_or('0'));
            n /= 36;
            if i == 4 {
                n += 3 * inc;
            }
        }
        id
    }

    /// Whether any registry entry's result is attached to `session`.
    pub(crate) fn registry_result_attached_to(&self, session: &Arc<SessionShared>) -> bool {
        let lists = self.lists.lock();
        let attached = |result: Option<crate::result::ResultHandle>| {
            result
                .and_then(|r| r.0.attached_session())
                .is_some_and(|s| Arc::ptr_eq(&s, session))
        };
        lists.dyns.values().any(|d| attached(d.result()))
            || lists.cursors.values().any(|c| attached(c.result()))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release every resource. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if sessions are still installed.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (dyns, cursors) = {
            let mut lists = self.lists.lock();
            let live = lists.sessions.iter().flatten().count();
            assert!(live == 0, "connection torn down with {live} live sessions");
            lists.sessions = Vec::new();
            (lists.dyns.drain(), lists.cursors.drain())
        };

        if let Some(mut authentication) = self.authentication.lock().take() {
            authentication.release();
        }

        let num_dyns = dyns.len();
        for entry in dyns {
            entry.detach_result();
            entry.mark_deallocated();
        }
        let num_cursors = cursors.len();
        for entry in cursors {
            entry.detach_result();
            entry.mark_deallocated();
        }

        if let Some(mut tls) = self.tls.lock().take() {
            if let Err(e) = tls.shutdown() {
                tracing::warn!(error = %e, "TLS shutdown failed");
            }
        }

        if let Some(mut transport) = self.writer.lock().transport.take() {
            if let Err(e) = transport.shutdown() {
                tracing::debug!(error = %e, "transport shutdown failed");
            }
        }
        {
            let mut reader = self.reader.lock();
            reader.transport = None;
            reader.buf.clear();
        }

        let queued = self.control.lock().clear();
        let cached = self.packet_cache.lock().clear();
        tracing::debug!(
            dynamics = num_dyns,
            cursors = num_cursors,
            queued,
            cached,
            "connection torn down"
        );
    }
}

fn write_frame(writer: &mut WriteHalf, packet: &Packet, end_of_message: bool) -> Result<()> {
    let WriteHalf {
        transport,
        codec,
        buf,
    } = writer;
    let transport = transport.as_mut().ok_or(Error::ConnectionClosed)?;
    buf.clear();
    codec.encode(packet, buf)?;
    transport.write_all(buf)?;
    transport.flush()?;
    if end_of_message {
        codec.reset_packet_id();
    }
    Ok(())
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.teardown();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("mars", &self.mars)
            .field("tds_version", &*self.tds_version.lock())
            .field("env", &*self.env.lock())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
