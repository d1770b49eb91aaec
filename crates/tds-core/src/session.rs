//! Sessions: one request/response conversation each.
//!
//! A [`Session`] owns its output buffer, its current results and its
//! position in the state machine. Without MARS a connection carries exactly
//! one session. With MARS every session is enveloped by SMP and reads are
//! shared: whichever session holds the reader pumps frames into every
//! session's inbox, and the others wait on their condition variable.
//!
//! ```text
//! Dead --mark_connected--> Idle --put--> Writing --flush--> Sending
//!   ^                       ^  \                              |
//!   |                       |   `-------> Pending <-----------'
//!   `----- any (fatal) -----'    Reading <--'
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tds_codec::{Message, MessageAssembler, Packet, PacketChain};
use tds_protocol::{
    ADDITIONAL_SPACE, MAX_PACKET_SIZE, MIN_BLOCK_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, SMP_HEADER_SIZE, SmpFlags, SmpHeader,
};

use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::context::{Context, InterruptAction};
use crate::cursor::CursorHandle;
use crate::dynamic::DynamicHandle;
use crate::error::{Error, Result};
use crate::result::{ResultHandle, ResultShared};

/// Receive window granted with SYN and each time it is re-opened.
const RECV_WINDOW_STEP: u32 = 4;

/// Where a session is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected, or failed fatally.
    Dead,
    /// Nothing in flight.
    Idle,
    /// Building a request.
    Writing,
    /// A packet is going out.
    Sending,
    /// Request sent, reply not yet read.
    Pending,
    /// Reading a reply.
    Reading,
}

impl SessionState {
    /// Whether a live session may move from `self` to `to`.
    #[must_use]
    pub fn can_move_to(self, to: Self) -> bool {
        use SessionState::{Dead, Idle, Pending, Reading, Sending, Writing};
        match (self, to) {
            (_, Dead) => true,
            (Dead, _) => false,
            (Idle, Idle | Writing | Reading | Pending) => true,
            (Writing, Writing | Sending | Pending | Idle) => true,
            (Sending, Sending | Writing | Pending | Idle) => true,
            (Pending, Pending | Reading | Writing | Idle) => true,
            (Reading, Reading | Pending | Idle) => true,
            _ => false,
        }
    }
}

/// A server environment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database.
    Database(String),
    /// Current language.
    Language(String),
    /// Server charset.
    Charset(String),
    /// Negotiated packet size.
    PacketSize(usize),
}

#[derive(Default)]
struct Inbox {
    packets: PacketChain,
    closed: bool,
    waiting: bool,
}

/// The part of a session the connection can reach.
pub(crate) struct SessionShared {
    pub(crate) sid: u16,
    attachment: Mutex<Option<Weak<ResultShared>>>,
    inbox: Mutex<Inbox>,
    packet_cond: Condvar,
    send_wnd: AtomicU32,
}

impl SessionShared {
    pub(crate) fn new(sid: u16) -> Arc<Self> {
        Arc::new(Self {
            sid,
            attachment: Mutex::new(None),
            inbox: Mutex::new(Inbox::default()),
            packet_cond: Condvar::new(),
            send_wnd: AtomicU32::new(RECV_WINDOW_STEP),
        })
    }

    fn attached_result(&self) -> Option<Arc<ResultShared>> {
        self.attachment.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Clear the attachment if it points at `result`.
    pub(crate) fn clear_attachment_if(&self, result: *const ResultShared) {
        let mut attachment = self.attachment.lock();
        if attachment.as_ref().is_some_and(|w| w.as_ptr() == result) {
            *attachment = None;
        }
    }

    /// Accept a frame routed to this session. Control frames are absorbed
    /// and handed back for recycling.
    pub(crate) fn deliver(&self, packet: Packet) -> Option<Packet> {
        if let Some(envelope) = packet.envelope().copied() {
            if !envelope.flags.contains(SmpFlags::DATA) {
                if envelope.flags.contains(SmpFlags::ACK) {
                    self.send_wnd.store(envelope.window, Ordering::Release);
                }
                if envelope.flags.contains(SmpFlags::FIN) {
                    self.inbox.lock().closed = true;
                    self.packet_cond.notify_all();
                }
                tracing::trace!(sid = self.sid, flags = ?envelope.flags, "control frame");
                return Some(packet);
            }
        }
        self.inbox.lock().packets.push_back(packet);
        self.packet_cond.notify_one();
        None
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.inbox.lock().waiting
    }

    pub(crate) fn notify(&self) {
        let _inbox = self.inbox.lock();
        self.packet_cond.notify_all();
    }
}

/// One logical conversation with the server.
pub struct Session {
    conn: Option<Arc<Connection>>,
    shared: Arc<SessionShared>,
    state: SessionState,

    send_packet: Option<Packet>,
    frozen: PacketChain,
    frozen_depth: usize,
    assembler: MessageAssembler,
    out_flag: PacketType,
    block_size: usize,

    res_info: Option<ResultHandle>,
    param_info: Option<ResultHandle>,
    comp_info: Vec<ResultHandle>,
    has_status: bool,
    ret_status: i32,
    in_row: bool,

    cur_dyn: Option<DynamicHandle>,
    cur_cursor: Option<CursorHandle>,

    query_timeout: Option<Duration>,
    timeouts: u32,
    send_seq: u32,
    recv_seq: u32,
    recv_wnd: u32,
    freed: bool,
}

impl Session {
    /// Create a connection and its primary session.
    pub fn connect(context: Arc<Context>, options: ConnectionOptions) -> Result<Self> {
        let conn = Connection::new(context, options)?;
        Self::new(&conn)
    }

    /// Create the primary session (id 0) of `conn`. It starts out
    /// [`SessionState::Dead`] until [`Session::mark_connected`].
    pub fn new(conn: &Arc<Connection>) -> Result<Self> {
        let send_packet = Self::alloc_send_packet(conn)?;
        let shared = SessionShared::new(0);
        conn.install_primary(&shared)?;
        let mut session = Self::assemble(conn, shared, send_packet);
        session.open_smp()?;
        tracing::debug!(mars = conn.is_mars(), "primary session created");
        Ok(session)
    }

    /// Create another session on a live MARS connection.
    pub fn new_secondary(conn: &Arc<Connection>) -> Result<Self> {
        let version = conn.tds_version();
        if !version.supports_mars() {
            return Err(Error::UnsupportedVersion(version));
        }
        if !conn.is_mars() {
            return Err(Error::NotMultiplexed);
        }

        let send_packet = Self::alloc_send_packet(conn)?;
        let shared = conn.install_secondary(SessionShared::new)?;
        let mut session = Self::assemble(conn, shared, send_packet);
        if conn.is_connected() {
            session.state = SessionState::Idle;
        }
        session.open_smp()?;
        tracing::debug!(sid = session.sid(), "secondary session created");
        Ok(session)
    }

    fn alloc_send_packet(conn: &Connection) -> Result<Packet> {
        let reserved = if conn.is_mars() { SMP_HEADER_SIZE } else { 0 };
        let block_size = conn.block_size();
        Ok(Packet::with_reserved(
            reserved + block_size + ADDITIONAL_SPACE,
            reserved,
        )?)
    }

    fn assemble(conn: &Arc<Connection>, shared: Arc<SessionShared>, send_packet: Packet) -> Self {
        Self {
            conn: Some(Arc::clone(conn)),
            shared,
            state: SessionState::Dead,
            send_packet: Some(send_packet),
            frozen: PacketChain::new(),
            frozen_depth: 0,
            assembler: MessageAssembler::new(),
            out_flag: PacketType::SqlBatch,
            block_size: conn.block_size(),
            res_info: None,
            param_info: None,
            comp_info: Vec::new(),
            has_status: false,
            ret_status: 0,
            in_row: false,
            cur_dyn: None,
            cur_cursor: None,
            query_timeout: conn.query_timeout(),
            timeouts: 0,
            send_seq: 0,
            recv_seq: 0,
            recv_wnd: RECV_WINDOW_STEP,
            freed: false,
        }
    }

    /// Queue the SYN that opens this session's SMP stream.
    fn open_smp(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(());
        };
        if conn.is_mars() {
            let syn = conn.control_packet(SmpFlags::SYN, self.shared.sid, 0, self.recv_wnd)?;
            conn.queue_control(syn);
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Session id, 0 for the primary session.
    #[must_use]
    pub fn sid(&self) -> u16 {
        self.shared.sid
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Owning connection, `None` once closed.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.conn.as_ref()
    }

    /// Output packet size.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes written into the current output packet, header included.
    #[must_use]
    pub fn pending_output(&self) -> usize {
        self.send_packet.as_ref().map_or(0, Packet::data_len)
    }

    /// Consecutive read timeouts since the last successful read.
    #[must_use]
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    /// Per-read timeout.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    /// Override the per-read timeout.
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    /// Sequence number of the last DATA frame sent.
    #[must_use]
    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    /// Sequence number of the last DATA frame received.
    #[must_use]
    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    /// Receive window last granted to the server.
    #[must_use]
    pub fn recv_window(&self) -> u32 {
        self.recv_wnd
    }

    /// Send window last granted by the server.
    #[must_use]
    pub fn send_window(&self) -> u32 {
        self.shared.send_wnd.load(Ordering::Acquire)
    }

    /// Whether a return status was received.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.has_status.then_some(self.ret_status)
    }

    /// Record a procedure return status.
    pub fn set_return_status(&mut self, status: i32) {
        self.has_status = true;
        self.ret_status = status;
    }

    /// Whether the current results are positioned on a row.
    #[must_use]
    pub fn in_row(&self) -> bool {
        self.in_row
    }

    /// Mark whether the current results are positioned on a row.
    pub fn set_in_row(&mut self, in_row: bool) {
        self.in_row = in_row;
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Move to `to`. Any state may move to [`SessionState::Dead`]; a dead
    /// session stays dead.
    pub fn set_state(&mut self, to: SessionState) -> Result<()> {
        if to == SessionState::Dead {
            if self.state != SessionState::Dead {
                tracing::debug!(sid = self.sid(), from = ?self.state, "session dead");
            }
            self.state = SessionState::Dead;
            return Ok(());
        }
        if self.state == SessionState::Dead {
            return Err(Error::SessionDead);
        }
        if !self.state.can_move_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(sid = self.sid(), from = ?self.state, to = ?to, "state change");
        self.state = to;
        Ok(())
    }

    /// Bring a dead session to [`SessionState::Idle`] once the connection
    /// has a transport.
    pub fn mark_connected(&mut self) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::SessionDead)?;
        if !conn.is_connected() {
            return Err(Error::ConnectionClosed);
        }
        if self.state == SessionState::Dead {
            self.state = SessionState::Idle;
        }
        Ok(())
    }

    fn live_connection(&self) -> Result<Arc<Connection>> {
        if self.state == SessionState::Dead {
            return Err(Error::SessionDead);
        }
        self.conn.clone().ok_or(Error::SessionDead)
    }

    fn fail(&mut self, err: Error) -> Error {
        if err.is_io() || matches!(err, Error::ConnectionClosed | Error::SessionClosed(_)) {
            self.state = SessionState::Dead;
        }
        err
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Start a new outgoing message of `packet_type`.
    pub fn start_message(&mut self, packet_type: PacketType) -> Result<()> {
        self.live_connection()?;
        if matches!(self.state, SessionState::Idle | SessionState::Pending) {
            self.set_state(SessionState::Writing)?;
        }
        self.out_flag = packet_type;
        Ok(())
    }

    /// Append bytes to the outgoing message, sending each packet as it
    /// fills.
    pub fn put_bytes(&mut self, mut bytes: &[u8]) -> Result<()> {
        self.live_connection()?;
        if matches!(self.state, SessionState::Idle | SessionState::Pending) {
            self.set_state(SessionState::Writing)?;
        }

        while !bytes.is_empty() {
            let block_size = self.block_size;
            let packet = self.send_packet.as_mut().ok_or(Error::SessionDead)?;
            if packet.data_len() == 0 {
                packet.extend(&[0u8; PACKET_HEADER_SIZE])?;
            }
            let room = block_size.saturating_sub(packet.data_len());
            if room == 0 {
                self.flush(false)?;
                continue;
            }
            let n = room.min(bytes.len());
            packet.extend(&bytes[..n])?;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Send the current packet. `end_of_message` marks the last packet of
    /// the request and leaves the session [`SessionState::Pending`].
    ///
    /// While output is frozen the packet is held back instead.
    pub fn flush(&mut self, end_of_message: bool) -> Result<()> {
        let conn = self.live_connection()?;
        let sid = self.sid();
        let mut packet = self.send_packet.take().ok_or(Error::SessionDead)?;

        if packet.data_len() == 0 {
            if let Err(e) = packet.extend(&[0u8; PACKET_HEADER_SIZE]) {
                self.send_packet = Some(packet);
                return Err(e.into());
            }
        }
        let status = if end_of_message {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let length = u16::try_from(packet.data_len()).unwrap_or(u16::MAX);
        let header = PacketHeader::new(self.out_flag, status, length);
        packet.data_mut()[..PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        if conn.is_mars() {
            self.send_seq = self.send_seq.wrapping_add(1);
            packet.set_sid(sid);
            packet.set_envelope(Some(SmpHeader::new(
                SmpFlags::DATA,
                sid,
                packet.data_len(),
                self.send_seq,
                self.recv_wnd,
            )));
        }

        if self.frozen_depth > 0 {
            let replacement = Self::alloc_send_packet(&conn);
            self.frozen.push_back(packet);
            self.send_packet = Some(replacement?);
            tracing::trace!(sid, held = self.frozen.len(), "output held while frozen");
            return Ok(());
        }

        if self.state != SessionState::Sending {
            self.set_state(SessionState::Sending)?;
        }
        let written = conn
            .flush_queued()
            .and_then(|()| conn.write_packet(&packet, end_of_message));
        packet.clear();
        packet.set_envelope(None);
        self.send_packet = Some(packet);

        match written {
            Ok(()) => {
                self.state = if end_of_message {
                    SessionState::Pending
                } else {
                    SessionState::Writing
                };
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Hold back output packets until the matching [`Session::thaw`].
    /// Freezing nests.
    pub fn freeze(&mut self) {
        self.frozen_depth += 1;
    }

    /// Whether output is frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen_depth > 0
    }

    /// Undo one [`Session::freeze`]. The outermost thaw sends everything
    /// held back, in order.
    pub fn thaw(&mut self) -> Result<()> {
        if self.frozen_depth == 0 {
            return Ok(());
        }
        self.frozen_depth -= 1;
        if self.frozen_depth > 0 || self.frozen.is_empty() {
            return Ok(());
        }

        let conn = self.live_connection()?;
        let mut last_eom = false;
        let mut sent = conn.flush_queued();
        while sent.is_ok() {
            let Some(packet) = self.frozen.pop_front() else {
                break;
            };
            last_eom = packet
                .data()
                .get(1)
                .is_some_and(|status| status & PacketStatus::END_OF_MESSAGE.bits() != 0);
            sent = conn.write_packet(&packet, last_eom);
            conn.recycle(packet);
        }
        match sent {
            Ok(()) => {
                self.state = if last_eom {
                    SessionState::Pending
                } else {
                    SessionState::Writing
                };
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Resize the output buffer to `new_size`.
    ///
    /// Refused outside [`MIN_BLOCK_SIZE`]..=[`MAX_PACKET_SIZE`], while
    /// frozen, or when more output is pending than would fit.
    pub fn resize_buffers(&mut self, new_size: usize) -> Result<()> {
        if new_size < MIN_BLOCK_SIZE {
            return Err(Error::BlockSizeTooSmall {
                requested: new_size,
                minimum: MIN_BLOCK_SIZE,
            });
        }
        if new_size > MAX_PACKET_SIZE {
            return Err(Error::BlockSizeTooLarge {
                requested: new_size,
                maximum: MAX_PACKET_SIZE,
            });
        }
        if self.frozen_depth > 0 {
            return Err(Error::Frozen);
        }
        let packet = self.send_packet.as_mut().ok_or(Error::SessionDead)?;
        if packet.data_len() > new_size {
            return Err(Error::PendingOutput {
                pending: packet.data_len(),
                requested: new_size,
            });
        }
        packet.grow(packet.reserved() + new_size + ADDITIONAL_SPACE)?;
        self.block_size = new_size;
        if let Some(conn) = self.conn.as_ref() {
            conn.env().block_size = new_size;
        }
        tracing::debug!(sid = self.sid(), block_size = new_size, "buffers resized");
        Ok(())
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Read the next packet addressed to this session.
    ///
    /// A read that times out consults the interrupt handler, which decides
    /// between waiting again and giving up with [`Error::Timeout`]. A
    /// pending wakeup gives up immediately. A MARS session parked behind
    /// another session's read is woken by [`Connection::interrupt`]; a read
    /// blocked on the transport itself only notices the wakeup once its
    /// query timeout expires.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let conn = self.live_connection()?;
        if self.state != SessionState::Reading {
            self.set_state(SessionState::Reading)?;
        }

        loop {
            let outcome = if conn.is_mars() {
                self.read_mars(&conn)
            } else {
                let mut reader = conn.lock_reader();
                conn.read_frame(&mut reader, self.query_timeout)
            };

            match outcome {
                Ok(Some(packet)) => {
                    self.timeouts = 0;
                    if conn.is_mars() {
                        self.data_received(&conn, &packet)?;
                    }
                    return Ok(packet);
                }
                Ok(None) => {
                    self.timeouts += 1;
                    let cancel = conn.wakeup().take()
                        || conn.context().check_interrupt(self.sid(), self.timeouts)
                            == InterruptAction::Cancel;
                    tracing::debug!(sid = self.sid(), timeouts = self.timeouts, cancel, "read timed out");
                    if cancel {
                        return Err(Error::Timeout {
                            timeouts: self.timeouts,
                        });
                    }
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn read_mars(&self, conn: &Connection) -> Result<Option<Packet>> {
        let shared = &self.shared;
        loop {
            {
                let mut inbox = shared.inbox.lock();
                if let Some(packet) = inbox.packets.pop_front() {
                    return Ok(Some(packet));
                }
                if inbox.closed {
                    return Err(Error::SessionClosed(shared.sid));
                }
            }

            if let Some(mut reader) = conn.try_lock_reader() {
                let pumped = conn.pump(&mut reader, self.query_timeout);
                drop(reader);
                conn.wake_next_reader(shared.sid);
                if !pumped? {
                    return Ok(None);
                }
                continue;
            }

            let mut inbox = shared.inbox.lock();
            if !inbox.packets.is_empty() || inbox.closed {
                continue;
            }
            // Checked under the inbox lock so an interrupt cannot slip in
            // between this test and the wait.
            if conn.wakeup().is_pending() {
                return Ok(None);
            }
            inbox.waiting = true;
            // The reader may have been released since the try_lock above.
            if !conn.reader_busy() {
                inbox.waiting = false;
                continue;
            }
            let timed_out = match self.query_timeout {
                Some(timeout) => shared.packet_cond.wait_for(&mut inbox, timeout).timed_out(),
                None => {
                    shared.packet_cond.wait(&mut inbox);
                    false
                }
            };
            inbox.waiting = false;
            let interrupted = conn.wakeup().is_pending();
            if (timed_out || interrupted) && inbox.packets.is_empty() && !inbox.closed {
                return Ok(None);
            }
        }
    }

    /// Track the sequence number of a DATA frame and re-open the receive
    /// window when it is nearly used up.
    fn data_received(&mut self, conn: &Connection, packet: &Packet) -> Result<()> {
        self.recv_seq = match packet.envelope() {
            Some(envelope) => envelope.seq,
            None => self.recv_seq.wrapping_add(1),
        };
        if self.recv_seq.wrapping_add(2) >= self.recv_wnd {
            self.recv_wnd = self.recv_seq.wrapping_add(RECV_WINDOW_STEP);
            let ack = conn.control_packet(SmpFlags::ACK, self.sid(), self.send_seq, self.recv_wnd)?;
            conn.queue_control(ack);
            tracing::trace!(sid = self.sid(), window = self.recv_wnd, "receive window re-opened");
        }
        Ok(())
    }

    /// Read packets until a whole message has arrived. The session goes
    /// back to [`SessionState::Idle`].
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            let packet = self.read_packet()?;
            let assembled = self.assembler.push(&packet);
            if let Some(conn) = self.conn.as_ref() {
                conn.recycle(packet);
            }
            if let Some(message) = assembled? {
                self.set_state(SessionState::Idle)?;
                return Ok(message);
            }
        }
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Make `result` the session's current results, or clear them.
    ///
    /// Any previous attachment on either side is undone first, so a result
    /// is attached to at most one session and a session to at most one
    /// result.
    pub fn set_current_results(&mut self, result: Option<&ResultHandle>) {
        let previous = self.shared.attachment.lock().take();
        if let Some(previous) = previous.and_then(|w| w.upgrade()) {
            previous.clear_attached_if(Arc::as_ptr(&self.shared));
        }

        if let Some(result) = result {
            let other = result.0.take_attached();
            if let Some(other) = other.and_then(|w| w.upgrade()) {
                other.clear_attachment_if(Arc::as_ptr(&result.0));
            }
            result.0.set_attached(Some(Arc::downgrade(&self.shared)));
            *self.shared.attachment.lock() = Some(result.downgrade());
        }
        self.in_row = false;
    }

    /// Results currently attached to this session.
    #[must_use]
    pub fn current_results(&self) -> Option<ResultHandle> {
        self.shared.attached_result().map(ResultHandle)
    }

    /// Result description owned by the session.
    #[must_use]
    pub fn results(&self) -> Option<&ResultHandle> {
        self.res_info.as_ref()
    }

    /// Replace the result description owned by the session.
    pub fn set_results(&mut self, result: Option<ResultHandle>) {
        self.res_info = result;
    }

    /// Output parameters.
    #[must_use]
    pub fn params(&self) -> Option<&ResultHandle> {
        self.param_info.as_ref()
    }

    /// Replace the output parameters.
    pub fn set_params(&mut self, params: Option<ResultHandle>) {
        self.param_info = params;
    }

    /// Compute results, in arrival order.
    #[must_use]
    pub fn compute_results(&self) -> &[ResultHandle] {
        &self.comp_info
    }

    /// Add a compute result with `num_cols` columns grouped by `by_cols`.
    pub fn alloc_compute_results(&mut self, num_cols: usize, by_cols: &[u16]) -> Result<ResultHandle> {
        self.comp_info
            .try_reserve(1)
            .map_err(|_| Error::Allocation { requested: 1 })?;
        let result = ResultHandle::new_compute(num_cols, by_cols)?;
        self.comp_info.push(result.clone());
        Ok(result)
    }

    /// Drop every result the session holds and clear the current results.
    pub fn free_all_results(&mut self) {
        self.set_current_results(None);
        self.res_info = None;
        self.param_info = None;
        self.comp_info.clear();
        self.has_status = false;
        self.ret_status = 0;
        if let Some(dynamic) = self.cur_dyn.as_ref() {
            dynamic.0.detach_result();
        }
        tracing::trace!(sid = self.sid(), "results freed");
    }

    // ========================================================================
    // Environment and handles
    // ========================================================================

    /// Apply an environment change reported by the server.
    pub fn apply_env_change(&mut self, change: EnvChange) -> Result<()> {
        let conn = self.conn.clone().ok_or(Error::SessionDead)?;
        tracing::debug!(sid = self.sid(), change = ?change, "environment change");
        match change {
            EnvChange::Database(name) => conn.env().database = Some(name),
            EnvChange::Language(name) => conn.env().language = Some(name),
            EnvChange::Charset(label) => {
                conn.set_server_charset(&label)?;
                conn.env().charset = Some(label);
            }
            EnvChange::PacketSize(size) => self.resize_buffers(size)?,
        }
        Ok(())
    }

    /// Prepared statement being executed.
    #[must_use]
    pub fn current_dynamic(&self) -> Option<&DynamicHandle> {
        self.cur_dyn.as_ref()
    }

    /// Set the prepared statement being executed.
    pub fn set_current_dynamic(&mut self, dynamic: Option<DynamicHandle>) {
        self.cur_dyn = dynamic;
    }

    /// Cursor being operated on.
    #[must_use]
    pub fn current_cursor(&self) -> Option<&CursorHandle> {
        self.cur_cursor.as_ref()
    }

    /// Set the cursor being operated on.
    pub fn set_current_cursor(&mut self, cursor: Option<CursorHandle>) {
        self.cur_cursor = cursor;
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Close the session. The last session out closes the connection.
    /// Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;

        self.cur_dyn = None;
        self.cur_cursor = None;
        self.free_all_results();

        if let Some(conn) = self.conn.as_ref() {
            debug_assert!(
                !conn.registry_result_attached_to(&self.shared),
                "registry result still attached to closing session"
            );
        }

        self.send_packet = None;
        let held = self.frozen.clear();
        let unread = self.shared.inbox.lock().packets.clear();
        self.assembler.clear();
        self.state = SessionState::Dead;

        let sid = self.sid();
        if let Some(conn) = self.conn.take() {
            let fin = if conn.is_mars() && !conn.is_closed() {
                conn.control_packet(SmpFlags::FIN, sid, self.send_seq, self.recv_wnd)
                    .inspect_err(|e| tracing::warn!(sid, error = %e, "cannot build session FIN"))
                    .ok()
            } else {
                None
            };
            conn.remove_session(sid, fin);
        }
        tracing::debug!(sid, held, unread, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.shared.sid)
            .field("state", &self.state)
            .field("block_size", &self.block_size)
            .field("frozen_depth", &self.frozen_depth)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Idle.can_move_to(Writing));
        assert!(Writing.can_move_to(Sending));
        assert!(Sending.can_move_to(Pending));
        assert!(Pending.can_move_to(Reading));
        assert!(Reading.can_move_to(Idle));
        assert!(Reading.can_move_to(Dead));

        assert!(!Dead.can_move_to(Idle));
        assert!(!Reading.can_move_to(Writing));
        assert!(!Idle.can_move_to(Sending));
    }

    #[test]
    fn test_deliver_routes_control_frames() {
        let shared = SessionShared::new(3);

        let mut ack = Packet::allocate(0, None).unwrap();
        ack.set_envelope(Some(SmpHeader::new(SmpFlags::ACK, 3, 0, 0, 9)));
        assert!(shared.deliver(ack).is_some());
        assert_eq!(shared.send_wnd.load(Ordering::Acquire), 9);

        let mut data = Packet::allocate(16, Some(&[0u8; 8][..])).unwrap();
        data.set_envelope(Some(SmpHeader::new(SmpFlags::DATA, 3, 8, 1, 4)));
        assert!(shared.deliver(data).is_none());
        assert_eq!(shared.inbox.lock().packets.len(), 1);

        let mut fin = Packet::allocate(0, None).unwrap();
        fin.set_envelope(Some(SmpHeader::new(SmpFlags::FIN, 3, 0, 0, 0)));
        assert!(shared.deliver(fin).is_some());
        assert!(shared.inbox.lock().closed);
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_wakes_parked_reader() {
        let options = ConnectionOptions {
            mars: true,
            ..ConnectionOptions::default()
        };
        let primary = Session::connect(Arc::new(Context::default()), options).unwrap();
        let conn = Arc::clone(primary.connection().unwrap());
        let (ours, _theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        conn.attach_transport(Box::new(ours)).unwrap();

        let mut second = Session::new_secondary(&conn).unwrap();
        assert_eq!(second.query_timeout(), None);
        let shared = Arc::clone(&second.shared);

        // Another reader owns the wire, so the session parks on its condvar.
        let reader = conn.lock_reader();
        let waiter = std::thread::spawn(move || {
            let outcome = second.read_packet();
            (second, outcome)
        });
        while !shared.is_waiting() {
            std::thread::yield_now();
        }
        conn.interrupt();

        let (second, outcome) = waiter.join().unwrap();
        drop(reader);
        assert!(matches!(outcome, Err(Error::Timeout { timeouts: 1 })));
        assert!(!conn.wakeup().is_pending());
        drop(second);
        drop(primary);
    }

    #[test]
    fn test_clear_attachment_only_for_matching_result() {
        let shared = SessionShared::new(0);
        let result = ResultHandle::new(1).unwrap();
        let other = ResultHandle::new(1).unwrap();
        *shared.attachment.lock() = Some(result.downgrade());

        shared.clear_attachment_if(Arc::as_ptr(&other.0));
        assert!(shared.attached_result().is_some());
        shared.clear_attachment_if(Arc::as_ptr(&result.0));
        assert!(shared.attached_result().is_none());
    }
}
