//! Collaborators a connection drives but does not implement.
//!
//! The byte stream, TLS and authentication are supplied from outside. Charset
//! state and the wakeup pair are owned here.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use encoding_rs::Encoding;

use crate::error::{Error, Result};

/// Byte stream a connection runs over.
pub trait Transport: Read + Write + Send {
    /// A second handle to the same stream, used by the reading side.
    fn try_clone_box(&self) -> io::Result<Box<dyn Transport>>;

    /// Bound how long a read may block. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Close both directions.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn try_clone_box(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn try_clone_box(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Established TLS state layered on the transport.
pub trait TlsSession: Send {
    /// Send close-notify and release the TLS state.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Authentication context kept for the life of the connection.
pub trait Authentication: Send {
    /// Release credentials and any security context.
    fn release(&mut self);
}

/// Whether an I/O error means a read timed out rather than failed.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Client and server charsets, validated against known encodings.
#[derive(Clone, Copy)]
pub struct CharsetState {
    client: &'static Encoding,
    server: &'static Encoding,
}

impl CharsetState {
    /// Resolve both labels. Fails on a label no encoding answers to.
    pub fn new(client: &str, server: Option<&str>) -> Result<Self> {
        let client = lookup_charset(client)?;
        let server = match server {
            Some(label) => lookup_charset(label)?,
            None => client,
        };
        Ok(Self { client, server })
    }

    /// Client-side encoding.
    #[must_use]
    pub fn client(&self) -> &'static Encoding {
        self.client
    }

    /// Server-side encoding.
    #[must_use]
    pub fn server(&self) -> &'static Encoding {
        self.server
    }

    /// Switch the server charset after an environment change.
    pub fn set_server(&mut self, label: &str) -> Result<()> {
        self.server = lookup_charset(label)?;
        Ok(())
    }
}

impl fmt::Debug for CharsetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharsetState")
            .field("client", &self.client.name())
            .field("server", &self.server.name())
            .finish()
    }
}

fn lookup_charset(label: &str) -> Result<&'static Encoding> {
    let normalised = match label.to_ascii_lowercase().as_str() {
        "iso_1" => "iso-8859-1",
        "utf8" => "utf-8",
        "cp1252" => "windows-1252",
        _ => label,
    };
    Encoding::for_label(normalised.as_bytes())
        .ok_or_else(|| Error::Config(format!("unknown charset: {label}")))
}

/// Wakeup primitive for interrupting a session waiting on the wire.
///
/// Sessions check it whenever a read times out, and MARS sessions also
/// before and after waiting for another session's read. Use
/// [`crate::Connection::interrupt`] to rouse sessions already waiting.
/// On unix the read end of a socket pair is exposed so callers polling the
/// transport themselves can include it.
pub struct Wakeup {
    signaled: AtomicBool,
    #[cfg(unix)]
    pair: (
        std::os::unix::net::UnixStream,
        std::os::unix::net::UnixStream,
    ),
}

impl Wakeup {
    /// Create the primitive.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            let (tx, rx) = std::os::unix::net::UnixStream::pair()?;
            tx.set_nonblocking(true)?;
            rx.set_nonblocking(true)?;
            Ok(Self {
                signaled: AtomicBool::new(false),
                pair: (tx, rx),
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {
                signaled: AtomicBool::new(false),
            })
        }
    }

    /// Raise the wakeup.
    pub fn notify(&self) {
        if !self.signaled.swap(true, Ordering::AcqRel) {
            #[cfg(unix)]
            {
                let _ = (&self.pair.0).write(&[1]);
            }
        }
    }

    /// Whether a wakeup is pending, without consuming it.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Consume a pending wakeup. Returns whether one was pending.
    pub fn take(&self) -> bool {
        if !self.signaled.swap(false, Ordering::AcqRel) {
            return false;
        }
        #[cfg(unix)]
        {
            let mut buf = [0u8; 16];
            while matches!((&self.pair.1).read(&mut buf), Ok(n) if n > 0) {}
        }
        true
    }

    /// Read end for external polling.
    #[cfg(unix)]
    #[must_use]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.pair.1.as_raw_fd()
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wakeup")
            .field("signaled", &self.signaled.load(Ordering::Relaxed))
            .finish()
    }
}
