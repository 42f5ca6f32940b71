//! Transport plugins: plaintext and encrypted sessions
//!
//! Every backend implements the same non-blocking contract (`Transport`),
//! so the connection state machine never knows whether it talks over a
//! plain socket or over TLS. The backend is chosen once per daemon
//! (`Backend`) and each accepted connection gets its own `Session`.
//!
//! Sockets are expected to be non-blocking: a socket that can't make
//! progress must return `io::ErrorKind::WouldBlock`, which is reported as
//! `Progress::WouldBlock` and is never an error.
use std::io;
use std::fmt;
use std::net::{Shutdown, TcpStream};

pub mod plain;
#[cfg(feature="tls")] pub mod tls;

pub use self::plain::PlainSession;
#[cfg(feature="tls")] pub use self::tls::{TlsBackend, TlsConfig, TlsSession};
#[cfg(feature="tls")] pub use self::tls::PemSource;


quick_error! {
    /// Error of a transport session
    #[derive(Debug)]
    pub enum TransportError {
        Io(err: io::Error) {
            from()
            display("transport I/O error: {}", err)
            source(err)
        }
        /// The session is `Closed` or in `Error` state
        Terminal {
            display("transport session is already terminated")
        }
        /// `Backend::session()` called before `init_certificate()`
        NotInitialized {
            display("transport backend is not initialized")
        }
        Certificate(msg: String) {
            display("certificate setup failed: {}", msg)
        }
        Handshake(msg: String) {
            display("handshake failed: {}", msg)
        }
        /// Protocol level failure reported by the TLS library
        Tls(msg: String) {
            display("TLS error: {}", msg)
        }
    }
}

/// Result of a single non-blocking send or receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// This many bytes were transferred
    Bytes(usize),
    /// Nothing can be transferred right now, retry when socket is ready
    WouldBlock,
    /// The peer has closed its side (receive only)
    PeerClosed,
}

/// Result of a handshake step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Done,
    /// Waiting for data from the peer
    WantRead,
    /// Waiting for the socket to accept pending data
    WantWrite,
}

/// State of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No I/O attempted yet
    Init,
    Handshaking,
    /// Application data may flow
    Connected,
    /// Local side has sent close, reads may still drain
    WriteClosed,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(*self, SessionState::Closed | SessionState::Error)
    }
}

/// Protocol negotiated by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Plain,
    Tls12,
    Tls13,
    /// Some other TLS version, by its wire code
    Other(u16),
}

/// A byte stream a session can run over
pub trait Socket: io::Read + io::Write {
    /// Shuts down the writing half of the stream
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

#[cfg(unix)]
impl Socket for std::os::unix::net::UnixStream {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl<S: Socket + ?Sized> Socket for Box<S> {
    fn shutdown_write(&mut self) -> io::Result<()> {
        (**self).shutdown_write()
    }
}

/// Sink for diagnostics produced by backend initialization
pub trait Diagnostics {
    fn report(&mut self, message: &str);
}

/// Forwards diagnostics to the `log` crate at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Diagnostics for LogSink {
    fn report(&mut self, message: &str) {
        error!("{}", message);
    }
}

impl Diagnostics for Vec<String> {
    fn report(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

/// The contract every transport backend satisfies
///
/// All I/O methods are non-blocking and report partial progress exactly.
/// Once the session is in a terminal state every I/O method returns
/// `TransportError::Terminal` and does nothing.
pub trait Transport {
    fn state(&self) -> SessionState;

    /// Advances the handshake by as much as the socket allows
    ///
    /// Safe to call repeatedly, returns `Handshake::Done` once connected.
    fn run_handshake(&mut self, sock: &mut dyn Socket)
        -> Result<Handshake, TransportError>;

    /// Sends some of `buf`, returns number of bytes accepted
    fn record_send(&mut self, sock: &mut dyn Socket, buf: &[u8])
        -> Result<Progress, TransportError>;

    /// Receives some bytes into `buf`
    fn record_recv(&mut self, sock: &mut dyn Socket, buf: &mut [u8])
        -> Result<Progress, TransportError>;

    /// Writes out data buffered inside the backend
    ///
    /// Returns `true` when nothing is left to write.
    fn flush(&mut self, _sock: &mut dyn Socket)
        -> Result<bool, TransportError>
    {
        Ok(true)
    }

    /// Initiates orderly close of the sending side
    fn connection_shutdown(&mut self, sock: &mut dyn Socket)
        -> Result<(), TransportError>;

    /// Marks the session as finished, no I/O is done
    fn close(&mut self);

    /// Negotiated protocol, `None` until connected
    fn get_version(&self) -> Option<ProtocolVersion>;
}

/// A transport session of one connection, for any compiled-in backend
pub enum Session {
    Plain(PlainSession),
    #[cfg(feature="tls")]
    Tls(TlsSession),
}

macro_rules! dispatch {
    ($me:expr, $s:ident => $body:expr) => {
        match $me {
            Session::Plain($s) => $body,
            #[cfg(feature="tls")]
            Session::Tls($s) => $body,
        }
    }
}

impl Transport for Session {
    fn state(&self) -> SessionState {
        dispatch!(self, s => s.state())
    }
    fn run_handshake(&mut self, sock: &mut dyn Socket)
        -> Result<Handshake, TransportError>
    {
        dispatch!(self, s => s.run_handshake(sock))
    }
    fn record_send(&mut self, sock: &mut dyn Socket, buf: &[u8])
        -> Result<Progress, TransportError>
    {
        dispatch!(self, s => s.record_send(sock, buf))
    }
    fn record_recv(&mut self, sock: &mut dyn Socket, buf: &mut [u8])
        -> Result<Progress, TransportError>
    {
        dispatch!(self, s => s.record_recv(sock, buf))
    }
    fn flush(&mut self, sock: &mut dyn Socket)
        -> Result<bool, TransportError>
    {
        dispatch!(self, s => s.flush(sock))
    }
    fn connection_shutdown(&mut self, sock: &mut dyn Socket)
        -> Result<(), TransportError>
    {
        dispatch!(self, s => s.connection_shutdown(sock))
    }
    fn close(&mut self) {
        dispatch!(self, s => s.close())
    }
    fn get_version(&self) -> Option<ProtocolVersion> {
        dispatch!(self, s => s.get_version())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Session::Plain(_) => "Plain",
            #[cfg(feature="tls")]
            Session::Tls(_) => "Tls",
        };
        f.debug_struct("Session")
            .field("backend", &name)
            .field("state", &self.state())
            .finish()
    }
}

/// The transport backend of a daemon
///
/// Exactly one backend is active per daemon. It is initialized once with
/// `init_certificate()` and then hands out a fresh session per connection.
pub enum Backend {
    Plain,
    #[cfg(feature="tls")]
    Tls(TlsBackend),
}

impl Backend {
    /// One-time backend setup (certificates, trust store)
    ///
    /// Problems are reported to `sink` in addition to the returned error.
    /// This is a no-op for the plaintext backend.
    pub fn init_certificate(&mut self, sink: &mut dyn Diagnostics)
        -> Result<(), TransportError>
    {
        match *self {
            Backend::Plain => Ok(()),
            #[cfg(feature="tls")]
            Backend::Tls(ref mut tls) => tls.init_certificate(sink),
        }
    }
    /// Creates a session for a freshly accepted connection
    pub fn session(&self) -> Result<Session, TransportError> {
        match *self {
            Backend::Plain => Ok(Session::Plain(PlainSession::new())),
            #[cfg(feature="tls")]
            Backend::Tls(ref tls) => tls.session().map(Session::Tls),
        }
    }
    pub fn name(&self) -> &'static str {
        match *self {
            Backend::Plain => "plain",
            #[cfg(feature="tls")]
            Backend::Tls(_) => "rustls",
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.name()).finish()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::io::{self, Read, Write};
    use std::collections::VecDeque;

    use super::Socket;

    /// In-memory socket which hands out input in the fragments it was
    /// given and may limit the number of bytes written per call
    #[derive(Debug, Default)]
    pub struct MockSocket {
        pub input: VecDeque<Vec<u8>>,
        pub output: Vec<u8>,
        pub eof: bool,
        pub write_limit: Option<usize>,
        pub write_blocked: bool,
        pub shut_down: bool,
    }

    impl MockSocket {
        pub fn new() -> MockSocket {
            MockSocket::default()
        }
        pub fn feed(&mut self, data: &[u8]) {
            self.input.push_back(data.to_vec());
        }
    }

    impl Read for MockSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.input.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_blocked {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = self.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Socket for MockSocket {
        fn shutdown_write(&mut self) -> io::Result<()> {
            self.shut_down = true;
            Ok(())
        }
    }
}
