//! TLS backend built on `rustls`
//!
//! The session keeps rustls' own buffers between calls: ciphertext which
//! could not be written because the socket would block stays queued inside
//! the connection and is pushed out before anything else on the next call.
use std::io::{self, BufRead, Read, Write};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use rustls::ServerConnection;
use rustls::server::AllowAnyAuthenticatedClient;
use rustls_pemfile::{read_one, Item};

use super::{Transport, Socket, SessionState, Handshake, Progress};
use super::{ProtocolVersion, TransportError, Diagnostics};


/// Location of a PEM encoded input
#[derive(Clone)]
pub enum PemSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl fmt::Debug for PemSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PemSource::File(ref path) => {
                f.debug_tuple("File").field(path).finish()
            }
            // never print key material
            PemSource::Memory(ref data) => {
                write!(f, "Memory({} bytes)", data.len())
            }
        }
    }
}

impl PemSource {
    fn describe(&self) -> String {
        match *self {
            PemSource::File(ref path) => format!("'{}'", path.display()),
            PemSource::Memory(_) => String::from("in-memory PEM"),
        }
    }
    fn items(&self) -> Result<Vec<Item>, String> {
        let items = match *self {
            PemSource::File(ref path) => {
                let file = File::open(path).map_err(|e| {
                    format!("failed to open {}: {}", self.describe(), e)
                })?;
                read_items(&mut io::BufReader::new(file))
            }
            PemSource::Memory(ref data) => read_items(&mut &data[..]),
        };
        items.map_err(|e| format!("failed to read {}: {}", self.describe(), e))
    }
}

fn read_items(rd: &mut dyn BufRead) -> io::Result<Vec<Item>> {
    let mut items = Vec::new();
    while let Some(item) = read_one(rd)? {
        items.push(item);
    }
    Ok(items)
}

/// Settings of the TLS backend
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Certificate chain, leaf first
    pub certificate: PemSource,
    /// Private key in PKCS#8, PKCS#1 or SEC1 format
    pub private_key: PemSource,
    /// When set, clients must present a certificate signed by one of these
    pub client_roots: Option<PemSource>,
    /// Limit of plaintext buffered inside a session for sending
    pub buffer_limit: Option<usize>,
}

impl TlsConfig {
    pub fn new(certificate: PemSource, private_key: PemSource) -> TlsConfig {
        TlsConfig {
            certificate,
            private_key,
            client_roots: None,
            buffer_limit: Some(64*1024),
        }
    }
    fn load_certs(&self) -> Result<Vec<Certificate>, String> {
        let certs = self.certificate.items()?.into_iter()
            .filter_map(|item| match item {
                Item::X509Certificate(der) => Some(Certificate(der)),
                _ => None,
            })
            .collect::<Vec<_>>();
        if certs.is_empty() {
            return Err(format!("{} contains no certificates",
                               self.certificate.describe()));
        }
        Ok(certs)
    }
    fn load_key(&self) -> Result<PrivateKey, String> {
        let mut keys = self.private_key.items()?.into_iter()
            .filter_map(|item| match item {
                Item::PKCS8Key(der) => Some(der),
                Item::RSAKey(der) => Some(der),
                Item::ECKey(der) => Some(der),
                _ => None,
            })
            .collect::<Vec<_>>();
        match keys.len() {
            0 => Err(format!("{} contains no usable private key",
                             self.private_key.describe())),
            1 => Ok(PrivateKey(keys.remove(0))),
            _ => Err(format!("{} contains multiple private keys",
                             self.private_key.describe())),
        }
    }
    fn load_roots(source: &PemSource) -> Result<RootCertStore, String> {
        let mut roots = RootCertStore::empty();
        for item in source.items()? {
            if let Item::X509Certificate(der) = item {
                roots.add(&Certificate(der)).map_err(|e| {
                    format!("bad client root in {}: {}",
                            source.describe(), e)
                })?;
            }
        }
        if roots.is_empty() {
            return Err(format!("{} contains no client roots",
                               source.describe()));
        }
        Ok(roots)
    }
    fn server_config(&self) -> Result<ServerConfig, String> {
        let certs = self.load_certs()?;
        let key = self.load_key()?;
        let builder = ServerConfig::builder().with_safe_defaults();
        let builder = match self.client_roots {
            Some(ref source) => {
                let roots = TlsConfig::load_roots(source)?;
                builder.with_client_cert_verifier(
                    AllowAnyAuthenticatedClient::new(roots).boxed())
            }
            None => builder.with_no_client_auth(),
        };
        builder.with_single_cert(certs, key)
            .map_err(|e| format!("certificate and key rejected: {}", e))
    }
}

/// The rustls backend
///
/// Holds the server configuration shared by all sessions once
/// `init_certificate` succeeded.
pub struct TlsBackend {
    config: TlsConfig,
    server: Option<Arc<ServerConfig>>,
}

impl TlsBackend {
    pub fn new(config: TlsConfig) -> TlsBackend {
        TlsBackend { config, server: None }
    }
    pub fn is_initialized(&self) -> bool {
        self.server.is_some()
    }
    pub fn init_certificate(&mut self, sink: &mut dyn Diagnostics)
        -> Result<(), TransportError>
    {
        match self.config.server_config() {
            Ok(server) => {
                debug!("TLS backend initialized, client auth: {}",
                       self.config.client_roots.is_some());
                self.server = Some(Arc::new(server));
                Ok(())
            }
            Err(msg) => {
                sink.report(&format!("TLS initialization failed: {}", msg));
                Err(TransportError::Certificate(msg))
            }
        }
    }
    pub fn session(&self) -> Result<TlsSession, TransportError> {
        let server = match self.server {
            Some(ref server) => server.clone(),
            None => return Err(TransportError::NotInitialized),
        };
        let mut conn = ServerConnection::new(server)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        conn.set_buffer_limit(self.config.buffer_limit);
        Ok(TlsSession {
            conn,
            state: SessionState::Init,
            require_client_cert: self.config.client_roots.is_some(),
            version: None,
        })
    }
}

impl fmt::Debug for TlsBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsBackend")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Adapts a socket trait object to the `Read`/`Write` objects rustls wants
struct SockIo<'a>(&'a mut dyn Socket);

impl<'a> Read for SockIo<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<'a> Write for SockIo<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Session of the rustls backend
pub struct TlsSession {
    conn: ServerConnection,
    state: SessionState,
    require_client_cert: bool,
    version: Option<ProtocolVersion>,
}

impl TlsSession {
    fn fail(&mut self, err: TransportError) -> TransportError {
        debug!("TLS session failed: {}", err);
        self.state = SessionState::Error;
        err
    }
    fn check_live(&self) -> Result<(), TransportError> {
        if self.state.is_terminal() {
            Err(TransportError::Terminal)
        } else {
            Ok(())
        }
    }
    /// Pushes queued ciphertext to the socket, `false` if some is left
    fn write_pending(&mut self, sock: &mut dyn Socket)
        -> Result<bool, TransportError>
    {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut SockIo(&mut *sock)) {
                Ok(0) => {
                    let err = io::ErrorKind::WriteZero.into();
                    return Err(self.fail(TransportError::Io(err)));
                }
                Ok(n) => trace!("TLS wrote {} bytes", n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(TransportError::Io(e))),
            }
        }
        Ok(true)
    }
    /// Reads ciphertext from the socket and decrypts it
    ///
    /// Returns `false` if the socket had nothing to offer.
    fn read_packets(&mut self, sock: &mut dyn Socket)
        -> Result<bool, TransportError>
    {
        loop {
            match self.conn.read_tls(&mut SockIo(&mut *sock)) {
                Ok(n) => {
                    trace!("TLS read {} bytes", n);
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(TransportError::Io(e))),
            }
        }
        if let Err(e) = self.conn.process_new_packets() {
            // rustls has queued an alert for the peer
            let _ = self.write_pending(sock);
            return Err(self.fail(TransportError::Tls(e.to_string())));
        }
        Ok(true)
    }
    /// Inspects the negotiated parameters before data may flow
    fn verify(&mut self) -> Result<(), TransportError> {
        let version = match self.conn.protocol_version() {
            Some(rustls::ProtocolVersion::TLSv1_2) => ProtocolVersion::Tls12,
            Some(rustls::ProtocolVersion::TLSv1_3) => ProtocolVersion::Tls13,
            Some(other) => ProtocolVersion::Other(other.get_u16()),
            None => {
                return Err(self.fail(TransportError::Handshake(
                    "no protocol version negotiated".into())));
            }
        };
        if self.require_client_cert {
            let present = self.conn.peer_certificates()
                .map_or(false, |chain| !chain.is_empty());
            if !present {
                return Err(self.fail(TransportError::Handshake(
                    "client certificate required".into())));
            }
        }
        self.version = Some(version);
        Ok(())
    }
}

impl Transport for TlsSession {
    fn state(&self) -> SessionState {
        self.state
    }
    fn run_handshake(&mut self, sock: &mut dyn Socket)
        -> Result<Handshake, TransportError>
    {
        self.check_live()?;
        match self.state {
            SessionState::Connected | SessionState::WriteClosed => {
                return Ok(Handshake::Done);
            }
            SessionState::Init => self.state = SessionState::Handshaking,
            _ => {}
        }
        loop {
            if !self.write_pending(sock)? {
                return Ok(Handshake::WantWrite);
            }
            if !self.conn.is_handshaking() {
                self.verify()?;
                self.state = SessionState::Connected;
                debug!("TLS handshake done, {:?}", self.version);
                return Ok(Handshake::Done);
            }
            match self.conn.read_tls(&mut SockIo(&mut *sock)) {
                Ok(0) => {
                    return Err(self.fail(TransportError::Handshake(
                        "peer closed connection during handshake".into())));
                }
                Ok(n) => trace!("TLS handshake read {} bytes", n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Handshake::WantRead);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(TransportError::Io(e))),
            }
            if let Err(e) = self.conn.process_new_packets() {
                let _ = self.write_pending(sock);
                return Err(self.fail(TransportError::Handshake(
                    e.to_string())));
            }
        }
    }
    fn record_send(&mut self, sock: &mut dyn Socket, buf: &[u8])
        -> Result<Progress, TransportError>
    {
        self.check_live()?;
        match self.state {
            SessionState::Connected => {}
            SessionState::WriteClosed => {
                return Err(TransportError::Io(
                    io::ErrorKind::BrokenPipe.into()));
            }
            _ => return Ok(Progress::WouldBlock),
        }
        if !self.write_pending(sock)? {
            return Ok(Progress::WouldBlock);
        }
        let n = match self.conn.writer().write(buf) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(TransportError::Io(e))),
        };
        // bytes are accounted for once encrypted, the socket may lag behind
        self.write_pending(sock)?;
        if n == 0 && !buf.is_empty() {
            Ok(Progress::WouldBlock)
        } else {
            Ok(Progress::Bytes(n))
        }
    }
    fn record_recv(&mut self, sock: &mut dyn Socket, buf: &mut [u8])
        -> Result<Progress, TransportError>
    {
        self.check_live()?;
        if !matches!(self.state,
                     SessionState::Connected | SessionState::WriteClosed)
        {
            return Ok(Progress::WouldBlock);
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) if !buf.is_empty() => return Ok(Progress::PeerClosed),
                Ok(n) => return Ok(Progress::Bytes(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("TLS peer closed without close_notify");
                    return Ok(Progress::PeerClosed);
                }
                Err(e) => return Err(self.fail(TransportError::Io(e))),
            }
            if !self.read_packets(sock)? {
                return Ok(Progress::WouldBlock);
            }
            // key updates and tickets may want to be answered
            self.write_pending(sock)?;
        }
    }
    fn flush(&mut self, sock: &mut dyn Socket)
        -> Result<bool, TransportError>
    {
        self.check_live()?;
        self.write_pending(sock)
    }
    fn connection_shutdown(&mut self, sock: &mut dyn Socket)
        -> Result<(), TransportError>
    {
        match self.state {
            SessionState::Closed | SessionState::Error => {
                Err(TransportError::Terminal)
            }
            SessionState::WriteClosed => Ok(()),
            SessionState::Init | SessionState::Handshaking => {
                self.state = SessionState::Closed;
                Ok(())
            }
            SessionState::Connected => {
                self.conn.send_close_notify();
                self.state = SessionState::WriteClosed;
                // best effort, socket may be full or gone already
                if let Err(e) = self.write_pending(sock) {
                    debug!("can't flush close_notify: {}", e);
                    return Ok(());
                }
                match sock.shutdown_write() {
                    Ok(()) => Ok(()),
                    Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                        Ok(())
                    }
                    Err(e) => Err(self.fail(TransportError::Io(e))),
                }
            }
        }
    }
    fn close(&mut self) {
        if self.state != SessionState::Error {
            self.state = SessionState::Closed;
        }
    }
    fn get_version(&self) -> Option<ProtocolVersion> {
        match self.state {
            SessionState::Connected | SessionState::WriteClosed => {
                self.version
            }
            _ => None,
        }
    }
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state)
            .field("version", &self.version)
            .finish()
    }
}
