use std::io;

use super::{Transport, Socket, SessionState, Handshake, Progress};
use super::{ProtocolVersion, TransportError};


/// Session of the plaintext backend
///
/// The handshake is a no-op which completes on the first call.
#[derive(Debug)]
pub struct PlainSession {
    state: SessionState,
}

impl PlainSession {
    pub fn new() -> PlainSession {
        PlainSession { state: SessionState::Init }
    }
    fn check_live(&self) -> Result<(), TransportError> {
        if self.state.is_terminal() {
            Err(TransportError::Terminal)
        } else {
            Ok(())
        }
    }
    fn fail(&mut self, err: io::Error) -> TransportError {
        self.state = SessionState::Error;
        TransportError::Io(err)
    }
}

impl Default for PlainSession {
    fn default() -> PlainSession {
        PlainSession::new()
    }
}

impl Transport for PlainSession {
    fn state(&self) -> SessionState {
        self.state
    }
    fn run_handshake(&mut self, _sock: &mut dyn Socket)
        -> Result<Handshake, TransportError>
    {
        self.check_live()?;
        if matches!(self.state, SessionState::Init | SessionState::Handshaking) {
            self.state = SessionState::Connected;
        }
        Ok(Handshake::Done)
    }
    fn record_send(&mut self, sock: &mut dyn Socket, buf: &[u8])
        -> Result<Progress, TransportError>
    {
        self.check_live()?;
        if self.state == SessionState::WriteClosed {
            return Err(TransportError::Io(
                io::ErrorKind::BrokenPipe.into()));
        }
        loop {
            match sock.write(buf) {
                Ok(0) if !buf.is_empty() => {
                    return Err(self.fail(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => return Ok(Progress::Bytes(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Progress::WouldBlock);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }
    fn record_recv(&mut self, sock: &mut dyn Socket, buf: &mut [u8])
        -> Result<Progress, TransportError>
    {
        self.check_live()?;
        loop {
            match sock.read(buf) {
                Ok(0) if !buf.is_empty() => return Ok(Progress::PeerClosed),
                Ok(n) => return Ok(Progress::Bytes(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Progress::WouldBlock);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
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
                self.state = SessionState::WriteClosed;
                match sock.shutdown_write() {
                    Ok(()) => Ok(()),
                    // peer is already gone, nothing to close
                    Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                        Ok(())
                    }
                    Err(e) => Err(self.fail(e)),
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
                Some(ProtocolVersion::Plain)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::PlainSession;
    use crate::transport::mock::MockSocket;
    use crate::transport::{Transport, SessionState, Handshake, Progress};
    use crate::transport::{ProtocolVersion, TransportError};

    #[test]
    fn lifecycle() {
        let mut sock = MockSocket::new();
        let mut s = PlainSession::new();
        assert_eq!(s.get_version(), None);
        assert_eq!(s.run_handshake(&mut sock).unwrap(), Handshake::Done);
        assert_eq!(s.state(), SessionState::Connected);
        // idempotent
        assert_eq!(s.run_handshake(&mut sock).unwrap(), Handshake::Done);
        assert_eq!(s.get_version(), Some(ProtocolVersion::Plain));
        s.connection_shutdown(&mut sock).unwrap();
        assert!(sock.shut_down);
        assert_eq!(s.state(), SessionState::WriteClosed);
        s.connection_shutdown(&mut sock).unwrap();
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(s.run_handshake(&mut sock),
                         Err(TransportError::Terminal)));
        assert!(matches!(s.connection_shutdown(&mut sock),
                         Err(TransportError::Terminal)));
    }

    #[test]
    fn partial_io() {
        let mut sock = MockSocket::new();
        sock.write_limit = Some(3);
        sock.feed(b"hello");
        let mut s = PlainSession::new();
        s.run_handshake(&mut sock).unwrap();
        assert_eq!(s.record_send(&mut sock, b"abcdef").unwrap(),
                   Progress::Bytes(3));
        assert_eq!(sock.output, b"abc");
        let mut buf = [0u8; 16];
        assert_eq!(s.record_recv(&mut sock, &mut buf).unwrap(),
                   Progress::Bytes(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(s.record_recv(&mut sock, &mut buf).unwrap(),
                   Progress::WouldBlock);
        sock.write_blocked = true;
        assert_eq!(s.record_send(&mut sock, b"x").unwrap(),
                   Progress::WouldBlock);
        sock.eof = true;
        assert_eq!(s.record_recv(&mut sock, &mut buf).unwrap(),
                   Progress::PeerClosed);
    }

    #[test]
    fn shutdown_before_handshake() {
        let mut sock = MockSocket::new();
        let mut s = PlainSession::new();
        s.connection_shutdown(&mut sock).unwrap();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!sock.shut_down);
    }
}
