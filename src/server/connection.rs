//! The per-connection state machine
//!
//! A `Connection` owns the socket and the transport session of a single
//! client. The scheduler calls `process()` whenever the socket is ready or
//! the connection was notified, and waits for whatever `Interest` it
//! returns. Nothing here blocks.
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::response::Response;
use crate::transport::{Socket, Session, Transport, Handshake, Progress};
use crate::upload::{UploadState, Verdict};
use super::body::{BodyProgress, BodyStep};
use super::context::Config;
use super::error::{RequestError, ErrorKind};
use super::parser::parse_head;
use super::protocol::{Handler, Action};
use super::request::Head;
use super::writer::{ResponseWriter, RequestInfo, Fill};


/// What the connection waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Call `process()` when the socket is readable
    Read,
    /// Call `process()` when the socket is writable
    Write,
    /// Call `process()` after the connection was notified
    Suspended,
    /// The connection is finished and may be dropped
    Closed,
}

/// Observable stage of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    AwaitingRequestLine,
    ParsingHeaders,
    AwaitingAction,
    StreamingUpload,
    SendingHeaders,
    SendingBody,
    Flushing,
    Closing,
    Closed,
}

type Notifier = Box<dyn Fn() + Send + Sync>;

struct Control {
    resume: AtomicBool,
    cancel: AtomicBool,
    notifier: Mutex<Option<Notifier>>,
}

impl Control {
    fn notify(&self) {
        let notifier = self.notifier.lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(ref notifier) = *notifier {
            notifier();
        }
    }
}

/// A handle to wake up or cancel a connection from any thread
///
/// Both operations only set a flag and call the notifier, the flags are
/// applied by the next `Connection::process()`.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<Control>);

impl ConnectionHandle {
    /// Continues a suspended request
    pub fn resume(&self) {
        self.0.resume.store(true, Ordering::SeqCst);
        self.0.notify();
    }
    /// Closes the connection, nothing more is sent
    pub fn cancel(&self) {
        self.0.cancel.store(true, Ordering::SeqCst);
        self.0.notify();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("resume", &self.0.resume.load(Ordering::SeqCst))
            .field("cancel", &self.0.cancel.load(Ordering::SeqCst))
            .finish()
    }
}

struct Request {
    head: Head,
    body: BodyProgress,
}

enum State {
    Handshake,
    Idle,
    /// Head is parsed, the handler is to be asked
    Action(Request),
    Upload { req: Request, upload: UploadState },
    Sending(ResponseWriter),
    Flushing { close: bool },
    Closing,
    Closed,
}

enum Next {
    Continue(State),
    Wait(State, Interest),
}

/// A single HTTP connection
pub struct Connection<S: Socket, H: Handler> {
    sock: S,
    session: Session,
    handler: Arc<H>,
    config: Arc<Config>,
    client: Option<SocketAddr>,
    state: State,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    outpos: usize,
    /// Bytes of the response head not yet sent
    head_left: usize,
    response_started: bool,
    info: Option<RequestInfo>,
    last_activity: Instant,
    suspended: bool,
    peer_closed: bool,
    control: Arc<Control>,
}

fn request_info(head: &Head, unread_body: bool) -> RequestInfo {
    RequestInfo {
        version: head.version,
        is_head: head.is_head(),
        keep_alive: head.wants_keep_alive(),
        asks_keep_alive: head.asks_keep_alive(),
        unread_body,
    }
}

impl<S: Socket, H: Handler> Connection<S, H> {
    pub fn new(sock: S, session: Session, handler: Arc<H>,
               config: Arc<Config>, client: Option<SocketAddr>)
        -> Connection<S, H>
    {
        Connection {
            sock,
            session,
            handler,
            config,
            client,
            state: State::Handshake,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            outpos: 0,
            head_left: 0,
            response_started: false,
            info: None,
            last_activity: Instant::now(),
            suspended: false,
            peer_closed: false,
            control: Arc::new(Control {
                resume: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                notifier: Mutex::new(None),
            }),
        }
    }
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.control.clone())
    }
    /// Installs the function called by `ConnectionHandle::resume/cancel`
    pub fn set_notifier<F>(&mut self, notifier: F)
        where F: Fn() + Send + Sync + 'static
    {
        *self.control.notifier.lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(notifier));
    }
    pub fn client(&self) -> Option<SocketAddr> {
        self.client
    }
    pub fn session(&self) -> &Session {
        &self.session
    }
    pub fn socket(&self) -> &S {
        &self.sock
    }
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.sock
    }
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }
    pub fn phase(&self) -> Phase {
        match self.state {
            State::Handshake => Phase::Handshake,
            State::Idle if self.inbuf.iter().any(|&c| c != b'\r' && c != b'\n')
            => Phase::ParsingHeaders,
            State::Idle => Phase::AwaitingRequestLine,
            State::Action(..) => Phase::AwaitingAction,
            State::Upload { .. } => Phase::StreamingUpload,
            State::Sending(..) if self.head_left > 0 => Phase::SendingHeaders,
            State::Sending(..) => Phase::SendingBody,
            State::Flushing { .. } => Phase::Flushing,
            State::Closing => Phase::Closing,
            State::Closed => Phase::Closed,
        }
    }

    /// Runs the connection until it has to wait
    pub fn process(&mut self) -> Interest {
        if self.control.cancel.swap(false, Ordering::SeqCst) {
            debug!("Connection {:?} canceled", self.client);
            self.abort();
        }
        // a resume which came before the suspend is applied to it
        if self.suspended && self.control.resume.swap(false, Ordering::SeqCst)
        {
            debug!("Connection {:?} resumed", self.client);
            self.suspended = false;
            self.touch();
        }
        if self.suspended {
            return Interest::Suspended;
        }
        loop {
            let state = mem::replace(&mut self.state, State::Closed);
            match self.step(state) {
                Ok(Next::Continue(state)) => self.state = state,
                Ok(Next::Wait(state, interest)) => {
                    self.state = state;
                    return interest;
                }
                Err(err) => self.state = self.fail(err),
            }
        }
    }

    /// When the idle timeout fires, `None` if it's not applied now
    pub fn deadline(&self) -> Option<Instant> {
        let timeout = self.config.idle_timeout?;
        if self.suspended {
            return None;
        }
        match self.state {
            State::Sending(..) | State::Flushing { .. }
            | State::Closing | State::Closed => None,
            // a timeout too large to represent never fires
            _ => self.last_activity.checked_add(timeout),
        }
    }

    /// Closes the connection if it's idle for too long
    ///
    /// Returns `true` if the connection was closed.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                debug!("Connection {:?}: {}", self.client,
                       RequestError::IdleTimeout);
                self.abort();
                true
            }
            _ => false,
        }
    }

    /// Shuts the transport down immediately, nothing more is sent
    pub fn abort(&mut self) {
        if !self.is_closed() {
            self.shutdown_transport();
            self.state = State::Closed;
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn shutdown_transport(&mut self) {
        self.outbuf.clear();
        self.outpos = 0;
        self.head_left = 0;
        self.suspended = false;
        if !self.session.state().is_terminal() {
            if let Err(e) = self.session.connection_shutdown(&mut self.sock) {
                debug!("Error shutting down {:?}: {}", self.client, e);
            }
        }
        self.session.close();
    }

    fn read_more(&mut self) -> Result<Progress, RequestError> {
        let start = self.inbuf.len();
        self.inbuf.resize(start + self.config.read_chunk.max(1), 0);
        let result = self.session.record_recv(&mut self.sock,
                                              &mut self.inbuf[start..]);
        let progress = match result {
            Ok(progress) => progress,
            Err(e) => {
                self.inbuf.truncate(start);
                return Err(e.into());
            }
        };
        match progress {
            Progress::Bytes(n) => {
                trace!("Read {} bytes from {:?}", n, self.client);
                self.inbuf.truncate(start + n);
                self.touch();
            }
            Progress::WouldBlock => self.inbuf.truncate(start),
            Progress::PeerClosed => {
                self.inbuf.truncate(start);
                self.peer_closed = true;
            }
        }
        Ok(progress)
    }

    /// Writes out as much as possible, `true` when nothing is left
    fn flush_out(&mut self) -> Result<bool, RequestError> {
        while self.outpos < self.outbuf.len() {
            match self.session.record_send(&mut self.sock,
                                           &self.outbuf[self.outpos..])?
            {
                Progress::Bytes(n) => {
                    trace!("Wrote {} bytes to {:?}", n, self.client);
                    self.outpos += n;
                    self.head_left = self.head_left.saturating_sub(n);
                    self.touch();
                }
                Progress::WouldBlock | Progress::PeerClosed => return Ok(false),
            }
        }
        self.outbuf.clear();
        self.outpos = 0;
        Ok(self.session.flush(&mut self.sock)?)
    }

    fn step(&mut self, state: State) -> Result<Next, RequestError> {
        match state {
            State::Handshake => {
                match self.session.run_handshake(&mut self.sock)? {
                    Handshake::Done => {
                        debug!("Connection {:?} established ({:?})",
                               self.client, self.session.get_version());
                        self.touch();
                        Ok(Next::Continue(State::Idle))
                    }
                    Handshake::WantRead => {
                        Ok(Next::Wait(State::Handshake, Interest::Read))
                    }
                    Handshake::WantWrite => {
                        Ok(Next::Wait(State::Handshake, Interest::Write))
                    }
                }
            }
            State::Idle => self.idle(),
            State::Action(req) => self.action(req),
            State::Upload { req, upload } => self.upload(req, upload),
            State::Sending(writer) => self.send(writer),
            State::Flushing { close } => {
                if !self.flush_out()? {
                    return Ok(Next::Wait(State::Flushing { close },
                                         Interest::Write));
                }
                if close {
                    return Ok(Next::Continue(State::Closing));
                }
                debug!("Connection {:?} is kept alive", self.client);
                self.info = None;
                self.response_started = false;
                self.head_left = 0;
                self.touch();
                Ok(Next::Continue(State::Idle))
            }
            State::Closing => {
                self.shutdown_transport();
                Ok(Next::Continue(State::Closed))
            }
            State::Closed => Ok(Next::Wait(State::Closed, Interest::Closed)),
        }
    }

    fn idle(&mut self) -> Result<Next, RequestError> {
        if !self.inbuf.is_empty() {
            if let Some((head, bytes)) = parse_head(&self.inbuf, self.client)? {
                if bytes > self.config.max_header_size {
                    return Err(RequestError::HeadersAreTooLarge);
                }
                self.inbuf.drain(..bytes);
                // a resume left from the previous request doesn't apply
                self.control.resume.store(false, Ordering::SeqCst);
                debug!("Request {} {} {} from {:?}",
                       head.method, head.target, head.version, self.client);
                let body = BodyProgress::new(head.body_kind);
                self.info = Some(request_info(&head, !body.is_done()));
                return Ok(Next::Continue(State::Action(Request { head, body })));
            }
            if self.inbuf.len() > self.config.max_header_size {
                return Err(RequestError::HeadersAreTooLarge);
            }
        }
        if self.peer_closed {
            if self.inbuf.iter().all(|&c| c == b'\r' || c == b'\n') {
                debug!("Connection {:?} closed by peer", self.client);
                return Ok(Next::Continue(State::Closing));
            }
            return Err(RequestError::PrematureEndOfStream);
        }
        match self.read_more()? {
            Progress::WouldBlock => Ok(Next::Wait(State::Idle, Interest::Read)),
            Progress::Bytes(_) | Progress::PeerClosed => {
                Ok(Next::Continue(State::Idle))
            }
        }
    }

    fn action(&mut self, req: Request) -> Result<Next, RequestError> {
        let action = self.handler.request(&req.head, &self.handle());
        match action {
            Action::Respond(response) => {
                let unread = !req.body.is_done();
                self.respond(response, &req.head, unread)
            }
            Action::Upload(upload) => {
                let upload = UploadState::new(upload, req.head.upload_size(),
                                              req.head.content_type())?;
                if req.head.expects_continue() && !req.body.is_done() {
                    self.outbuf.extend_from_slice(b"HTTP/1.1 100 Continue\r\n\r\n");
                }
                Ok(Next::Continue(State::Upload { req, upload }))
            }
            Action::Suspend => {
                debug!("Request from {:?} suspended", self.client);
                self.suspended = true;
                Ok(Next::Wait(State::Action(req), Interest::Suspended))
            }
            Action::Abort => {
                debug!("Request from {:?} aborted by handler", self.client);
                self.shutdown_transport();
                Ok(Next::Continue(State::Closed))
            }
        }
    }

    fn upload(&mut self, mut req: Request, mut upload: UploadState)
        -> Result<Next, RequestError>
    {
        if upload.has_pending() {
            match upload.deliver()? {
                Verdict::Continue => {}
                verdict => return self.upload_verdict(verdict, req, upload),
            }
        }
        let step = req.body.next(&self.inbuf)?;
        match step {
            BodyStep::Data(n) => {
                let verdict = upload.feed(&self.inbuf[..n]);
                self.inbuf.drain(..n);
                match verdict? {
                    Verdict::Continue => {
                        Ok(Next::Continue(State::Upload { req, upload }))
                    }
                    verdict => self.upload_verdict(verdict, req, upload),
                }
            }
            BodyStep::Skip(n) => {
                self.inbuf.drain(..n);
                Ok(Next::Continue(State::Upload { req, upload }))
            }
            BodyStep::Done => {
                match upload.finish()? {
                    Verdict::Continue => Err(RequestError::Contract(
                        "upload finished without a verdict")),
                    verdict => self.upload_verdict(verdict, req, upload),
                }
            }
            BodyStep::NeedMore => {
                if self.peer_closed {
                    return Err(RequestError::PrematureEndOfStream);
                }
                if !self.flush_out()? {
                    return Ok(Next::Wait(State::Upload { req, upload },
                                         Interest::Write));
                }
                match self.read_more()? {
                    Progress::WouldBlock => {
                        Ok(Next::Wait(State::Upload { req, upload },
                                      Interest::Read))
                    }
                    Progress::Bytes(_) | Progress::PeerClosed => {
                        Ok(Next::Continue(State::Upload { req, upload }))
                    }
                }
            }
        }
    }

    fn upload_verdict(&mut self, verdict: Verdict, req: Request,
                      upload: UploadState)
        -> Result<Next, RequestError>
    {
        match verdict {
            Verdict::Continue => {
                Ok(Next::Continue(State::Upload { req, upload }))
            }
            Verdict::Suspend => {
                debug!("Upload from {:?} suspended", self.client);
                self.suspended = true;
                Ok(Next::Wait(State::Upload { req, upload },
                              Interest::Suspended))
            }
            Verdict::Abort => {
                debug!("Upload from {:?} aborted", self.client);
                self.shutdown_transport();
                Ok(Next::Continue(State::Closed))
            }
            Verdict::Respond(response) => {
                let unread = !req.body.is_done();
                self.respond(response, &req.head, unread)
            }
        }
    }

    fn respond(&mut self, response: Response, head: &Head, unread: bool)
        -> Result<Next, RequestError>
    {
        let info = request_info(head, unread);
        self.info = Some(info);
        self.start_response(response, info)
    }

    fn start_response(&mut self, response: Response, info: RequestInfo)
        -> Result<Next, RequestError>
    {
        if !(100..=999).contains(&response.status()) {
            return Err(RequestError::Contract(
                "response status is not a three-digit code"));
        }
        let frozen = response.finalize().map_err(|_| {
            RequestError::Contract("non-reusable response is sent twice")
        })?;
        let writer = ResponseWriter::start(response, &frozen, &info,
                                           &self.config, &mut self.outbuf);
        self.head_left = self.outbuf.len() - self.outpos;
        self.response_started = true;
        Ok(Next::Continue(State::Sending(writer)))
    }

    fn send(&mut self, mut writer: ResponseWriter)
        -> Result<Next, RequestError>
    {
        let chunk = self.config.write_chunk.max(1);
        if !writer.is_done() && self.outbuf.len() - self.outpos < chunk {
            match writer.fill(&mut self.outbuf, chunk)? {
                Fill::More | Fill::Done => {}
                Fill::Abort => {
                    debug!("Response to {:?} aborted by content source",
                           self.client);
                    self.shutdown_transport();
                    return Ok(Next::Continue(State::Closed));
                }
            }
        }
        if writer.is_done() {
            trace!("Response to {:?} queued, {} content bytes",
                   self.client, writer.position());
            return Ok(Next::Continue(State::Flushing {
                close: writer.will_close(),
            }));
        }
        if self.flush_out()? {
            Ok(Next::Continue(State::Sending(writer)))
        } else {
            Ok(Next::Wait(State::Sending(writer), Interest::Write))
        }
    }

    /// Decides what to do after an error, returns the next state
    fn fail(&mut self, err: RequestError) -> State {
        if !self.response_started && err.has_error_page() {
            debug!("Sending error page to {:?}: {}", self.client, err);
            let mut info = self.info.unwrap_or_else(RequestInfo::unknown);
            info.keep_alive = false;
            info.unread_body = true;
            let response = self.handler.error_page(&err);
            match self.start_response(response, info) {
                Ok(Next::Continue(state)) | Ok(Next::Wait(state, _)) => {
                    return state;
                }
                Err(e) => {
                    warn!("Can't send error page to {:?}: {}", self.client, e);
                }
            }
        } else {
            match err.kind() {
                ErrorKind::ContractViolation => {
                    warn!("Connection {:?} aborted: {}", self.client, err);
                }
                _ => {
                    debug!("Connection {:?} aborted: {}", self.client, err);
                }
            }
        }
        self.shutdown_transport();
        State::Closed
    }
}

impl<S: Socket, H: Handler> Drop for Connection<S, H> {
    fn drop(&mut self) {
        self.abort();
    }
}

impl<S: Socket, H: Handler> fmt::Debug for Connection<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.client)
            .field("phase", &self.phase())
            .field("session", &self.session)
            .field("suspended", &self.suspended)
            .finish()
    }
}
