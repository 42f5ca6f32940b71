//! Binding of a transport backend, a handler and a configuration
use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::{Config, Connection, Handler};
use crate::transport::{Backend, Diagnostics, Socket, TransportError};


/// Creates connections of one server
///
/// The daemon doesn't listen and doesn't schedule connections, the
/// embedding application accepts sockets and drives the connections it
/// gets from `accept()`.
pub struct Daemon<H: Handler> {
    backend: Backend,
    handler: Arc<H>,
    config: Arc<Config>,
    started: bool,
}

impl<H: Handler> Daemon<H> {
    pub fn new(backend: Backend, handler: H, config: Config) -> Daemon<H> {
        Daemon {
            backend,
            handler: Arc::new(handler),
            config: Arc::new(config),
            started: false,
        }
    }
    /// Initializes the backend, must be called once before `accept()`
    pub fn start(&mut self, sink: &mut dyn Diagnostics)
        -> Result<(), TransportError>
    {
        self.backend.init_certificate(sink)?;
        info!("Daemon started with {} transport", self.backend.name());
        self.started = true;
        Ok(())
    }
    pub fn is_started(&self) -> bool {
        self.started
    }
    /// Wraps a freshly accepted socket into a connection
    pub fn accept<S: Socket>(&self, sock: S, client: Option<SocketAddr>)
        -> Result<Connection<S, H>, TransportError>
    {
        if !self.started {
            return Err(TransportError::NotInitialized);
        }
        let session = self.backend.session()?;
        debug!("Accepted connection from {:?}", client);
        Ok(Connection::new(sock, session, self.handler.clone(),
                           self.config.clone(), client))
    }
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}
