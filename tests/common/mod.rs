#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use spindle_http::{Backend, Config, Connection, Daemon, Handler, Socket};
use spindle_http::transport::LogSink;


/// In-memory non-blocking socket
///
/// Each fed fragment is returned by a separate read, reads with nothing
/// fed block unless `eof` is set.
#[derive(Debug, Default)]
pub struct Pipe {
    input: VecDeque<Vec<u8>>,
    pub output: Vec<u8>,
    pub eof: bool,
    pub write_blocked: bool,
    pub shut_down: bool,
}

impl Pipe {
    pub fn feed(&mut self, data: &[u8]) {
        self.input.push_back(data.to_vec());
    }
    pub fn feed_fragments(&mut self, data: &[u8], size: usize) {
        for piece in data.chunks(size) {
            self.feed(piece);
        }
    }
    pub fn take_output(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.output).into_owned();
        self.output.clear();
        out
    }
}

impl Read for Pipe {
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

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for Pipe {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shut_down = true;
        Ok(())
    }
}

/// Configuration with stable output (no `Date` header)
pub fn config() -> Config {
    Config { date_header: false, .. Config::default() }
}

pub fn connect<H: Handler>(handler: H, config: Config) -> Connection<Pipe, H> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut daemon = Daemon::new(Backend::Plain, handler, config);
    daemon.start(&mut LogSink).unwrap();
    daemon.accept(Pipe::default(), None).unwrap()
}
