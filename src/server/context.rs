use std::time::Duration;

use super::MAX_HEADERS_SIZE;


/// Settings shared by all connections of a daemon
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection is closed when no bytes move for this long
    ///
    /// Not applied while a response is being sent or while the connection
    /// is suspended. `None` disables the timeout.
    pub idle_timeout: Option<Duration>,
    /// Limit of the request line plus headers
    pub max_header_size: usize,
    /// Number of bytes requested from the transport at once
    ///
    /// Zero is treated as one.
    pub read_chunk: usize,
    /// Number of content bytes produced for the transport at once
    ///
    /// Zero is treated as one.
    pub write_chunk: usize,
    /// Add `Date` header to responses which don't have one
    pub date_header: bool,
    /// Allow more than one request per connection
    pub keep_alive: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            idle_timeout: Some(Duration::from_secs(120)),
            max_header_size: MAX_HEADERS_SIZE,
            read_chunk: 8192,
            write_chunk: 16384,
            date_header: true,
            keep_alive: true,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }
}
