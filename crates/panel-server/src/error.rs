//! Transport-level server errors.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The accept loop gave up after too many consecutive failures.
    #[error("accept failed {count} times in a row, last error: {source}")]
    Accept {
        count: u32,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] HttpError),
}
