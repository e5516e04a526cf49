//! # panel-server
//!
//! Control panel server built on blocking `std::net` sockets and
//! `std::thread` workers, so the same code runs on Linux and on ESP32
//! (esp-idf std).
//!
//! - [`http`]: request parser state machine and response writer
//! - [`router`]: the accept loop and route table
//! - [`wifi`]: station connect and scan state machines over a [`wifi::WifiDriver`]
//! - [`functions`]: the built-in callable table
//! - [`context`]: the shared [`PanelContext`]
//! - [`sim`]: simulated radio and board

pub mod board;
pub mod context;
pub mod error;
pub mod functions;
pub mod http;
pub mod router;
pub mod sim;
pub mod wifi;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use board::{Board, BoardError};
pub use context::PanelContext;
pub use error::ServerError;
pub use router::{PanelServer, ServerConfig};
pub use wifi::{WifiDriver, WifiManager, WifiTiming};

/// Lock a state cell, recovering the value if a worker panicked.
///
/// Records are replaced whole, so a poisoned cell still holds a complete one.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
