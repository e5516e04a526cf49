//! # panel-core
//!
//! Device control panel model, storage and rendering.
//!
//! This crate provides:
//! - The persisted configuration document and its invariants
//! - Config storage with a cached, save-with-rollback store
//! - Station credential management and input validation
//! - SSID decoding for scan results
//! - The function registry, callable table and dispatcher
//! - The HTML builder and page generator
//!
//! Everything here is synchronous and runtime-agnostic, with no I/O beyond
//! file storage, so it builds for both Linux and ESP32 (esp-idf) targets.

pub mod config;
pub mod credentials;
pub mod error;
pub mod html;
pub mod model;
pub mod page;
pub mod registry;
pub mod ssid;
pub mod status;
pub mod validate;

pub use config::{ConfigError, ConfigStorage, ConfigStore, FileConfigStorage, MemoryConfigStorage};
pub use error::{DispatchError, PanelError, PanelResult};
pub use model::*;
pub use registry::{
    ArgValue, Callable, CallableTable, Dispatcher, FunctionRegistry, FunctionSpec, Invocation,
    Registration,
};
pub use status::{ConnectionState, ConnectionStatus, PanelStatus, ScanState, ScanStatus};
