//! Crate implementing the silo object server: the HTTP front-end that
//! routes the `SSYNC` method, the replication receiver state machine,
//! and the internal handlers replication sub-requests dispatch to.

#[macro_use]
extern crate tracing;

pub mod api_server;
pub mod error;
pub mod object_handlers;
pub mod receiver;


pub use error::Error;
