//! Crate implementing the on-disk fragment store of a silo node: the
//! partition/hash directory layout, the fragment file naming scheme with
//! its durable markers, and the per-partition replication locks.

#[macro_use]
extern crate tracing;

pub mod layout;
pub mod locks;
pub mod object_store;
pub mod policy;

use err_derive::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "{} seconds: {}", secs, path)]
	LockTimeout { secs: f64, path: String },

	#[error(display = "device {} is not mounted", _0)]
	NotMounted(String),

	#[error(display = "a newer or equal record already exists")]
	Conflict,

	#[error(display = "no object record found")]
	NotFound,

	#[error(display = "{}", _0)]
	Message(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
