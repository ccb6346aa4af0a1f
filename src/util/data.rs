//! Object hashes, the fixed-width identifiers of stored fragments

use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 128-bit hash of an object's full name, rendered as 32 hex digits.
/// Hashes partition the keyspace: all fragments of an object live in the
/// partition that owns its hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHash([u8; 16]);

impl ObjectHash {
	pub fn from_bytes(bytes: [u8; 16]) -> Self {
		Self(bytes)
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}
}

impl FromStr for ObjectHash {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		let bytes = hex::decode(s).map_err(|_| Error::InvalidObjectHash(s.to_string()))?;
		let bytes: [u8; 16] = bytes
			.try_into()
			.map_err(|_| Error::InvalidObjectHash(s.to_string()))?;
		Ok(Self(bytes))
	}
}

impl fmt::Display for ObjectHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl fmt::Debug for ObjectHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObjectHash({})", hex::encode(self.0))
	}
}
