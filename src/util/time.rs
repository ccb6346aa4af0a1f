//! Timestamps attached to stored objects and carried on the replication wire

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Number of timestamp ticks per second (10µs resolution)
pub const TICKS_PER_SEC: u64 = 100_000;

/// A storage timestamp: a tick count since the epoch plus an offset
/// used as a tiebreaker between internal operations that happen at the
/// same wall-clock instant. The offset is part of the total order and
/// is preserved through encoding; it must never be normalized away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
	raw: u64,
	offset: u64,
}

impl Timestamp {
	pub fn from_parts(raw: u64, offset: u64) -> Self {
		Self { raw, offset }
	}

	pub fn from_secs(secs: u64) -> Self {
		Self {
			raw: secs * TICKS_PER_SEC,
			offset: 0,
		}
	}

	pub fn raw(&self) -> u64 {
		self.raw
	}

	pub fn offset(&self) -> u64 {
		self.offset
	}

	/// Tick delta to a later timestamp, ignoring offsets
	pub fn delta_to(&self, later: &Timestamp) -> u64 {
		later.raw.saturating_sub(self.raw)
	}

	/// Timestamp at `delta` ticks after this one, carrying `offset`
	pub fn add_delta(&self, delta: u64, offset: u64) -> Timestamp {
		Timestamp {
			raw: self.raw + delta,
			offset,
		}
	}

	/// The canonical string form: zero-padded seconds, five subsecond
	/// digits, and a `_`-separated hex offset when one is set
	pub fn internal(&self) -> String {
		let base = format!("{:010}.{:05}", self.raw / TICKS_PER_SEC, self.raw % TICKS_PER_SEC);
		if self.offset != 0 {
			format!("{}_{:016x}", base, self.offset)
		} else {
			base
		}
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.internal())
	}
}

impl FromStr for Timestamp {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		let err = || Error::InvalidTimestamp(s.to_string());

		let (value, offset) = match s.split_once('_') {
			Some((value, offset)) => {
				let offset = u64::from_str_radix(offset, 16).map_err(|_| err())?;
				(value, offset)
			}
			None => (s, 0),
		};

		let (secs, frac) = match value.split_once('.') {
			Some((secs, frac)) => (secs, frac),
			None => (value, ""),
		};
		if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
			return Err(err());
		}
		if !frac.bytes().all(|b| b.is_ascii_digit()) {
			return Err(err());
		}

		// Subsecond digits beyond the tick resolution are not representable
		let mut frac = frac.to_string();
		if frac.len() > 5 {
			return Err(err());
		}
		while frac.len() < 5 {
			frac.push('0');
		}

		let secs: u64 = secs.parse().map_err(|_| err())?;
		let ticks: u64 = frac.parse().map_err(|_| err())?;
		Ok(Timestamp {
			raw: secs * TICKS_PER_SEC + ticks,
			offset,
		})
	}
}
