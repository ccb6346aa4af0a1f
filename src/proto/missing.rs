//! Codec for missing-check rows and the wanted-state replies.
//!
//! A row announces one fragment the sender holds:
//!
//! ```text
//! <hash> <ts_data>[ <subparts>][ <extra tokens...>]
//! ```
//!
//! where `<subparts>` is a comma-separated list of `key:value` items:
//! `m:<hexdelta>[__<hexoffset>]` places the meta timestamp relative to
//! the data timestamp, `t:...` does the same for the content-type
//! timestamp, and `durable:` announces the durability of the fragment.
//! Unknown subparts and extra tokens are ignored so that rows from newer
//! senders keep parsing during rolling upgrades.

use silo_util::data::ObjectHash;
use silo_util::error::Error;
use silo_util::time::Timestamp;

/// One decoded missing-check row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntry {
	pub object_hash: ObjectHash,
	pub ts_data: Timestamp,
	pub ts_meta: Timestamp,
	pub ts_ctype: Timestamp,
	pub durable: bool,
}

/// What this node currently holds for one hash, as reported by the
/// object store. Tombstones have no meta timestamp.
#[derive(Debug, Clone)]
pub struct LocalVersion {
	pub ts_data: Timestamp,
	pub ts_meta: Option<Timestamp>,
	pub durable: bool,
}

pub fn decode_missing(line: &[u8]) -> Result<MissingEntry, Error> {
	let text = std::str::from_utf8(line)
		.map_err(|_| Error::Message(format!("Invalid missing-check entry {:?}", line)))?;
	let mut parts = text.split_whitespace();

	let object_hash: ObjectHash = parts
		.next()
		.ok_or_else(|| Error::Message(format!("Invalid missing-check entry {:?}", text)))?
		.parse()?;
	let ts_data: Timestamp = parts
		.next()
		.ok_or_else(|| Error::Message(format!("Invalid missing-check entry {:?}", text)))?
		.parse()?;

	let mut ts_meta = ts_data;
	let mut ts_ctype = ts_data;
	let mut durable = true;

	// Extra space-separated tokens after the subparts are tolerated
	if let Some(subparts) = parts.next() {
		for subpart in subparts.split(',') {
			match subpart.split_once(':') {
				Some(("m", v)) => ts_meta = decode_delta(&ts_data, v)?,
				Some(("t", v)) => ts_ctype = decode_delta(&ts_data, v)?,
				Some(("durable", v)) => {
					durable = !matches!(v, "no" | "false" | "False");
				}
				// unknown subparts are tolerated
				_ => (),
			}
		}
	}

	Ok(MissingEntry {
		object_hash,
		ts_data,
		ts_meta,
		ts_ctype,
		durable,
	})
}

fn decode_delta(ts_data: &Timestamp, value: &str) -> Result<Timestamp, Error> {
	let err = || Error::InvalidTimestamp(value.to_string());
	let (delta, offset) = match value.split_once("__") {
		Some((delta, offset)) => (delta, u64::from_str_radix(offset, 16).map_err(|_| err())?),
		None => (value, 0),
	};
	let delta = u64::from_str_radix(delta, 16).map_err(|_| err())?;
	Ok(ts_data.add_delta(delta, offset))
}

/// Encode one row announcing a fragment. This is the sender-side inverse
/// of [`decode_missing`]; the encoding is canonical: `m:` appears iff the
/// meta timestamp is newer than the data timestamp, `t:` iff the
/// content-type timestamp is, and `durable:no` iff the fragment is not
/// durable.
pub fn encode_missing(
	object_hash: &ObjectHash,
	ts_data: &Timestamp,
	ts_meta: &Timestamp,
	ts_ctype: &Timestamp,
	durable: bool,
) -> String {
	let mut extra = vec![];
	if ts_meta > ts_data {
		extra.push(encode_delta('m', ts_data, ts_meta));
	}
	if ts_ctype > ts_data {
		extra.push(encode_delta('t', ts_data, ts_ctype));
	}
	if !durable {
		extra.push("durable:no".to_string());
	}

	let mut msg = format!("{} {}", object_hash, ts_data.internal());
	if !extra.is_empty() {
		msg.push(' ');
		msg.push_str(&extra.join(","));
	}
	msg
}

fn encode_delta(key: char, ts_data: &Timestamp, ts: &Timestamp) -> String {
	if ts.offset() != 0 {
		format!("{}:{:x}__{:x}", key, ts_data.delta_to(ts), ts.offset())
	} else {
		format!("{}:{:x}", key, ts_data.delta_to(ts))
	}
}

/// Compare a decoded row against the local state and produce the reply
/// line, if any. The rules:
///
/// - nothing usable locally wants everything (`dm`);
/// - a strictly newer remote data timestamp wants the data, and the
///   meta overlay too unless the local one is already as new (`d` or
///   `dm`);
/// - same data timestamp with an older local meta wants the meta
///   overlay only (`m`);
/// - a local record that is newer satisfies the row, except that a
///   non-durable fragment satisfies nothing but its exact timestamp
///   (it cannot be used for reconstruction, so anything else the remote
///   holds is still wanted).
///
/// Durability promotion at an equal timestamp happens before this
/// comparison; a failed promotion is reported by passing `local = None`.
pub fn encode_wanted(remote: &MissingEntry, local: Option<&LocalVersion>) -> Option<String> {
	let mut want_data = false;
	let mut want_meta = false;

	match local {
		None => {
			want_data = true;
			want_meta = true;
		}
		Some(local) => {
			if remote.ts_data > local.ts_data {
				want_data = true;
				want_meta = match local.ts_meta {
					Some(local_meta) => remote.ts_meta > local_meta,
					None => true,
				};
			} else if remote.ts_data < local.ts_data {
				if !local.durable {
					want_data = true;
					want_meta = true;
				}
			} else if let Some(local_meta) = local.ts_meta {
				if remote.ts_meta > local_meta {
					want_meta = true;
				}
			}
		}
	}

	if !want_data && !want_meta {
		return None;
	}
	let mut wanted = String::new();
	if want_data {
		wanted.push('d');
	}
	if want_meta {
		wanted.push('m');
	}
	Some(format!("{} {}", remote.object_hash, wanted))
}
