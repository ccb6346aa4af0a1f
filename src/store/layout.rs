//! Fragment file naming scheme.
//!
//! Each object hash owns one directory per partition; inside it, state is
//! a set of flat files named by timestamp:
//!
//! ```text
//! <ts>.data        whole-object data (replicated policies)
//! <ts>#<f>.data    non-durable fragment archive with fragment index f
//! <ts>#<f>#d.data  durable fragment archive
//! <ts>.meta        metadata overlay (JSON map of headers)
//! <ts>.ts          tombstone
//! ```
//!
//! The `#d` marker is only ever added by an atomic rename, so a fragment
//! is either fully durable or not at all.

use md5::{Digest, Md5};

use silo_util::data::ObjectHash;
use silo_util::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragFile {
	Data {
		ts: Timestamp,
		frag_index: Option<u32>,
		durable: bool,
	},
	Meta {
		ts: Timestamp,
	},
	Tombstone {
		ts: Timestamp,
	},
}

pub fn data_filename(ts: &Timestamp, frag_index: Option<u32>, durable: bool) -> String {
	match frag_index {
		Some(f) if durable => format!("{}#{}#d.data", ts.internal(), f),
		Some(f) => format!("{}#{}.data", ts.internal(), f),
		None => format!("{}.data", ts.internal()),
	}
}

pub fn meta_filename(ts: &Timestamp) -> String {
	format!("{}.meta", ts.internal())
}

pub fn tombstone_filename(ts: &Timestamp) -> String {
	format!("{}.ts", ts.internal())
}

/// Parse a fragment file name; foreign files yield None and are ignored
/// by the store.
pub fn parse_filename(name: &str) -> Option<FragFile> {
	let (stem, ext) = name.rsplit_once('.')?;
	match ext {
		"data" => {
			let mut parts = stem.split('#');
			let ts: Timestamp = parts.next()?.parse().ok()?;
			let mut frag_index = None;
			let mut durable = false;
			for part in parts {
				if part == "d" {
					durable = true;
				} else {
					frag_index = Some(part.parse().ok()?);
				}
			}
			Some(FragFile::Data {
				ts,
				frag_index,
				durable,
			})
		}
		"meta" => Some(FragFile::Meta {
			ts: stem.parse().ok()?,
		}),
		"ts" => Some(FragFile::Tombstone {
			ts: stem.parse().ok()?,
		}),
		_ => None,
	}
}

/// Hash of an object's full name, used as its directory name. All
/// replicas compute this identically, so it is also the identifier
/// exchanged during replication.
pub fn hash_path(account: &str, container: &str, object: &str) -> ObjectHash {
	let mut md5 = Md5::new();
	md5.update(format!("/{}/{}/{}", account, container, object).as_bytes());
	ObjectHash::from_bytes(md5.finalize().into())
}
