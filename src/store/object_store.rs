//! The object store proper: reads and mutates the per-partition fragment
//! directories. All mutations go through a write-to-temporary /
//! fsync / atomic-rename sequence followed by an fsync of the containing
//! directory, so a crash can never leave a half-written record or a
//! partially applied durable marker.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::prelude::*;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use silo_util::config::Config;
use silo_util::data::ObjectHash;
use silo_util::time::Timestamp;

use crate::layout::*;
use crate::locks::{ReplicationLockGuard, ReplicationLocks};
use crate::policy::StoragePolicy;
use crate::{Result, StoreError};

/// The version of an object this node can vouch for, plus whether that
/// version is durable. For erasure-coded policies a fragment can exist
/// on disk without being durable; such a record is reported with
/// `durable: false` and must not be treated as reconstructable.
#[derive(Debug, Clone)]
pub struct ObjectVersion {
	pub ts_data: Timestamp,
	pub ts_meta: Timestamp,
	pub ts_ctype: Timestamp,
	pub durable: bool,
	pub tombstone: bool,
}

pub struct ObjectStore {
	root: PathBuf,
	mount_check: bool,
	locks: ReplicationLocks,
}

impl ObjectStore {
	pub fn new(config: &Config) -> Self {
		Self {
			root: config.devices.clone(),
			mount_check: config.mount_check,
			locks: ReplicationLocks::new(
				Duration::from_secs_f64(config.replication_lock_timeout),
				config.replication_concurrency_per_device,
			),
		}
	}

	/// Verify the device directory exists, and is a mount point when
	/// mount checking is configured
	pub async fn check_device(&self, device: &str) -> Result<()> {
		let path = self.root.join(device);
		let meta = fs::metadata(&path)
			.await
			.map_err(|_| StoreError::NotMounted(device.to_string()))?;
		if !meta.is_dir() {
			return Err(StoreError::NotMounted(device.to_string()));
		}
		#[cfg(unix)]
		if self.mount_check {
			use std::os::unix::fs::MetadataExt;
			let parent = fs::metadata(&self.root).await?;
			if meta.dev() == parent.dev() {
				return Err(StoreError::NotMounted(device.to_string()));
			}
		}
		Ok(())
	}

	fn partition_dir(&self, device: &str, policy: &StoragePolicy, partition: &str) -> PathBuf {
		self.root
			.join(device)
			.join(policy.data_dir())
			.join(partition)
	}

	fn object_dir(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
	) -> PathBuf {
		self.partition_dir(device, policy, partition)
			.join(hash.to_string())
	}

	/// Take the replication lock of one partition
	pub async fn replication_lock(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
	) -> Result<ReplicationLockGuard> {
		let lock_path = self
			.partition_dir(device, policy, partition)
			.join(".lock-replication");
		self.locks
			.lock(
				device,
				policy.index,
				partition,
				lock_path.display().to_string(),
			)
			.await
	}

	/// Read the current version of one object hash. `frag_filter`
	/// restricts data files to one fragment index; `None` accepts any.
	pub async fn load_state(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
		frag_filter: Option<u32>,
	) -> Result<Option<ObjectVersion>> {
		let dir = self.object_dir(device, policy, partition, hash);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		let mut best_data: Option<(Timestamp, bool)> = None;
		let mut best_tombstone: Option<Timestamp> = None;
		let mut metas: Vec<Timestamp> = vec![];
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_file() {
				continue;
			}
			let name = entry.file_name();
			match parse_filename(&name.to_string_lossy()) {
				Some(FragFile::Data {
					ts,
					frag_index,
					durable,
				}) => {
					if frag_filter.is_some() && frag_index != frag_filter {
						continue;
					}
					// a durable marker wins over a plain fragment at the
					// same timestamp
					let durable = durable || !policy.is_erasure();
					if best_data.map(|best| best < (ts, durable)).unwrap_or(true) {
						best_data = Some((ts, durable));
					}
				}
				Some(FragFile::Tombstone { ts }) => {
					if best_tombstone.map(|best| best < ts).unwrap_or(true) {
						best_tombstone = Some(ts);
					}
				}
				Some(FragFile::Meta { ts }) => metas.push(ts),
				None => (),
			}
		}

		match (best_data, best_tombstone) {
			(None, None) => Ok(None),
			(Some((ts, durable)), tombstone) => match tombstone {
				// a data record at the same timestamp beats the tombstone
				Some(t) if t > ts => Ok(Some(tombstone_version(t))),
				_ => Ok(Some(self.data_version(&dir, ts, durable, metas).await?)),
			},
			(None, Some(t)) => Ok(Some(tombstone_version(t))),
		}
	}

	async fn data_version(
		&self,
		dir: &Path,
		ts_data: Timestamp,
		durable: bool,
		mut metas: Vec<Timestamp>,
	) -> Result<ObjectVersion> {
		metas.retain(|m| *m > ts_data);
		metas.sort();
		let ts_meta = metas.last().copied().unwrap_or(ts_data);

		// The content-type timestamp is recorded in the newest overlay
		// that changed it; overlays without one leave it untouched.
		let mut ts_ctype = ts_data;
		for meta_ts in metas.iter().rev() {
			match fs::read(dir.join(meta_filename(meta_ts))).await {
				Ok(raw) => match serde_json::from_slice::<HashMap<String, String>>(&raw) {
					Ok(map) => {
						if let Some(ts) = map.get("Content-Type-Timestamp") {
							if let Ok(ts) = ts.parse() {
								ts_ctype = ts;
								break;
							}
						}
					}
					Err(e) => warn!("Unreadable metadata in {:?}: {}", dir, e),
				},
				Err(e) => warn!("Unreadable metadata in {:?}: {}", dir, e),
			}
		}

		Ok(ObjectVersion {
			ts_data,
			ts_meta,
			ts_ctype,
			durable,
			tombstone: false,
		})
	}

	/// Store a new data record. For erasure-coded policies the fragment
	/// index names the archive and `durable` decides whether the durable
	/// marker is written immediately.
	pub async fn put(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
		frag_index: Option<u32>,
		durable: bool,
		ts: Timestamp,
		metadata: HashMap<String, String>,
		body: &[u8],
	) -> Result<()> {
		let current = self
			.load_state(device, policy, partition, hash, frag_index)
			.await?;
		if let Some(version) = current {
			if ts <= version.ts_data {
				return Err(StoreError::Conflict);
			}
		}

		let dir = self.object_dir(device, policy, partition, hash);
		write_atomic(&dir, &data_filename(&ts, frag_index, durable), body).await?;
		if !metadata.is_empty() {
			let raw = serde_json::to_vec(&metadata)
				.map_err(|e| StoreError::Message(format!("Cannot serialize metadata: {}", e)))?;
			write_atomic(&dir, &meta_filename(&ts), &raw).await?;
		}
		Ok(())
	}

	/// Apply a metadata-only overlay
	pub async fn post(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
		frag_filter: Option<u32>,
		ts: Timestamp,
		metadata: HashMap<String, String>,
	) -> Result<()> {
		let current = self
			.load_state(device, policy, partition, hash, frag_filter)
			.await?;
		match current {
			None => return Err(StoreError::NotFound),
			Some(version) if version.tombstone => return Err(StoreError::NotFound),
			Some(version) if ts <= version.ts_meta => return Err(StoreError::Conflict),
			Some(_) => (),
		}

		let dir = self.object_dir(device, policy, partition, hash);
		let raw = serde_json::to_vec(&metadata)
			.map_err(|e| StoreError::Message(format!("Cannot serialize metadata: {}", e)))?;
		write_atomic(&dir, &meta_filename(&ts), &raw).await
	}

	/// Record a deletion
	pub async fn delete(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
		frag_filter: Option<u32>,
		ts: Timestamp,
	) -> Result<()> {
		let current = self
			.load_state(device, policy, partition, hash, frag_filter)
			.await?;
		if let Some(version) = current {
			if ts <= version.ts_data {
				return Err(StoreError::Conflict);
			}
		}

		let dir = self.object_dir(device, policy, partition, hash);
		write_atomic(&dir, &tombstone_filename(&ts), b"").await
	}

	/// Add the durable marker to an existing non-durable fragment.
	/// Idempotent: marking an already-durable fragment succeeds.
	pub async fn mark_durable(
		&self,
		device: &str,
		policy: &StoragePolicy,
		partition: &str,
		hash: &ObjectHash,
		ts: Timestamp,
		frag_index: u32,
	) -> Result<()> {
		let dir = self.object_dir(device, policy, partition, hash);
		let from = dir.join(data_filename(&ts, Some(frag_index), false));
		let to = dir.join(data_filename(&ts, Some(frag_index), true));
		match fs::rename(&from, &to).await {
			Ok(()) => sync_dir(&dir).await,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				// already committed by an earlier session
				if fs::metadata(&to).await.is_ok() {
					Ok(())
				} else {
					Err(e.into())
				}
			}
			Err(e) => Err(e.into()),
		}
	}
}

fn tombstone_version(ts: Timestamp) -> ObjectVersion {
	ObjectVersion {
		ts_data: ts,
		ts_meta: ts,
		ts_ctype: ts,
		durable: true,
		tombstone: true,
	}
}

// ---- Atomic file writing ----

async fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
	fs::create_dir_all(dir).await?;

	let path = dir.join(name);
	let mut path_tmp = path.clone();
	let tmp_extension = format!("tmp{}", hex::encode(thread_rng().gen::<[u8; 4]>()));
	path_tmp.set_extension(tmp_extension);

	let mut delete_on_drop = DeleteOnDrop(Some(path_tmp.clone()));

	let mut f = fs::File::create(&path_tmp).await?;
	f.write_all(data).await?;
	f.sync_all().await?;
	drop(f);

	fs::rename(path_tmp, path).await?;

	delete_on_drop.cancel();

	// An fsync on the directory is needed for the rename itself to be
	// persisted. See: http://thedjbway.b0llix.net/qmail/syncdir.html
	sync_dir(dir).await
}

async fn sync_dir(dir: &Path) -> Result<()> {
	let dir = fs::OpenOptions::new().read(true).open(dir).await?;
	dir.sync_all().await?;
	drop(dir);
	Ok(())
}

struct DeleteOnDrop(Option<PathBuf>);

impl DeleteOnDrop {
	fn cancel(&mut self) {
		drop(self.0.take());
	}
}

impl Drop for DeleteOnDrop {
	fn drop(&mut self) {
		if let Some(path) = self.0.take() {
			tokio::spawn(async move {
				if let Err(e) = fs::remove_file(&path).await {
					debug!("DeleteOnDrop failed for {}: {}", path.display(), e);
				}
			});
		}
	}
}
