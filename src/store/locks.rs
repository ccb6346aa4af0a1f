//! Per-partition replication locks.
//!
//! Replication mutates a partition directory, so at most one replication
//! session may hold a given `(device, policy, partition)` at any time,
//! and a device only admits a bounded number of concurrent sessions
//! across its partitions. Both constraints are process-local state with
//! release-on-drop guards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::StoreError;

type PartitionKey = (String, u32, String);

pub struct ReplicationLocks {
	lock_timeout: Duration,
	per_device: usize,
	// Entries are kept for the lifetime of the process; the maps are
	// bounded by the number of partitions and devices on this node.
	partitions: StdMutex<HashMap<PartitionKey, Arc<Mutex<()>>>>,
	devices: StdMutex<HashMap<String, Arc<Semaphore>>>,
}

#[derive(Debug)]
pub struct ReplicationLockGuard {
	_partition: OwnedMutexGuard<()>,
	_device: Option<OwnedSemaphorePermit>,
}

impl ReplicationLocks {
	pub fn new(lock_timeout: Duration, per_device: usize) -> Self {
		Self {
			lock_timeout,
			per_device,
			partitions: StdMutex::new(HashMap::new()),
			devices: StdMutex::new(HashMap::new()),
		}
	}

	/// Acquire the partition lock (and a device slot when a per-device
	/// limit is configured) within the configured timeout. The error
	/// message carries the on-disk lock path for diagnostics.
	pub async fn lock(
		&self,
		device: &str,
		policy_index: u32,
		partition: &str,
		lock_path: String,
	) -> Result<ReplicationLockGuard, StoreError> {
		let partition_lock = {
			let mut map = self.partitions.lock().unwrap();
			map.entry((device.to_string(), policy_index, partition.to_string()))
				.or_insert_with(|| Arc::new(Mutex::new(())))
				.clone()
		};
		let device_slots = if self.per_device > 0 {
			let mut map = self.devices.lock().unwrap();
			Some(
				map.entry(device.to_string())
					.or_insert_with(|| Arc::new(Semaphore::new(self.per_device)))
					.clone(),
			)
		} else {
			None
		};

		let acquire = async {
			let device = match device_slots {
				Some(sem) => Some(
					sem.acquire_owned()
						.await
						.map_err(|_| StoreError::Message("device semaphore closed".to_string()))?,
				),
				None => None,
			};
			let partition = partition_lock.lock_owned().await;
			Ok(ReplicationLockGuard {
				_partition: partition,
				_device: device,
			})
		};
		match timeout(self.lock_timeout, acquire).await {
			Ok(res) => res,
			Err(_) => Err(StoreError::LockTimeout {
				secs: self.lock_timeout.as_secs_f64(),
				path: lock_path,
			}),
		}
	}
}
