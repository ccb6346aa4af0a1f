//! Internal object operations, the dispatch targets of replication
//! sub-requests. Sub-requests never travel through a loopback socket:
//! the receiver builds an in-memory [`SubRequest`] and calls the local
//! handler directly. The `X-Backend-Replication-Headers` header is the
//! contract naming which of the incoming headers the handler persists
//! as replication-authoritative metadata.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Method, StatusCode};
use tokio::sync::Semaphore;

use silo_store::layout::hash_path;
use silo_store::object_store::ObjectStore;
use silo_store::policy::{Policies, StoragePolicy};
use silo_store::StoreError;
use silo_util::config::Config;
use silo_util::time::Timestamp;

use crate::error::Error;

/// One parsed replication sub-request
#[derive(Debug, Clone)]
pub struct SubRequest {
	pub method: Method,
	/// Full object path: `/<device>/<partition>/<account>/<container>/<object>`
	pub path: String,
	/// Header names are lowercased; insertion order is the wire order
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
}

impl SubRequest {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
	}
}

/// Where replication sub-requests land. The object server implements
/// this over the disk store; tests substitute their own recorders.
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
	async fn handle(&self, sub: SubRequest) -> Result<StatusCode, Error>;
}

/// The object server: owns the store, the policy registry and the
/// process-wide replication semaphore
pub struct ObjectServer {
	pub config: Config,
	pub store: Arc<ObjectStore>,
	pub policies: Policies,
	pub replication_semaphore: Arc<Semaphore>,
}

impl ObjectServer {
	pub fn new(config: Config, store: Arc<ObjectStore>, policies: Policies) -> Arc<Self> {
		let replication_semaphore = Arc::new(Semaphore::new(config.replication_concurrency));
		Arc::new(Self {
			config,
			store,
			policies,
			replication_semaphore,
		})
	}

	fn sub_policy(&self, sub: &SubRequest) -> Option<&StoragePolicy> {
		match sub.header("x-backend-storage-policy-index") {
			Some(v) => self.policies.get(v.trim().parse().ok()?),
			None => Some(self.policies.legacy_default()),
		}
	}

	/// The metadata a sub-request asks to persist: the headers listed in
	/// `X-Backend-Replication-Headers`, with the content-type timestamp
	/// recorded alongside whenever the content type is among them
	fn sub_metadata(sub: &SubRequest, ts: &Timestamp) -> HashMap<String, String> {
		let authoritative: Vec<&str> = sub
			.header("x-backend-replication-headers")
			.map(|v| v.split_whitespace().collect())
			.unwrap_or_default();
		let mut metadata = HashMap::new();
		for (name, value) in sub.headers.iter() {
			if authoritative.contains(&name.as_str()) {
				metadata.insert(canonical_header_name(name), value.clone());
			}
		}
		if metadata.contains_key("Content-Type") && !metadata.contains_key("Content-Type-Timestamp")
		{
			metadata.insert("Content-Type-Timestamp".to_string(), ts.internal());
		}
		metadata
	}
}

#[async_trait]
impl UpdateHandler for ObjectServer {
	async fn handle(&self, sub: SubRequest) -> Result<StatusCode, Error> {
		let (device, partition, account, container, object) = match split_object_path(&sub.path) {
			Some(parts) => parts,
			None => return Ok(StatusCode::BAD_REQUEST),
		};
		let policy = match self.sub_policy(&sub) {
			Some(policy) => policy,
			None => return Ok(StatusCode::SERVICE_UNAVAILABLE),
		};
		let ts: Timestamp = match sub.header("x-timestamp").map(|v| v.parse()) {
			Some(Ok(ts)) => ts,
			_ => return Ok(StatusCode::BAD_REQUEST),
		};
		let frag_index: Option<u32> = match sub.header("x-backend-ssync-frag-index") {
			Some(v) => match v.trim().parse() {
				Ok(f) => Some(f),
				Err(_) => return Ok(StatusCode::BAD_REQUEST),
			},
			None => None,
		};
		let hash = hash_path(account, container, object);
		let metadata = Self::sub_metadata(&sub, &ts);

		let result = match sub.method.as_str() {
			"PUT" => {
				let frag_index = if policy.is_erasure() { frag_index } else { None };
				if policy.is_erasure() && frag_index.is_none() {
					return Ok(StatusCode::BAD_REQUEST);
				}
				// fragments arriving ahead of their commit stay
				// non-durable until the sender confirms
				let no_commit = sub
					.header("x-backend-no-commit")
					.map(|v| v.eq_ignore_ascii_case("true"))
					.unwrap_or(false);
				let durable = !policy.is_erasure() || !no_commit;
				self.store
					.put(
						device, policy, partition, &hash, frag_index, durable, ts, metadata,
						&sub.body,
					)
					.await
					.map(|_| StatusCode::CREATED)
			}
			"POST" => self
				.store
				.post(device, policy, partition, &hash, frag_index, ts, metadata)
				.await
				.map(|_| StatusCode::ACCEPTED),
			"DELETE" => self
				.store
				.delete(device, policy, partition, &hash, frag_index, ts)
				.await
				.map(|_| StatusCode::NO_CONTENT),
			_ => return Ok(StatusCode::METHOD_NOT_ALLOWED),
		};

		match result {
			Ok(status) => Ok(status),
			Err(StoreError::Conflict) => Ok(StatusCode::CONFLICT),
			Err(StoreError::NotFound) => Ok(StatusCode::NOT_FOUND),
			Err(e) => {
				error!("Error in {} {}: {}", sub.method, sub.path, e);
				Ok(StatusCode::INTERNAL_SERVER_ERROR)
			}
		}
	}
}

fn split_object_path(path: &str) -> Option<(&str, &str, &str, &str, &str)> {
	let mut parts = path.strip_prefix('/')?.splitn(5, '/');
	let device = parts.next()?;
	let partition = parts.next()?;
	let account = parts.next()?;
	let container = parts.next()?;
	let object = parts.next()?;
	if [device, partition, account, container].iter().any(|p| p.is_empty()) || object.is_empty() {
		return None;
	}
	Some((device, partition, account, container, object))
}

/// Turn a lowercased wire header name back into its canonical form
/// (`x-object-meta-test` -> `X-Object-Meta-Test`)
fn canonical_header_name(name: &str) -> String {
	name.split('-')
		.map(|part| {
			let mut c = part.chars();
			match c.next() {
				Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
				None => String::new(),
			}
		})
		.collect::<Vec<_>>()
		.join("-")
}
