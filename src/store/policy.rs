//! Storage policy registry: maps the policy index carried in requests to
//! the disk layout and durability rules it selects

use silo_util::config::{PolicyConfig, PolicyKind};
use silo_util::error::Error;

#[derive(Debug, Clone)]
pub struct StoragePolicy {
	pub index: u32,
	pub name: String,
	pub kind: PolicyKind,
}

impl StoragePolicy {
	/// Name of the per-device data directory this policy stores under
	pub fn data_dir(&self) -> String {
		if self.index == 0 {
			"objects".to_string()
		} else {
			format!("objects-{}", self.index)
		}
	}

	pub fn is_erasure(&self) -> bool {
		self.kind == PolicyKind::ErasureCoded
	}
}

/// The set of policies this node serves. Policy 0 is the legacy default
/// used when a request carries no policy index.
pub struct Policies(Vec<StoragePolicy>);

impl Policies {
	pub fn from_config(configs: &[PolicyConfig]) -> Result<Self, Error> {
		let mut policies = vec![];
		for conf in configs {
			if policies.iter().any(|p: &StoragePolicy| p.index == conf.index) {
				return Err(Error::Message(format!(
					"Duplicate storage policy index {}",
					conf.index
				)));
			}
			policies.push(StoragePolicy {
				index: conf.index,
				name: conf.name.clone(),
				kind: conf.kind,
			});
		}
		policies.sort_by_key(|p| p.index);
		match policies.first() {
			Some(p) if p.index == 0 => Ok(Self(policies)),
			_ => Err(Error::Message(
				"A storage policy with index 0 must be configured".to_string(),
			)),
		}
	}

	pub fn get(&self, index: u32) -> Option<&StoragePolicy> {
		self.0.iter().find(|p| p.index == index)
	}

	/// The policy selected when no policy index is sent
	pub fn legacy_default(&self) -> &StoragePolicy {
		// the constructor guarantees policy 0 exists and sorts first
		&self.0[0]
	}
}
