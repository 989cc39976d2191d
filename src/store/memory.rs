//! Thread-safe in-memory [`SecretStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	store::{self, SecretStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<String, TokenSecret>>>;

/// Thread-safe storage backend that keeps secrets in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Returns a store pre-seeded with one entry.
	pub fn with_entry(name: impl Into<String>, secret: TokenSecret) -> Self {
		let store = Self::default();

		store.0.write().insert(name.into(), secret);

		store
	}

	/// Returns `true` when an entry exists under `name`.
	pub fn contains(&self, name: &str) -> bool {
		self.0.read().contains_key(name)
	}

	fn load_now(map: StoreMap, name: &str) -> Result<Option<TokenSecret>, StoreError> {
		store::validate_name(name)?;

		Ok(map.read().get(name).cloned())
	}

	fn save_now(map: StoreMap, name: &str, secret: TokenSecret) -> Result<(), StoreError> {
		store::validate_name(name)?;
		map.write().insert(name.to_owned(), secret);

		Ok(())
	}

	fn remove_now(map: StoreMap, name: &str) -> Result<(), StoreError> {
		store::validate_name(name)?;
		map.write().remove(name);

		Ok(())
	}
}
impl SecretStore for MemoryStore {
	fn load<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<TokenSecret>> {
		let map = self.0.clone();

		Box::pin(async move { Self::load_now(map, name) })
	}

	fn save<'a>(&'a self, name: &'a str, secret: TokenSecret) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, name, secret) })
	}

	fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::remove_now(map, name) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn save_load_remove_cycle() {
		let store = MemoryStore::default();

		assert!(store.load("github_token").await.expect("Load should succeed.").is_none());

		store
			.save("github_token", TokenSecret::new("gho_memory"))
			.await
			.expect("Saving into the memory store should succeed.");

		let loaded = store
			.load("github_token")
			.await
			.expect("Load should succeed.")
			.expect("Saved secret should be present.");

		assert_eq!(loaded.expose(), "gho_memory");

		store.remove("github_token").await.expect("Remove should succeed.");

		assert!(!store.contains("github_token"));
	}
}
