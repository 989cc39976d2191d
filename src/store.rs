//! Storage contracts and built-in store implementations for the long-lived secret.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Boxed future returned by [`SecretStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable single-value storage keyed by name.
///
/// A missing entry is reported as `Ok(None)`; only backend failures produce errors.
pub trait SecretStore
where
	Self: Send + Sync,
{
	/// Reads the secret stored under `name`, if present.
	fn load<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<TokenSecret>>;

	/// Persists or replaces the secret stored under `name`.
	fn save<'a>(&'a self, name: &'a str, secret: TokenSecret) -> StoreFuture<'a, ()>;

	/// Removes the secret stored under `name`; removing a missing entry is not an error.
	fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`SecretStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Entry name cannot be mapped onto the backend.
	#[error("Invalid entry name: {message}.")]
	InvalidName {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Validates an entry name so it can double as a file name.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
	let valid = !name.is_empty()
		&& name != "."
		&& name != ".."
		&& name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

	if valid {
		Ok(())
	} else {
		Err(StoreError::InvalidName { message: format!("`{name}` is not a plain file name") })
	}
}
