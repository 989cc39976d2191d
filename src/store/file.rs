//! Simple file-backed [`SecretStore`]: one file per entry under a root directory.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	store::{self, SecretStore, StoreError, StoreFuture},
};

/// Persists each entry as a raw UTF-8 file under `root`.
#[derive(Clone, Debug)]
pub struct FileStore {
	root: PathBuf,
	write_lock: Arc<Mutex<()>>,
}
impl FileStore {
	/// Opens (or creates) a store rooted at the provided directory.
	pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let root = root.into();

		fs::create_dir_all(&root).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", root.display()),
		})?;

		Ok(Self { root, write_lock: Default::default() })
	}

	/// Directory holding the entries.
	pub fn root(&self) -> &Path {
		&self.root
	}

	fn entry_path(&self, name: &str) -> Result<PathBuf, StoreError> {
		store::validate_name(name)?;

		Ok(self.root.join(name))
	}

	fn load_now(&self, name: &str) -> Result<Option<TokenSecret>, StoreError> {
		let path = self.entry_path(name)?;
		let raw = match fs::read_to_string(&path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				}),
		};
		let value = raw.trim();

		if value.is_empty() { Ok(None) } else { Ok(Some(TokenSecret::new(value))) }
	}

	fn persist_now(&self, name: &str, secret: &TokenSecret) -> Result<(), StoreError> {
		let path = self.entry_path(name)?;
		let _guard = self.write_lock.lock();
		let mut tmp_path = path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			restrict_permissions(&file, &tmp_path)?;
			file.write_all(secret.expose().as_bytes()).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", path.display()),
		})
	}

	fn remove_now(&self, name: &str) -> Result<(), StoreError> {
		let path = self.entry_path(name)?;
		let _guard = self.write_lock.lock();

		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", path.display()),
			}),
		}
	}
}
impl SecretStore for FileStore {
	fn load<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<TokenSecret>> {
		Box::pin(async move { self.load_now(name) })
	}

	fn save<'a>(&'a self, name: &'a str, secret: TokenSecret) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.persist_now(name, &secret) })
	}

	fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.remove_now(name) })
	}
}

#[cfg(unix)]
fn restrict_permissions(file: &File, path: &Path) -> Result<(), StoreError> {
	// std
	use std::os::unix::fs::PermissionsExt;

	file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(|e| StoreError::Backend {
		message: format!("Failed to restrict permissions on {}: {e}", path.display()),
	})
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File, _path: &Path) -> Result<(), StoreError> {
	Ok(())
}
