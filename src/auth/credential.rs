//! Short-lived upstream access credential and its expiry bookkeeping.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Upstream access credential held in memory by the refresher.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
	/// Bearer token attached to completion calls; callers must avoid logging it.
	pub token: TokenSecret,
	/// Expiry instant, when upstream provided (or embedded) one.
	pub expires_at: Option<OffsetDateTime>,
	/// Instant the credential was obtained.
	pub issued_at: OffsetDateTime,
}
impl AccessCredential {
	/// Builds a credential from an exchange response.
	///
	/// Expiry comes from `expires_in` when present, otherwise from the `exp` field embedded in
	/// the token's `;`-separated key/value list; with neither the expiry stays unknown. An
	/// `expires_in` too large to represent also leaves the expiry unknown.
	pub fn from_exchange(
		token: impl Into<String>,
		expires_in: Option<i64>,
		now: OffsetDateTime,
	) -> Self {
		let token = TokenSecret::new(token);
		let expires_at = match expires_in {
			Some(secs) => now.checked_add(Duration::seconds(secs)),
			None => embedded_expiry(token.expose()),
		};

		Self { token, expires_at, issued_at: now }
	}

	/// Returns `true` when the credential can still be used at `now`, honoring `buffer`.
	///
	/// Credentials without a known expiry never expire by time.
	pub fn is_valid_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		if self.token.is_blank() {
			return false;
		}

		match self.expires_at {
			Some(expires_at) => now.checked_add(buffer).is_some_and(|edge| edge < expires_at),
			None => true,
		}
	}

	/// Seconds remaining until expiry, if known.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - now)
	}
}
impl Debug for AccessCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessCredential")
			.field("token", &self.token.hint())
			.field("expires_at", &self.expires_at)
			.field("issued_at", &self.issued_at)
			.finish()
	}
}

/// Parses the `exp=<epoch seconds>` field out of a `key=value;key=value` token.
pub fn embedded_expiry(token: &str) -> Option<OffsetDateTime> {
	token
		.split(';')
		.filter_map(|pair| pair.split_once('='))
		.find(|(key, _)| key.trim() == "exp")
		.and_then(|(_, value)| value.trim().parse::<i64>().ok())
		.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
}
