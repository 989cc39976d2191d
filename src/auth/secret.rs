//! Secure token secret wrapper that redacts sensitive material.

// self
use crate::_prelude::*;

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	const HINT_LEN: usize = 4;
	const HINT_MIN_SECRET_LEN: usize = 12;

	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the wrapped value is empty or whitespace.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}

	/// Returns a fixed-length suffix hint (`…abcd`) safe for logs and debug output.
	///
	/// Secrets too short to hide most of their value yield `<redacted>` instead.
	pub fn hint(&self) -> String {
		let chars = self.0.chars().count();

		if chars < Self::HINT_MIN_SECRET_LEN {
			return "<redacted>".into();
		}

		let suffix = self.0.chars().skip(chars - Self::HINT_LEN).collect::<String>();

		format!("…{suffix}")
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn hint_shows_only_a_fixed_suffix() {
		let secret = TokenSecret::new("gho_0123456789abcdef");

		assert_eq!(secret.hint(), "…cdef");
		assert_eq!(TokenSecret::new("short").hint(), "<redacted>");
	}
}
