// self
use crate::_prelude::*;

/// Client-identification headers the completion upstream expects from editor integrations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamQuirks {
	/// Value of the `editor-version` header.
	pub editor_version: String,
	/// Value of the `editor-plugin-version` header.
	pub editor_plugin_version: String,
	/// Value of the `user-agent` header.
	pub user_agent: String,
}
impl Default for UpstreamQuirks {
	fn default() -> Self {
		Self {
			editor_version: "vscode/1.96.2".into(),
			editor_plugin_version: "copilot/1.250.0".into(),
			user_agent: concat!("copilot-gateway/", env!("CARGO_PKG_VERSION")).into(),
		}
	}
}
