//! Completion request model and the upstream body it renders to.

// self
use crate::_prelude::*;

/// Sampling and truncation options for one completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
	/// Maximum number of tokens to generate.
	pub max_tokens: u32,
	/// Sampling temperature in `0.0..=2.0`.
	pub temperature: f32,
	/// Nucleus sampling mass in `0.0..=1.0`.
	pub top_p: f32,
	/// Number of choices to generate.
	pub n: u32,
	/// Stop sequences that truncate the completion.
	pub stop: Vec<String>,
	/// Language hint forwarded in the `extra` block.
	pub language: String,
}
impl Default for CompletionOptions {
	fn default() -> Self {
		Self {
			max_tokens: 500,
			temperature: 0.0,
			top_p: 1.0,
			n: 1,
			stop: vec!["\n\n".into()],
			language: "plaintext".into(),
		}
	}
}

/// Caller-facing completion request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
	/// Prompt text to complete.
	pub prompt: String,
	/// Sampling options; defaults apply to omitted fields.
	#[serde(default)]
	pub options: CompletionOptions,
}
impl CompletionRequest {
	/// Creates a request with default options.
	pub fn new(prompt: impl Into<String>) -> Self {
		Self { prompt: prompt.into(), options: CompletionOptions::default() }
	}

	/// Replaces the options.
	pub fn with_options(mut self, options: CompletionOptions) -> Self {
		self.options = options;

		self
	}

	/// Rejects requests that upstream would refuse or that make no sense to forward.
	pub fn validate(&self) -> Result<()> {
		let options = &self.options;

		if self.prompt.trim().is_empty() {
			return Err(Error::validation("prompt must not be empty"));
		}
		if options.max_tokens == 0 {
			return Err(Error::validation("max_tokens must be greater than zero"));
		}
		if !(0.0..=2.0).contains(&options.temperature) {
			return Err(Error::validation("temperature must be within 0.0..=2.0"));
		}
		if !(0.0..=1.0).contains(&options.top_p) {
			return Err(Error::validation("top_p must be within 0.0..=1.0"));
		}
		if options.n == 0 {
			return Err(Error::validation("n must be greater than zero"));
		}

		Ok(())
	}

	/// Upstream JSON body; streaming is always requested.
	pub(crate) fn upstream_body(&self) -> UpstreamBody<'_> {
		let options = &self.options;

		UpstreamBody {
			prompt: &self.prompt,
			max_tokens: options.max_tokens,
			temperature: options.temperature,
			top_p: options.top_p,
			n: options.n,
			stop: &options.stop,
			stream: true,
			extra: UpstreamExtra { language: &options.language },
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct UpstreamBody<'a> {
	prompt: &'a str,
	max_tokens: u32,
	temperature: f32,
	top_p: f32,
	n: u32,
	stop: &'a [String],
	stream: bool,
	extra: UpstreamExtra<'a>,
}

#[derive(Debug, Serialize)]
struct UpstreamExtra<'a> {
	language: &'a str,
}
