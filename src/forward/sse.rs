//! Incremental decoder for the upstream `data: ` event stream.

// self
use crate::{_prelude::*, forward::CompletionChunk};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Decoded unit of the upstream stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseFrame {
	/// One text fragment for one choice.
	Chunk(CompletionChunk),
	/// `data: [DONE]` was received.
	Done,
}

#[derive(Debug, Deserialize)]
struct Fragment {
	#[serde(default)]
	choices: Vec<FragmentChoice>,
}

#[derive(Debug, Deserialize)]
struct FragmentChoice {
	#[serde(default)]
	text: String,
	#[serde(default)]
	index: u32,
	#[serde(default)]
	finish_reason: Option<String>,
}

/// Line decoder that tolerates arbitrary chunk boundaries.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters and lines split across
/// network reads decode correctly. Once `[DONE]` is seen every further byte is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
	buffer: Vec<u8>,
	done: bool,
}
impl SseDecoder {
	/// Returns `true` after the terminal marker was decoded.
	pub fn is_done(&self) -> bool {
		self.done
	}

	/// Feeds one network chunk and returns the frames completed by it.
	pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
		if self.done {
			return Vec::new();
		}

		self.buffer.extend_from_slice(bytes);

		let mut frames = Vec::new();

		while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
			let line = self.buffer.drain(..=end).collect::<Vec<_>>();

			self.decode_line(&line, &mut frames);

			if self.done {
				self.buffer.clear();

				break;
			}
		}

		frames
	}

	/// Flushes a trailing line that was not newline-terminated when the body ended.
	pub fn finish(&mut self) -> Vec<SseFrame> {
		let mut frames = Vec::new();

		if !self.done && !self.buffer.is_empty() {
			let line = std::mem::take(&mut self.buffer);

			self.decode_line(&line, &mut frames);
		}

		frames
	}

	fn decode_line(&mut self, raw: &[u8], frames: &mut Vec<SseFrame>) {
		let line = String::from_utf8_lossy(raw);
		let line = line.trim_end_matches(['\n', '\r']);
		let Some(data) = line.strip_prefix(DATA_PREFIX) else {
			return;
		};
		let data = data.trim_start();

		if data == DONE_MARKER {
			self.done = true;
			frames.push(SseFrame::Done);

			return;
		}

		match serde_json::from_str::<Fragment>(data) {
			Ok(fragment) => frames.extend(fragment.choices.into_iter().map(|choice| {
				SseFrame::Chunk(CompletionChunk {
					text: choice.text,
					index: choice.index,
					finish_reason: choice.finish_reason,
				})
			})),
			Err(e) => tracing::debug!(error = %e, len = data.len(), "Skipping malformed SSE fragment."),
		}
	}
}
