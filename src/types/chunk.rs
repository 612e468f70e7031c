use serde::{Deserialize, Serialize};

/// Position of a frame inside a container. Position is the only frame identifier.
pub type FrameNumber = u64;

/// A bounded unit of source text with its frame back-reference.
///
/// This is also the payload embedded in each frame's QR code, serialized as
/// compact JSON `{"id":..,"text":..,"frame":..}`, which lets a decoded frame verify
/// itself without the external index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub text: String,
    pub frame: FrameNumber,
}

impl Chunk {
    /// One chunk maps to exactly one frame, so the frame number equals the id.
    #[must_use]
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            frame: id,
        }
    }

    /// Assign dense ids starting at zero, in input order.
    #[must_use]
    pub fn sequence<S: AsRef<str>>(texts: &[S]) -> Vec<Self> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| Self::new(idx as u64, text.as_ref()))
            .collect()
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
