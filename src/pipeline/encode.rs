//! Image encoding: canonical PNG bytes → base64 `ImageData`.
//!
//! Vision APIs accept images as base64 data embedded in the JSON request
//! body. The normalization stage already guarantees PNG — lossless, so the
//! digits and fine print of an invoice survive — leaving this stage a pure
//! wrapper. `detail: "high"` opts into the full image-tile budget on
//! GPT-4-class models; without it small line-item text gets lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap canonical PNG bytes as a base64 attachment for the vision request.
pub fn encode_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!(bytes = b64.len(), "encoded page image for the provider");
    ImageData::new(b64, "image/png").with_detail("high")
}
