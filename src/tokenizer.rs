//! Token counting for usage metering.
//!
//! A pure function, text -> token count, backed by `tiktoken-rs`. The
//! BPE tables are loaded once behind a `once_cell::sync::Lazy` (the
//! teacher uses the same lazy-static-for-expensive-model-state pattern
//! for its ONNX tokenizer in `inference_engine.rs`) and reused for every
//! call for the lifetime of the process.
//!
//! The spec calls character-length counting a bug (see design notes); this
//! module exists precisely so usage accounting never falls back to it.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

static CL100K: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is bundled"));

/// Count tokens for `text` as the given model would see it. Unrecognised
/// model names fall back to `cl100k_base` rather than failing the
/// request — token metering is best-effort instrumentation, not a gate
/// on serving the request.
pub fn count_tokens(model: &str, text: &str) -> usize {
    match tiktoken_rs::get_bpe_from_model(model) {
        Ok(bpe) => bpe.encode_with_special_tokens(text).len(),
        Err(_) => CL100K.encode_with_special_tokens(text).len(),
    }
}
