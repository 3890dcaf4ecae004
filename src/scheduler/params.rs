//! Request parameters, their normalisation into [`SharedParams`], and the
//! canonical fingerprint used as the coalescing key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `prompt` as sent by the client: either a single string or an ordered
/// list of strings. Both forms are legal at the HTTP boundary (P8 in the
/// design doc); the admission front-end expands a list into one waiter
/// per element so the scheduler's one-waiter-one-prompt invariant (I2/I3)
/// never has to special-case it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    Single(String),
    Many(Vec<String>),
}

impl PromptInput {
    pub fn into_prompts(self) -> Vec<String> {
        match self {
            PromptInput::Single(s) => vec![s],
            PromptInput::Many(v) => v,
        }
    }
}

/// The inbound `POST /v1/completions` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequestBody {
    pub prompt: Option<PromptInput>,
    pub max_tokens: Option<u32>,
    pub n: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub temperature: Option<f32>,
}

/// Canonical, model-forced, prompt-stripped, null-dropped view of a
/// request's non-prompt parameters. Two `CompletionRequestBody` values
/// that agree on every field other than `prompt` produce an identical
/// `SharedParams`, and therefore an identical [`Fingerprint`].
///
/// Backed by a `BTreeMap` (not a `HashMap`) deliberately: serialising a
/// `BTreeMap` with `serde_json` always visits keys in ascending order, so
/// the canonical encoding falls out of the container choice instead of an
/// explicit sort step that could be forgotten at a second call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedParams(BTreeMap<String, serde_json::Value>);

impl SharedParams {
    pub fn from_request(req: &CompletionRequestBody, model: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("model".to_string(), serde_json::Value::String(model.to_string()));
        if let Some(max_tokens) = req.max_tokens {
            map.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        }
        if let Some(n) = req.n {
            map.insert("n".to_string(), serde_json::json!(n));
        }
        if let Some(stop) = &req.stop {
            map.insert("stop".to_string(), serde_json::json!(stop));
        }
        if let Some(temperature) = req.temperature {
            map.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        SharedParams(map)
    }

    /// `n`, defaulting to 1 per the spec (absent ⇒ 1).
    pub fn n(&self) -> usize {
        self.0
            .get("n")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(1)
    }

    pub fn model(&self) -> &str {
        self.0.get("model").and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Merge `model` plus the non-prompt fields into one JSON object for
    /// the upstream request body.
    pub fn as_json_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.0.clone().into_iter().collect()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        // BTreeMap iteration order guarantees key-ascending order; serde_json
        // emits no insignificant whitespace and shortest round-trip numbers
        // by default, so this is already the canonical encoding.
        let bytes = serde_json::to_vec(&self.0).expect("SharedParams always serializes");
        Fingerprint(bytes)
    }
}

/// Canonical byte-identity of a [`SharedParams`]. Two `SharedParams` with
/// equal content produce a byte-identical fingerprint (P5), regardless of
/// the order their fields were set in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;

    fn body(n: Option<u32>, max_tokens: Option<u32>, stop: Option<Vec<String>>) -> CompletionRequestBody {
        CompletionRequestBody {
            prompt: Some(PromptInput::Single("irrelevant".into())),
            max_tokens,
            n,
            stop,
            temperature: None,
        }
    }

    #[test]
    fn fingerprint_ignores_prompt() {
        let a = SharedParams::from_request(&body(Some(2), Some(16), None), "m");
        let b = SharedParams::from_request(
            &CompletionRequestBody {
                prompt: Some(PromptInput::Single("totally different".into())),
                max_tokens: Some(16),
                n: Some(2),
                stop: None,
                temperature: None,
            },
            "m",
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_is_order_independent_of_construction() {
        // Two BTreeMaps built by inserting fields in different orders still
        // serialize identically, since BTreeMap always iterates sorted.
        let a = SharedParams::from_request(&body(Some(1), Some(10), Some(vec!["\n".into()])), "m");
        let b = SharedParams::from_request(&body(Some(1), Some(10), Some(vec!["\n".into()])), "m");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn missing_n_defaults_to_one() {
        let s = SharedParams::from_request(&body(None, None, None), "m");
        assert_eq!(s.n(), 1);
    }

    #[test]
    fn empty_stop_distinct_from_missing_stop() {
        let with_empty = SharedParams::from_request(&body(None, None, Some(vec![])), "m");
        let missing = SharedParams::from_request(&body(None, None, None), "m");
        assert_ne!(with_empty.fingerprint(), missing.fingerprint());
    }

    #[test]
    fn null_valued_options_are_dropped_before_fingerprinting() {
        let s = SharedParams::from_request(&body(None, None, None), "m");
        let fields = s.as_json_fields();
        assert!(!fields.contains_key("n"));
        assert!(!fields.contains_key("max_tokens"));
        assert!(!fields.contains_key("stop"));
        assert_eq!(fields.get("model").unwrap(), "m");
    }
}
