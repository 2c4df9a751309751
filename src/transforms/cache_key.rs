//! `prompt_cache_key` normalization.
//!
//! Request side: the field is forced into a known state before forwarding,
//! so the upstream never sees an accidental blank key. Response side: when
//! the caller declared a key, buffered JSON bodies get it written back over
//! whatever the upstream echoed.

use serde_json::Value;

use crate::constants::CACHE_KEY_FIELD;

/// Outcome of normalizing a request body
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CacheKeyOutcome {
    /// The caller-declared key, remembered for the response override
    pub declared: Option<String>,
    /// Whether the body was mutated and must be re-serialized
    pub changed: bool,
}

/// Normalize the `prompt_cache_key` field of a parsed request body.
///
/// `explicit` is a key supplied out of band (header or query alias); it is
/// written into the body and wins over the body's own field. Otherwise a
/// present non-blank string is kept as the declared key, and anything else
/// (absent, null, blank, wrong type) is coerced to null. Non-object bodies
/// are left alone.
pub fn normalize_cache_key(body: &mut Value, explicit: Option<&str>) -> CacheKeyOutcome {
    let Some(obj) = body.as_object_mut() else {
        return CacheKeyOutcome::default();
    };

    if let Some(key) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        let value = Value::String(key.to_string());
        let changed = obj.get(CACHE_KEY_FIELD) != Some(&value);
        if changed {
            obj.insert(CACHE_KEY_FIELD.to_string(), value);
        }
        return CacheKeyOutcome {
            declared: Some(key.to_string()),
            changed,
        };
    }

    match obj.get(CACHE_KEY_FIELD) {
        Some(Value::String(s)) if !s.trim().is_empty() => CacheKeyOutcome {
            declared: Some(s.clone()),
            changed: false,
        },
        Some(Value::Null) => CacheKeyOutcome::default(),
        _ => {
            obj.insert(CACHE_KEY_FIELD.to_string(), Value::Null);
            CacheKeyOutcome {
                declared: None,
                changed: true,
            }
        }
    }
}

/// Overwrite the cache key in a buffered JSON response body.
///
/// Returns the replacement text when the bytes parse to an object that
/// already carries the field; otherwise `None` and the original bytes stand.
pub fn override_json_response(raw: &[u8], declared: &str) -> Option<String> {
    let mut value: Value = serde_json::from_slice(raw).ok()?;
    let obj = value.as_object_mut()?;
    if !obj.contains_key(CACHE_KEY_FIELD) {
        return None;
    }

    obj.insert(
        CACHE_KEY_FIELD.to_string(),
        Value::String(declared.to_string()),
    );
    serde_json::to_string(&value).ok()
}
