//! Request fingerprints for idempotency checks

use crate::error::LedgerResult;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA256 fingerprint of a request payload.
///
/// The payload is first converted to a `serde_json::Value`, whose object keys
/// are ordered, so field order in the original struct or JSON body does not
/// change the result.
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> LedgerResult<String> {
    let canonical = serde_json::to_value(payload)?;
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&json!({"kind": "fee", "code": "kick"})).unwrap();
        let b = fingerprint(&json!({"code": "kick", "kind": "fee"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        let a = fingerprint(&json!({"kind": "fee", "code": "kick"})).unwrap();
        let b = fingerprint(&json!({"kind": "fee", "code": "ban"})).unwrap();
        assert_ne!(a, b);
    }
}
