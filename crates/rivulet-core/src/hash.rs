//! blake3 fingerprints of graph descriptions.
//!
//! A run report carries the fingerprint of its engine config, node attributes
//! and edges, so two reports can be compared for "same graph, same settings".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First eight hex characters; enough to tell runs apart in logs.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.short())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    Hash256(blake3::hash(bytes).into())
}

/// Fingerprint of any serializable value. Map-backed values (attributes,
/// schemas by name) serialize in key order, so the result does not depend on
/// insertion order.
pub fn hash_serde<T: Serialize>(value: &T) -> Result<Hash256> {
    Ok(hash_bytes(&serde_json::to_vec(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;

    #[test]
    fn attribute_fingerprint_is_order_independent() {
        let a = Attributes::new().with("x", "1").with("y", "2");
        let b = Attributes::new().with("y", "2").with("x", "1");
        assert_eq!(hash_serde(&a).unwrap(), hash_serde(&b).unwrap());
        assert_ne!(hash_serde(&a).unwrap(), hash_serde(&Attributes::new()).unwrap());
    }

    #[test]
    fn hex_forms() {
        let h = hash_bytes(b"rivulet");
        assert_eq!(h.to_hex().len(), 64);
        assert!(h.to_hex().starts_with(&h.short()));
        assert_eq!(h.to_string(), h.to_hex());
    }
}
