//! Content fingerprints: blake3 digests of attempt output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content-derived identifier of an attempt's output.
///
/// Two attempts that produced the same content always share a fingerprint,
/// whichever level produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "hex_digest")] [u8; 32]);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Fingerprint a JSON content value.
    ///
    /// Strings hash their raw text so `"x"` and `Value::String("x")` agree.
    /// Other values hash their compact serialization; object keys are
    /// already sorted by `serde_json::Map`, so equal values hash equally.
    /// Returns `None` for `Null`, meaning "no content produced".
    pub fn of_content(content: &Value) -> Option<Self> {
        match content {
            Value::Null => None,
            Value::String(s) => Some(Self::of_bytes(s.as_bytes())),
            other => Some(Self::of_bytes(other.to_string().as_bytes())),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex chars, for logs and evidence lines.
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

mod hex_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let hex = String::deserialize(d)?;
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(D::Error::custom("fingerprint must be 64 hex chars"));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(D::Error::custom)?;
            out[i] = u8::from_str_radix(pair, 16).map_err(D::Error::custom)?;
        }
        Ok(out)
    }
}
