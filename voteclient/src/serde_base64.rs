use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{de, Deserialize, Deserializer, Serializer};

// a single-purpose type for use in `#[serde(with)]`
//
// Byte fields travel as standard base64 strings. A JSON null decodes to an empty buffer.
pub enum Base64Bytes {}

impl Base64Bytes {
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD.decode(encoded).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
