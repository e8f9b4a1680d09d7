//! Version comparison.
//!
//! The service, the bridge and the game mod all report a decimal version
//! (e.g. `1.02`). Any difference is a mismatch; there is no ordering.

use serde::{Deserialize, Deserializer};

/// Tolerance for decimal versions that went through a float round-trip.
const VERSION_EPSILON: f64 = 1e-9;

/// True when two reported versions are the same release.
pub fn versions_match(a: f64, b: f64) -> bool {
    (a - b).abs() < VERSION_EPSILON
}

/// Accepts `1.02` as well as `"1.02"`.
pub fn deserialize_version<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(v) => Ok(v),
        Raw::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "deserialize_version")]
        version: f64,
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match(1.02, 1.02));
        assert!(versions_match(1.02, 1.0 + 0.02));
        assert!(!versions_match(1.02, 1.03));
        assert!(!versions_match(1.0, 0.0));
    }

    #[test]
    fn test_version_from_number_or_string() {
        let a: Wrapper = serde_json::from_str(r#"{"version": 1.02}"#).unwrap();
        let b: Wrapper = serde_json::from_str(r#"{"version": "1.02"}"#).unwrap();
        assert!(versions_match(a.version, b.version));

        assert!(serde_json::from_str::<Wrapper>(r#"{"version": "latest"}"#).is_err());
    }
}
