use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use domain::base::ToName;
use domain::tsig::{Algorithm, Key, KeyName};
use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

/// The parsed, validated contents of the TSIG key file (spec §6).
///
/// Hive signs every outbound exchange and verifies every inbound one with
/// this single key; there is no per-peer key material.
pub struct TsigKey {
    pub key: Arc<Key>,
}

impl TsigKey {
    pub fn load(path: &Path) -> Result<TsigKey> {
        let bytes = std::fs::read(path)?;
        TsigKey::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for TsigKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let raw: RawKey = serde_json::from_slice(bytes)?;
        let algorithm = parse_algorithm(&raw.algorithm)?;
        let material = base64::engine::general_purpose::STANDARD.decode(&raw.key)?;
        let name: KeyName = raw.zone_name.parse()?;

        // RFC 2845 fudge: how far a signature's timestamp may drift from
        // the verifier's clock. Hive signs every exchange with 300s, per
        // the key file's only job of carrying the raw key material.
        let key = Key::new(algorithm, &material, name, None, Some(300))
            .map_err(|e| Error::new(ErrorKind::Tsig, e.to_string()))?;

        Ok(TsigKey { key: Arc::new(key) })
    }
}

#[derive(Deserialize)]
struct RawKey {
    algorithm: String,
    key: String,
    #[serde(rename = "zoneName")]
    zone_name: String,
}

fn parse_algorithm(value: &str) -> Result<Algorithm> {
    match value.trim_end_matches('.').to_ascii_lowercase().as_str() {
        "hmac-md5" => Ok(Algorithm::Md5),
        "hmac-sha1" => Ok(Algorithm::Sha1),
        "hmac-sha256" => Ok(Algorithm::Sha256),
        "hmac-sha512" => Ok(Algorithm::Sha512),
        other => Err(Error::new(
            ErrorKind::Key,
            format!("unknown algorithm '{}' in key file", other),
        )),
    }
}

/// A single-entry `domain::tsig::KeyStore`.
///
/// `ServerTransaction`/`ServerSequence` (the server-side TSIG verification
/// primitives `domain` provides) want to look a key up by the name the wire
/// message claims; since Hive only ever has the one configured key, the
/// lookup is a name-and-algorithm comparison rather than a real table.
#[derive(Clone)]
pub struct KeyStore {
    key: Arc<Key>,
}

impl KeyStore {
    pub fn new(key: Arc<Key>) -> Self {
        KeyStore { key }
    }
}

impl domain::tsig::KeyStore for KeyStore {
    type Key = Arc<Key>;

    fn get_key<N: ToName>(&self, name: &N, algorithm: Algorithm) -> Option<Self::Key> {
        if self.key.algorithm() == algorithm && self.key.name().name_eq(name) {
            Some(self.key.clone())
        } else {
            None
        }
    }
}
