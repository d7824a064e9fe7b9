use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::PoolError;

const SECRET_LEN: usize = 32;
const COMPRESSED_POINT_LEN: usize = 33;

/// Static key material for one handshake attempt.
#[derive(Debug)]
pub struct KeyMaterial {
    pub local: SecretKey,
    pub remote: Option<PublicKey>,
}

/// Normalize the caller's `(local, remote)` hex pair.
///
/// Which inputs are empty decides the case: both empty mints a fresh local
/// scalar, an empty remote parses only the local key, and anything else
/// parses both. The caller re-encodes the returned scalar into the
/// descriptor so retries reuse the same identity.
pub fn parse_keys(local_hex: &str, remote_hex: &str) -> Result<KeyMaterial, PoolError> {
    match (local_hex.is_empty(), remote_hex.is_empty()) {
        // New session for which no local key has been derived yet.
        (true, true) => Ok(KeyMaterial {
            local: SecretKey::random(&mut OsRng),
            remote: None,
        }),

        // A local key was provided but the peer has not been seen yet.
        (_, true) => Ok(KeyMaterial {
            local: decode_secret(local_hex)?,
            remote: None,
        }),

        (_, false) => Ok(KeyMaterial {
            local: decode_secret(local_hex)?,
            remote: Some(decode_public(remote_hex)?),
        }),
    }
}

pub fn encode_secret(key: &SecretKey) -> String {
    hex::encode(key.to_bytes())
}

pub fn encode_public(key: &PublicKey) -> String {
    hex::encode(key.to_sec1_bytes())
}

fn decode_secret(raw: &str) -> Result<SecretKey, PoolError> {
    let bytes = hex::decode(raw).map_err(|err| PoolError::BadKey(format!("local key: {err}")))?;
    if bytes.len() != SECRET_LEN {
        return Err(PoolError::BadKey(format!(
            "local key must be {SECRET_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    SecretKey::from_slice(&bytes).map_err(|err| PoolError::BadKey(format!("local key: {err}")))
}

fn decode_public(raw: &str) -> Result<PublicKey, PoolError> {
    let bytes = hex::decode(raw).map_err(|err| PoolError::BadKey(format!("remote key: {err}")))?;
    if bytes.len() != COMPRESSED_POINT_LEN {
        return Err(PoolError::BadKey(format!(
            "remote key must be a {COMPRESSED_POINT_LEN}-byte compressed point, got {} bytes",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|err| PoolError::BadKey(format!("remote key: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_fresh_scalar_when_both_inputs_empty() {
        let keys = parse_keys("", "").unwrap();
        assert!(keys.remote.is_none());

        let encoded = encode_secret(&keys.local);
        assert_eq!(encoded.len(), 64);
        // Stable identity across a retry with the minted key.
        let reparsed = parse_keys(&encoded, "").unwrap();
        assert_eq!(encode_secret(&reparsed.local), encoded);
    }

    #[test]
    fn parses_both_keys_when_present() {
        let local = SecretKey::random(&mut OsRng);
        let remote = SecretKey::random(&mut OsRng).public_key();

        let keys = parse_keys(&encode_secret(&local), &encode_public(&remote)).unwrap();
        assert_eq!(keys.local.to_bytes(), local.to_bytes());
        assert_eq!(keys.remote.unwrap(), remote);
    }

    #[test]
    fn compressed_encoding_starts_with_point_prefix() {
        let remote = SecretKey::random(&mut OsRng).public_key();
        let encoded = encode_public(&remote);
        assert_eq!(encoded.len(), 66);
        assert!(encoded.starts_with("02") || encoded.starts_with("03"));
    }

    #[test]
    fn rejects_malformed_local_key() {
        assert!(matches!(
            parse_keys("zz", "").unwrap_err(),
            PoolError::BadKey(_)
        ));
        assert!(matches!(
            parse_keys("deadbeef", "").unwrap_err(),
            PoolError::BadKey(_)
        ));
        // A zero scalar decodes as hex but is not on the curve's scalar field.
        let zeros = "00".repeat(32);
        assert!(matches!(
            parse_keys(&zeros, "").unwrap_err(),
            PoolError::BadKey(_)
        ));
    }

    #[test]
    fn rejects_malformed_remote_key() {
        let local = encode_secret(&SecretKey::random(&mut OsRng));
        // Wrong length.
        assert!(matches!(
            parse_keys(&local, "0202").unwrap_err(),
            PoolError::BadKey(_)
        ));
        // Right length, not a curve point.
        let bogus = format!("05{}", "11".repeat(32));
        assert!(matches!(
            parse_keys(&local, &bogus).unwrap_err(),
            PoolError::BadKey(_)
        ));
    }

    #[test]
    fn remote_without_local_is_rejected() {
        let remote = encode_public(&SecretKey::random(&mut OsRng).public_key());
        assert!(matches!(
            parse_keys("", &remote).unwrap_err(),
            PoolError::BadKey(_)
        ));
    }
}
