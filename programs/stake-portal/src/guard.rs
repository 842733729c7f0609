use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::abi;
use crate::error::PortalError;
use crate::state::MAX_SIGNATURE_AGE_MS;

/// Compares the `x-api-key` header against the configured secret without
/// short-circuiting on the first differing byte.
pub fn validate_api_key(expected: &str, provided: Option<&str>) -> Result<(), PortalError> {
    let provided = provided.ok_or(PortalError::InvalidApiKey)?;
    if expected.is_empty() || expected.len() != provided.len() {
        return Err(PortalError::InvalidApiKey);
    }
    let diff = expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return Err(PortalError::InvalidApiKey);
    }
    Ok(())
}

pub fn validate_address(address: &str) -> Result<(), PortalError> {
    if !abi::is_hex_address(address) {
        return Err(PortalError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Hash signed by `personal_sign` (EIP-191 version 0x45).
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    abi::keccak256(&data)
}

/// Recovers the checksummed address that produced a 65-byte `r || s || v`
/// signature over `message`.
pub fn recover_signer(message: &str, signature: &str) -> Result<String, PortalError> {
    let bytes = abi::decode_hex(signature).map_err(|_| PortalError::MalformedSignature)?;
    if bytes.len() != 65 {
        return Err(PortalError::MalformedSignature);
    }
    let v = match bytes[64] {
        0 | 1 => bytes[64],
        27 | 28 => bytes[64] - 27,
        _ => return Err(PortalError::MalformedSignature),
    };
    let sig = Signature::from_slice(&bytes[..64]).map_err(|_| PortalError::MalformedSignature)?;
    let recovery_id = RecoveryId::from_byte(v).ok_or(PortalError::MalformedSignature)?;

    let hash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
        .map_err(|_| PortalError::InvalidSignature)?;
    Ok(verifying_key_address(&key))
}

pub fn verifying_key_address(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = abi::keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    abi::to_checksum_address(&address)
}

/// Reads the `Timestamp: <unix ms>` line the client writes into the signed message.
pub fn signed_timestamp(message: &str) -> Option<i64> {
    message
        .lines()
        .find_map(|line| line.trim().strip_prefix("Timestamp:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Checks that `signature` over `message` was made by `address`, that the
/// message names the address, and that the timestamp inside the signed
/// message is within [`MAX_SIGNATURE_AGE_MS`] of `now_ms`.
///
/// `claimed_ms` is the unsigned timestamp sent next to the message; when
/// present it must agree with the signed one.
pub fn verify_wallet_signature(
    address: &str,
    message: &str,
    signature: &str,
    claimed_ms: Option<i64>,
    now_ms: i64,
) -> Result<(), PortalError> {
    if !message.to_lowercase().contains(&address.to_lowercase()) {
        return Err(PortalError::MessageMismatch);
    }
    let signed_ms = signed_timestamp(message).ok_or(PortalError::MissingTimestamp)?;
    if claimed_ms.is_some_and(|claimed| claimed != signed_ms) {
        return Err(PortalError::MessageMismatch);
    }
    if now_ms.abs_diff(signed_ms) > MAX_SIGNATURE_AGE_MS.unsigned_abs() {
        return Err(PortalError::StaleSignature);
    }
    let signer = recover_signer(message, signature)?;
    if !signer.eq_ignore_ascii_case(address) {
        tracing::debug!(%signer, claimed = %address, "signature signer mismatch");
        return Err(PortalError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    pub(crate) fn test_key(seed: u8) -> SigningKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        bytes[0] = 0x11;
        SigningKey::from_slice(&bytes).unwrap()
    }

    pub(crate) fn sign_personal(key: &SigningKey, message: &str) -> String {
        let hash = personal_message_hash(message);
        let (sig, recid) = key.sign_prehash_recoverable(&hash).unwrap();
        let mut out = sig.to_bytes().to_vec();
        out.push(27 + recid.to_byte());
        format!("0x{}", hex::encode(out))
    }

    pub(crate) fn key_address(key: &SigningKey) -> String {
        verifying_key_address(key.verifying_key())
    }

    #[test]
    fn api_key_checks() {
        assert!(validate_api_key("secret", Some("secret")).is_ok());
        assert!(validate_api_key("secret", Some("secreT")).is_err());
        assert!(validate_api_key("secret", Some("secret2")).is_err());
        assert!(validate_api_key("secret", None).is_err());
        assert!(validate_api_key("", Some("")).is_err());
    }

    #[test]
    fn known_private_key_address() {
        // private key 1 maps to the generator point
        let mut one = [0u8; 32];
        one[31] = 1;
        let key = SigningKey::from_slice(&one).unwrap();
        assert_eq!(
            key_address(&key),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn recovers_personal_sign_signer() {
        let key = test_key(7);
        let address = key_address(&key);
        let message = format!("Verify wallet ownership\nWallet: {}\nTimestamp: 1000", address);
        let signature = sign_personal(&key, &message);

        assert_eq!(recover_signer(&message, &signature).unwrap(), address);
        assert!(verify_wallet_signature(&address, &message, &signature, Some(1000), 2000).is_ok());
    }

    #[test]
    fn rejects_other_signer() {
        let key = test_key(7);
        let other = key_address(&test_key(8));
        let message = format!("Verify wallet ownership\nWallet: {}\nTimestamp: 0", other);
        let signature = sign_personal(&key, &message);

        assert!(matches!(
            verify_wallet_signature(&other, &message, &signature, None, 0),
            Err(PortalError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_message_without_address_and_stale_timestamps() {
        let key = test_key(3);
        let address = key_address(&key);
        let signature = sign_personal(&key, "hello");
        assert!(matches!(
            verify_wallet_signature(&address, "hello", &signature, None, 0),
            Err(PortalError::MessageMismatch)
        ));

        let message = format!("Wallet: {}\nTimestamp: 0", address);
        let signature = sign_personal(&key, &message);
        let now = 100 * 60 * 1000;
        assert!(matches!(
            verify_wallet_signature(&address, &message, &signature, Some(0), now),
            Err(PortalError::StaleSignature)
        ));
        // omitting the unsigned field does not skip the age check
        assert!(matches!(
            verify_wallet_signature(&address, &message, &signature, None, now),
            Err(PortalError::StaleSignature)
        ));
    }

    #[test]
    fn freshness_comes_from_the_signed_message() {
        let key = test_key(4);
        let address = key_address(&key);
        let now = 1_760_000_000_000;

        let untimed = format!("Verify wallet ownership\nWallet: {}", address);
        assert!(matches!(
            verify_wallet_signature(&address, &untimed, &sign_personal(&key, &untimed), Some(now), now),
            Err(PortalError::MissingTimestamp)
        ));

        // a fresh unsigned field cannot vouch for an old signed message
        let old = format!("Verify wallet ownership\nWallet: {}\nTimestamp: 1000", address);
        assert!(matches!(
            verify_wallet_signature(&address, &old, &sign_personal(&key, &old), Some(now), now),
            Err(PortalError::MessageMismatch)
        ));

        let fresh = format!("Verify wallet ownership\nWallet: {}\nTimestamp: {}", address, now - 5_000);
        let signature = sign_personal(&key, &fresh);
        assert!(verify_wallet_signature(&address, &fresh, &signature, None, now).is_ok());
        assert!(verify_wallet_signature(&address, &fresh, &signature, Some(now - 5_000), now).is_ok());
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflows() {
        let key = test_key(6);
        let address = key_address(&key);
        let now = 1_760_000_000_000;
        for ts in [i64::MIN, i64::MAX] {
            let message = format!("Verify wallet ownership\nWallet: {}\nTimestamp: {}", address, ts);
            let signature = sign_personal(&key, &message);
            assert!(matches!(
                verify_wallet_signature(&address, &message, &signature, Some(ts), now),
                Err(PortalError::StaleSignature)
            ));
        }
        let message = format!("Verify wallet ownership\nWallet: {}\nTimestamp: {}", address, now);
        assert!(matches!(
            verify_wallet_signature(&address, &message, &sign_personal(&key, &message), Some(i64::MIN), now),
            Err(PortalError::MessageMismatch)
        ));
    }

    #[test]
    fn reads_timestamp_line() {
        assert_eq!(signed_timestamp("Verify\nWallet: 0x1\nTimestamp: 17"), Some(17));
        assert_eq!(signed_timestamp("Timestamp:-5"), Some(-5));
        assert_eq!(signed_timestamp("Wallet: 0x1"), None);
        assert_eq!(signed_timestamp("Timestamp: soon"), None);
    }

    #[test]
    fn malformed_signatures() {
        assert!(matches!(recover_signer("m", "0x1234"), Err(PortalError::MalformedSignature)));
        assert!(matches!(recover_signer("m", "nothex"), Err(PortalError::MalformedSignature)));
        let mut bad_v = vec![1u8; 64];
        bad_v.push(5);
        assert!(matches!(
            recover_signer("m", &hex::encode(bad_v)),
            Err(PortalError::MalformedSignature)
        ));
    }
}
