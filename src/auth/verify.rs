//! Ethereum personal-message (EIP-191) signature recovery.
//!
//! Runs on both sides of the flow: the auth gate checks a fresh signature
//! locally before bothering the server, and the verify endpoint runs the same
//! check as the authoritative one.

use alloy_primitives::{eip191_hash_message, keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

/// Length of an `r || s || v` signature.
const SIGNATURE_LEN: usize = 65;

const ADDRESS_LEN: usize = 20;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{0}")]
    Recovery(String),

    #[error("Recovered address mismatch")]
    Mismatch { expected: Address, recovered: Address },
}

/// Parse a hex address. The `0x` prefix is optional and case is ignored:
/// mixed-case checksum encoding is not treated as canonical.
pub fn parse_address(text: &str) -> Result<Address, VerifyError> {
    let digits = strip_hex_prefix(text.trim());
    let bytes = hex::decode(digits)
        .map_err(|e| VerifyError::Recovery(format!("Invalid address hex: {}", e)))?;
    if bytes.len() != ADDRESS_LEN {
        return Err(VerifyError::Recovery(format!(
            "Invalid address length: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Recover the address that signed `message` with the personal-message scheme.
///
/// # Arguments
/// * `message` - The exact text that was presented to the wallet
/// * `signature` - Hex encoded `r || s || v` (65 bytes), `v` in {0, 1, 27, 28}
pub fn recover_address(message: &str, signature: &str) -> Result<Address, VerifyError> {
    let bytes = hex::decode(strip_hex_prefix(signature.trim()))
        .map_err(|e| VerifyError::Recovery(format!("Invalid signature hex: {}", e)))?;

    if bytes.len() != SIGNATURE_LEN {
        return Err(VerifyError::Recovery(format!(
            "Invalid signature length: expected {} bytes, got {}",
            SIGNATURE_LEN,
            bytes.len()
        )));
    }

    let v = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        v => v,
    };
    let recovery_id = RecoveryId::from_byte(v)
        .filter(|id| !id.is_x_reduced())
        .ok_or_else(|| VerifyError::Recovery(format!("Invalid recovery id: {}", bytes[64])))?;

    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| VerifyError::Recovery(format!("Invalid signature: {}", e)))?;

    // Flip parity when normalising a high-S signature
    let (signature, recovery_id) = match signature.normalize_s() {
        Some(normalized) => (
            normalized,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        ),
        None => (signature, recovery_id),
    };

    let prehash = eip191_hash_message(message);
    let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &signature, recovery_id)
        .map_err(|e| VerifyError::Recovery(format!("Recover failed: {}", e)))?;

    Ok(address_of(&key))
}

/// Check that `signature` over `message` was produced by `address`.
///
/// Returns the recovered address on success.
pub fn verify_signature(
    address: &str,
    message: &str,
    signature: &str,
) -> Result<Address, VerifyError> {
    let expected = parse_address(address)?;
    let recovered = recover_address(message, signature)?;

    if recovered != expected {
        return Err(VerifyError::Mismatch {
            expected,
            recovered,
        });
    }
    Ok(recovered)
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x42u8; 32]).unwrap()
    }

    fn sign(key: &SigningKey, message: &str) -> String {
        let prehash = eip191_hash_message(message);
        let (signature, recovery_id) = key.sign_prehash_recoverable(prehash.as_slice()).unwrap();
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn test_recover_known_key() {
        let key = test_key();
        let signature = sign(&key, "hello");
        let recovered = recover_address("hello", &signature).unwrap();
        assert_eq!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn test_recover_anvil_account_zero() {
        // Well-known development key and its address
        let key = SigningKey::from_slice(
            &hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap(),
        )
        .unwrap();
        let expected = parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap();
        assert_eq!(address_of(key.verifying_key()), expected);

        let signature = sign(&key, "Sign in");
        assert_eq!(recover_address("Sign in", &signature).unwrap(), expected);
    }

    #[test]
    fn test_recover_accepts_raw_recovery_id() {
        let key = test_key();
        let prehash = eip191_hash_message("raw v");
        let (signature, recovery_id) = key.sign_prehash_recoverable(prehash.as_slice()).unwrap();
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());

        let recovered = recover_address("raw v", &hex::encode(bytes)).unwrap();
        assert_eq!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn test_verify_wrong_message_mismatch() {
        let key = test_key();
        let address = address_of(key.verifying_key()).to_string();
        let signature = sign(&key, "original");

        let result = verify_signature(&address, "tampered", &signature);
        assert!(matches!(result, Err(VerifyError::Mismatch { .. })));
    }

    #[test]
    fn test_verify_failure_is_repeatable() {
        let key = test_key();
        let other = SigningKey::from_slice(&[0x07u8; 32]).unwrap();
        let address = address_of(other.verifying_key()).to_string();
        let signature = sign(&key, "msg");

        let first = verify_signature(&address, "msg", &signature);
        let second = verify_signature(&address, "msg", &signature);
        assert!(matches!(first, Err(VerifyError::Mismatch { .. })));
        assert_eq!(first, second);

        let first = verify_signature(&address, "msg", "0x1234");
        let second = verify_signature(&address, "msg", "0x1234");
        assert!(matches!(first, Err(VerifyError::Recovery(_))));
        assert_eq!(first, second);
    }

    #[test]
    fn test_verify_address_case_insensitive() {
        let key = test_key();
        let signature = sign(&key, "case");
        let address = address_of(key.verifying_key()).to_string();

        let lower = address.to_lowercase();
        let upper = format!("0x{}", address[2..].to_uppercase());

        assert!(verify_signature(&address, "case", &signature).is_ok());
        assert!(verify_signature(&lower, "case", &signature).is_ok());
        assert!(verify_signature(&upper, "case", &signature).is_ok());
        assert!(verify_signature(&lower[2..], "case", &signature).is_ok());
    }

    #[test]
    fn test_recover_invalid_inputs() {
        assert!(matches!(
            recover_address("m", "not-hex"),
            Err(VerifyError::Recovery(_))
        ));
        assert!(matches!(
            recover_address("m", &hex::encode([1u8; 64])),
            Err(VerifyError::Recovery(_))
        ));

        let mut bytes = [1u8; 65];
        bytes[64] = 5;
        assert!(matches!(
            recover_address("m", &hex::encode(bytes)),
            Err(VerifyError::Recovery(_))
        ));
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xZZ").is_err());
        assert!(parse_address("").is_err());
    }
}
