// signing.rs - Signing Codec (spec §4.1)
//
// Deterministic encoding of a state update, SHA3-256 digest, Ed25519
// sign/verify. Ledger addresses are the hex encoding of an Ed25519 public
// key, so `verify` needs no separate key lookup.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha3::{Digest, Sha3_256};

use crate::error::NodeError;

const STATE_TAG: &[u8] = b"STATE_UPDATE";
const STATE_END: &[u8] = b"END_STATE_UPDATE";
const CLOSE_TAG: &[u8] = b"CLOSE";
const CLOSE_END: &[u8] = b"END_CLOSE";

/// Canonical encoding of a payment-channel state update (spec §4.1).
pub fn encode_state(port_tag: u64, app_id: u64, alice_balance: u64, bob_balance: u64, timestamp: u64) -> Vec<u8> {
    encode_with_tags(STATE_TAG, STATE_END, port_tag, app_id, alice_balance, bob_balance, timestamp)
}

/// Cooperative-close encoding: same fields, a distinct tag, so a payment
/// signature can never be replayed as a close authorisation.
pub fn encode_close(port_tag: u64, app_id: u64, alice_balance: u64, bob_balance: u64, timestamp: u64) -> Vec<u8> {
    encode_with_tags(CLOSE_TAG, CLOSE_END, port_tag, app_id, alice_balance, bob_balance, timestamp)
}

fn encode_with_tags(
    tag: &[u8],
    end: &[u8],
    port_tag: u64,
    app_id: u64,
    alice_balance: u64,
    bob_balance: u64,
    timestamp: u64,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + end.len() + 4 * 8 + 4);
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&port_tag.to_be_bytes());
    buf.push(b',');
    buf.extend_from_slice(&app_id.to_be_bytes());
    buf.push(b',');
    buf.extend_from_slice(&alice_balance.to_be_bytes());
    buf.push(b',');
    buf.extend_from_slice(&bob_balance.to_be_bytes());
    buf.push(b',');
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(end);
    buf
}

fn digest(encoding: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(encoding);
    hasher.finalize().into()
}

/// Sign an encoded state update with the local signing key. Fails only if
/// the caller's key material is malformed, which is a precondition
/// violation rather than a recoverable runtime error (spec §4.1).
pub fn sign(signing_key: &SigningKey, encoding: &[u8]) -> Vec<u8> {
    let sig: Signature = signing_key.sign(&digest(encoding));
    sig.to_bytes().to_vec()
}

/// Verify a signature against an address (hex-encoded Ed25519 public key).
/// Never panics or returns an error; an unparseable address or signature is
/// simply "does not verify" (spec §4.1).
pub fn verify(encoding: &[u8], signature: &[u8], address_hex: &str) -> bool {
    let Some(verifying_key) = parse_address(address_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(&digest(encoding), &sig).is_ok()
}

/// Parse a ledger address (hex-encoded 32-byte Ed25519 public key).
pub fn parse_address(address_hex: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(address_hex).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&array).ok()
}

/// Hex-encode an Ed25519 public key into its ledger address form.
pub fn address_of(verifying_key: &VerifyingKey) -> String {
    hex::encode(verifying_key.to_bytes())
}

/// Generate a fresh random Ed25519 keypair for a new process-wide account.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Derive a deterministic Ed25519 keypair from a BIP-39 mnemonic seed
/// phrase, used when `SEED_PHRASE` is set (spec §3/§6).
pub fn keypair_from_mnemonic(phrase: &str) -> Result<SigningKey, NodeError> {
    let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
        .map_err(|e| NodeError::Fatal(format!("invalid seed phrase: {e}")))?;
    let seed = mnemonic.to_seed("");
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&seed[..32]);
    Ok(SigningKey::from_bytes(&key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let key = generate_keypair();
        let address = address_of(&key.verifying_key());
        let encoding = encode_state(4161, 7, 990_000, 10_000, 42);
        let signature = sign(&key, &encoding);
        assert!(verify(&encoding, &signature, &address));
    }

    #[test]
    fn signature_never_verifies_against_a_different_address() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let bob_address = address_of(&bob.verifying_key());
        let encoding = encode_state(4161, 7, 990_000, 10_000, 42);
        let signature = sign(&alice, &encoding);
        assert!(!verify(&encoding, &signature, &bob_address));
    }

    #[test]
    fn state_signature_never_verifies_as_a_close_signature() {
        let key = generate_keypair();
        let address = address_of(&key.verifying_key());
        let state_encoding = encode_state(4161, 7, 990_000, 10_000, 42);
        let close_encoding = encode_close(4161, 7, 990_000, 10_000, 42);
        let signature = sign(&key, &state_encoding);
        assert!(verify(&state_encoding, &signature, &address));
        assert!(!verify(&close_encoding, &signature, &address));
    }

    #[test]
    fn verify_never_panics_on_garbage_input() {
        assert!(!verify(b"anything", b"not a signature", "not-hex"));
    }
}
