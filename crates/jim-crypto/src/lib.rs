//! Password hashing and challenge/response primitives for the JIM
//! authentication handshake: PBKDF2-SHA512 password hashes, salted with the
//! lowercased account name, and an HMAC-MD5 proof over a server-chosen
//! nonce. MD5 is weak by modern standards but is part of the observable
//! wire protocol and must be preserved bit-exact.

use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;

pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const PASSWORD_HASH_LEN: usize = 64; // SHA-512 output size
pub const NONCE_LEN: usize = 64;

/// Derives the password hash stored for an account: raw bytes of
/// PBKDF2-SHA512(password, salt = lowercase(account_name), 10 000 rounds).
pub fn hash_password(account_name: &str, password: &str) -> Vec<u8> {
    let salt = account_name.to_lowercase();
    let mut out = [0u8; PASSWORD_HASH_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut out);
    out.to_vec()
}

/// Generates a fresh 64-byte random nonce for one handshake attempt.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Hex-encodes a nonce for transmission as the server's 511 challenge
/// `DATA` field.
pub fn encode_nonce_hex(nonce: &[u8]) -> String {
    hex::encode(nonce)
}

pub fn decode_nonce_hex(hex_nonce: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(hex_nonce)
}

type HmacMd5 = Hmac<Md5>;

/// Computes HMAC-MD5(key = password hash bytes, msg = nonce bytes), the
/// proof both sides compute independently during the handshake.
pub fn hmac_md5_proof(password_hash: &[u8], nonce: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(password_hash).expect("HMAC accepts keys of any length");
    mac.update(nonce);
    mac.finalize().into_bytes().into()
}

/// Base64-encodes a proof digest for the client's 511 response `DATA` field.
pub fn encode_proof_base64(digest: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(digest)
}

pub fn decode_proof_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

/// Constant-time comparison of the server-computed and client-supplied
/// proof digests. Must not leak timing information proportional to the
/// matching prefix length.
pub fn proofs_match(expected: &[u8], received: &[u8]) -> bool {
    if expected.len() != received.len() {
        return false;
    }
    expected.ct_eq(received).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_password_is_deterministic_and_salt_is_case_insensitive() {
        let a = hash_password("Alice", "hunter2");
        let b = hash_password("alice", "hunter2");
        let c = hash_password("ALICE", "hunter2");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.len(), PASSWORD_HASH_LEN);
    }

    #[test]
    fn different_passwords_hash_differently() {
        let a = hash_password("alice", "hunter2");
        let b = hash_password("alice", "hunter3");
        assert_ne!(a, b);
    }

    #[test]
    fn handshake_round_trip_succeeds_for_correct_password_and_fails_otherwise() {
        let hash = hash_password("alice", "p1");
        let nonce = generate_nonce();
        let server_proof = hmac_md5_proof(&hash, &nonce);

        let client_hash_correct = hash_password("alice", "p1");
        let client_proof_correct = hmac_md5_proof(&client_hash_correct, &nonce);
        assert!(proofs_match(&server_proof, &client_proof_correct));

        let client_hash_wrong = hash_password("alice", "p2");
        let client_proof_wrong = hmac_md5_proof(&client_hash_wrong, &nonce);
        assert!(!proofs_match(&server_proof, &client_proof_wrong));
    }

    #[test]
    fn nonce_hex_round_trips() {
        let nonce = generate_nonce();
        let hexed = encode_nonce_hex(&nonce);
        assert_eq!(decode_nonce_hex(&hexed).unwrap(), nonce.to_vec());
    }

    #[test]
    fn proof_base64_round_trips() {
        let digest = [1u8, 2, 3, 4];
        let encoded = encode_proof_base64(&digest);
        assert_eq!(decode_proof_base64(&encoded).unwrap(), digest.to_vec());
    }

    #[test]
    fn proofs_match_rejects_mismatched_lengths() {
        assert!(!proofs_match(&[1, 2, 3], &[1, 2]));
    }
}
