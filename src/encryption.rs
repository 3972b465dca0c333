//! Self-contained AES-256-GCM helpers used to seal auth material at rest.
//! Key and nonce are generated fresh per call and carried alongside the
//! ciphertext (key‖nonce‖ciphertext, hex-encoded) so the sealed blob is
//! self-describing and needs no external key store.

use aes_gcm::{aead::Aead, Aes256Gcm, Key, KeyInit, Nonce};
use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::types::stringy::Stringy;
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

pub fn simple_encrypt(data: &[u8]) -> Result<Stringy, ErrorArrayItem> {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    let cipher = Aes256Gcm::new(&key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|err| ErrorArrayItem::new(Errors::InvalidBlockData, err.to_string()))?;

    let mut result = Vec::with_capacity(KEY_SIZE + NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&key);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(Stringy::from(hex::encode(result)))
}

pub fn simple_decrypt(encrypted_cipher_data: &[u8]) -> Result<Vec<u8>, ErrorArrayItem> {
    let encrypted_data = hex::decode(encrypted_cipher_data).map_err(ErrorArrayItem::from)?;

    if encrypted_data.len() <= KEY_SIZE + NONCE_SIZE {
        return Err(ErrorArrayItem::new(
            Errors::InvalidBlockData,
            "Encrypted data is too short".to_owned(),
        ));
    }

    let key = Key::<Aes256Gcm>::from_slice(&encrypted_data[..KEY_SIZE]);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(&encrypted_data[KEY_SIZE..KEY_SIZE + NONCE_SIZE]);
    let ciphertext = &encrypted_data[KEY_SIZE + NONCE_SIZE..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|err| ErrorArrayItem::new(Errors::InvalidBlockData, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let plaintext = b"operator nkey seed material";
        let sealed = simple_encrypt(plaintext).expect("encrypt should succeed");
        let opened = simple_decrypt(sealed.as_bytes()).expect("decrypt should succeed");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        assert!(simple_decrypt(b"deadbeef").is_err());
    }
}
