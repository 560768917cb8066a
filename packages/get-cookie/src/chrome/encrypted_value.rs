//! Decryption of cookie values encrypted by Chrome on Unix, macOS and
//! Windows platforms.

#[cfg(target_os = "linux")]
pub(crate) mod linux;
#[cfg(target_os = "macos")]
pub(crate) mod mac;
#[cfg(all(unix, not(target_os = "macos")))]
pub(crate) mod posix;
#[cfg(target_os = "windows")]
pub(crate) mod windows;

use thiserror::Error;

/// Length of the `v10`/`v11` header on an encrypted value.
pub(crate) const VERSION_PREFIX_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("decryption key has the wrong length")]
    BadKeyLength,

    #[error("ciphertext length is not a multiple of the cipher block size")]
    BadCiphertextLength,

    #[error("cipher failure")]
    CipherError,

    #[error("invalid padding length {0}")]
    Unpadding(u8),

    #[error("decrypted value is not UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),

    #[error("no decryption key available: {0}")]
    KeyUnavailable(String),
}

/// Salt for symmetric key derivation.
#[cfg(unix)]
const SYMMETRIC_SALT: &[u8] = b"saltysalt";

/// Length of the derived key used by Chrome for AES-128.
#[cfg(unix)]
const DERIVED_KEY_LENGTH: usize = 128;

/// Derives an AES-128 key from a safe-storage password with the same
/// parameters as Chrome (PBKDF2-HMAC-SHA1 over `saltysalt`). The round
/// count differs per platform: 1003 on macOS, 1 on Linux.
#[cfg(unix)]
pub(crate) fn derive_key_from_password<P: AsRef<[u8]>>(
    password: P,
    rounds: u32,
) -> Result<Vec<u8>, DecryptError> {
    use pbkdf2::{
        password_hash::{PasswordHasher, SaltString},
        Algorithm, Params, Pbkdf2,
    };

    let salt = SaltString::encode_b64(SYMMETRIC_SALT)
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;

    let key = Pbkdf2
        .hash_password_customized(
            password.as_ref(),
            Some(Algorithm::Pbkdf2Sha1.ident()),
            None,
            Params {
                rounds,
                output_length: DERIVED_KEY_LENGTH / 8,
            },
            &salt,
        )
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;

    Ok(key.hash.unwrap().as_bytes().to_vec())
}

/// Decrypts a cookie value encrypted by Chrome on Unix platforms
/// (AES-128-CBC, IV of sixteen ASCII spaces).
#[cfg(unix)]
pub(crate) fn decrypt_value<K: AsRef<[u8]>, V: AsRef<[u8]>>(
    key: K,
    encrypted_value: V,
) -> Result<String, DecryptError> {
    use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

    /// Size of initialization vector for AES 128-bit blocks.
    const IVBLOCK_SIZE_AES128: usize = 16;

    type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

    // Chrome's initialization vector.
    const IV: [u8; IVBLOCK_SIZE_AES128] = [b' '; IVBLOCK_SIZE_AES128];

    let encrypted_value = encrypted_value.as_ref();
    if encrypted_value.is_empty() || encrypted_value.len() % IVBLOCK_SIZE_AES128 != 0 {
        return Err(DecryptError::BadCiphertextLength);
    }

    let decryptor = Aes128CbcDec::new_from_slices(key.as_ref(), &IV)
        .map_err(|_| DecryptError::BadKeyLength)?;

    let mut buffer = encrypted_value.to_vec();
    let decrypted = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| DecryptError::CipherError)?;
    let value = strip_padding(decrypted)?;

    Ok(String::from_utf8(value.to_vec())?)
}

/// The last plaintext byte is the padding length and is stripped together
/// with that many bytes; 0 means no padding.
#[cfg(unix)]
fn strip_padding(plain: &[u8]) -> Result<&[u8], DecryptError> {
    match plain.last() {
        None | Some(0) => Ok(plain),
        Some(&pad) if (pad as usize) <= plain.len() => Ok(&plain[..plain.len() - pad as usize]),
        Some(&pad) => Err(DecryptError::Unpadding(pad)),
    }
}

/// Decrypts a cookie value encrypted by Chrome on Windows
/// (AES-256-GCM, 12-byte nonce, 16-byte tag appended to the ciphertext).
#[cfg(target_os = "windows")]
pub(crate) fn decrypt_value<K: AsRef<[u8]>, V: AsRef<[u8]>>(
    key: K,
    encrypted_value: V,
) -> Result<String, DecryptError> {
    use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};

    /// Size of the nonce for AES 256-bit.
    const AEAD_NONCE_SIZE: usize = 96 / 8;

    let cipher =
        Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| DecryptError::BadKeyLength)?;

    let nonce = encrypted_value
        .as_ref()
        .get(..AEAD_NONCE_SIZE)
        .ok_or(DecryptError::BadCiphertextLength)?;

    let ciphertext = encrypted_value
        .as_ref()
        .get(AEAD_NONCE_SIZE..)
        .ok_or(DecryptError::BadCiphertextLength)?;

    Ok(String::from_utf8(
        cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| DecryptError::CipherError)?,
    )?)
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;

    use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    /// Encrypt `plaintext` the way Chrome does: pad to the block size with
    /// the pad length in every filler byte, AES-128-CBC, IV of spaces.
    pub(crate) fn encrypt_value(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
        const BLOCK: usize = 16;
        let pad = BLOCK - plaintext.len() % BLOCK;
        let mut padded = plaintext.to_vec();
        padded.extend(std::iter::repeat(pad as u8).take(pad));

        let mut buffer = padded.clone();
        let encryptor = Aes128CbcEnc::new_from_slices(key, &[b' '; BLOCK]).unwrap();
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buffer, padded.len())
            .unwrap();
        buffer
    }

    #[test]
    fn roundtrips_a_padded_value() {
        let key = derive_key_from_password("peanuts", 1003).unwrap();
        assert_eq!(key.len(), 16);

        let ciphertext = encrypt_value(&key, b"hello");
        assert_eq!(decrypt_value(&key, &ciphertext).unwrap(), "hello");
    }

    #[test]
    fn roundtrips_a_block_aligned_value() {
        let key = derive_key_from_password("peanuts", 1003).unwrap();
        let ciphertext = encrypt_value(&key, b"0123456789abcdef");
        assert_eq!(decrypt_value(&key, &ciphertext).unwrap(), "0123456789abcdef");
    }

    #[test]
    fn rejects_misaligned_ciphertext() {
        let key = derive_key_from_password("peanuts", 1003).unwrap();
        assert!(matches!(
            decrypt_value(&key, b"short"),
            Err(DecryptError::BadCiphertextLength)
        ));
        assert!(matches!(
            decrypt_value(&key, b""),
            Err(DecryptError::BadCiphertextLength)
        ));
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(matches!(
            decrypt_value(b"tooshort", [0u8; 16]),
            Err(DecryptError::BadKeyLength)
        ));
    }

    #[test]
    fn pad_byte_zero_keeps_the_whole_block() {
        let plain = [b'x'; 15].iter().chain(&[0u8]).copied().collect::<Vec<_>>();
        assert_eq!(strip_padding(&plain).unwrap().len(), 16);
    }

    #[test]
    fn oversized_pad_byte_is_an_error() {
        let mut plain = vec![b'x'; 4];
        plain.push(42);
        assert!(matches!(strip_padding(&plain), Err(DecryptError::Unpadding(42))));
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key_from_password("peanuts", 1003).unwrap();
        let b = derive_key_from_password("peanuts", 1003).unwrap();
        assert_eq!(a, b);
        let c = derive_key_from_password("walnuts", 1003).unwrap();
        assert_ne!(a, c);
    }
}
