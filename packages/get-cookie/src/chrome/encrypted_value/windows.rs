//! Windows-specific functions to get the key used to encrypt cookies in
//! Chrome. On Windows, cookies are encrypted either:
//! - with the Windows DPAPI only,
//! - with a 256-bit key encrypted with DPAPI and stored in the Local State
//!   file, with the AES-256 algorithm and the GCM mode.

use base64ct::{Base64, Encoding};
use windows::Win32::{
    Foundation::{LocalFree, HLOCAL},
    Security::Cryptography::{CryptUnprotectData, CRYPT_INTEGER_BLOB},
};

use super::DecryptError;
use crate::chrome::LocalState;

/// Prefix for encrypted keys in the Local State file.
const DPAPI_PREFIX: &[u8] = b"DPAPI";

/// Decrypts a value encrypted with the Windows DPAPI.
///
/// # Safety
///
/// For the call to be safe, `encrypted_value` must be a valid buffer for the
/// entire duration of the call, which is guaranteed by the borrow checker.
#[allow(unsafe_code)]
pub(crate) fn decrypt_dpapi(encrypted_value: &mut [u8]) -> Result<Vec<u8>, DecryptError> {
    let data_in = CRYPT_INTEGER_BLOB {
        cbData: u32::try_from(encrypted_value.len())
            .map_err(|_| DecryptError::BadCiphertextLength)?,
        pbData: encrypted_value.as_mut_ptr(),
    };

    let mut data_out = CRYPT_INTEGER_BLOB::default();

    // SAFETY: `CryptUnprotectData` is safe to call with valid blob pointers.
    // `encrypted_value` outlives the call and `data_out.pbData` is checked
    // for null before a slice is created from it.
    unsafe {
        CryptUnprotectData(&data_in, None, None, None, None, 0, &mut data_out)
            .map_err(|_| DecryptError::CipherError)?;

        if data_out.pbData.is_null() {
            return Err(DecryptError::CipherError);
        }

        let data = std::slice::from_raw_parts(data_out.pbData, data_out.cbData as usize).to_vec();
        LocalFree(HLOCAL(data_out.pbData.cast()));

        Ok(data)
    }
}

/// Get the base64 `os_crypt.encrypted_key` value from `local_state`.
pub(crate) fn get_encrypted_key(local_state: &LocalState) -> Option<String> {
    local_state
        .values
        .get("os_crypt")
        .and_then(|obj| obj.as_object())
        .and_then(|os_crypt| os_crypt.get("encrypted_key"))
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
}

/// Decrypts the AES-256 key encrypted with DPAPI and encoded in Base64.
pub(crate) fn decrypt_dpapi_encrypted_key<S: AsRef<str>>(
    encrypted_key: S,
) -> Result<Vec<u8>, DecryptError> {
    let mut encrypted_key = Base64::decode_vec(encrypted_key.as_ref())
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;

    if !encrypted_key.starts_with(DPAPI_PREFIX) {
        return Err(DecryptError::KeyUnavailable(format!(
            "expected '{}' key prefix",
            String::from_utf8_lossy(DPAPI_PREFIX)
        )));
    }

    decrypt_dpapi(&mut encrypted_key[DPAPI_PREFIX.len()..])
}
