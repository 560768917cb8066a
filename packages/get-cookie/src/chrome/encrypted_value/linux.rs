//! Linux-specific functions to get the key used to encrypt cookies in
//! Chrome. On Linux, cookies are encrypted using the AES 128-bit algorithm
//! and CBC mode, and the password from which the key is derived is either:
//! - stored on the keyring, if there is an available one,
//! - or "peanuts" (the default used by Chrome when no keyring exists).

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::{
    credential::{LinuxCredential, PlatformCredential},
    Entry,
};
use once_cell::sync::Lazy;

use super::{derive_key_from_password, DecryptError};
use crate::chrome::ChromeVariant;

/// Number of iterations to hash the password to
/// obtain the key used to encrypt cookies.
const HASH_ROUNDS: u32 = 1;

static KEY_CACHE: Lazy<Mutex<HashMap<ChromeVariant, Vec<u8>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Gets the password used to encrypt cookies in Chrome on Linux using the
/// secret service API.
fn get_v11_password(variant: ChromeVariant) -> Result<String, DecryptError> {
    let variant = match variant {
        ChromeVariant::Chromium => "chromium",
        ChromeVariant::Chrome => "chrome",
        ChromeVariant::Edge => "edge",
    };
    let credential = PlatformCredential::Linux(LinuxCredential {
        collection: String::from("default"),
        attributes: HashMap::from([(String::from("application"), String::from(variant))]),
        label: String::new(),
    });
    let entry = Entry::new_with_credential(&credential)
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;

    entry
        .get_password()
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))
}

/// Gets the key used to encrypt cookies in Chrome on Linux by deriving it
/// from the password retrieved with the secret service API.
pub(crate) fn get_v11_key(variant: ChromeVariant) -> Result<Vec<u8>, DecryptError> {
    let mut cache = KEY_CACHE.lock().expect("key cache lock poisoned");
    if let Some(key) = cache.get(&variant) {
        return Ok(key.clone());
    }

    let password = get_v11_password(variant)?;
    let key = derive_key_from_password(password, HASH_ROUNDS)?;
    cache.insert(variant, key.clone());
    Ok(key)
}
