//! macOS-specific functions to get the key used to encrypt cookies in
//! Chrome. The safe-storage password lives in the user keychain; the AES key
//! is derived from it with PBKDF2.

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::{
    credential::{MacCredential, MacKeychainDomain, PlatformCredential},
    Entry,
};
use once_cell::sync::Lazy;

use super::{derive_key_from_password, DecryptError};
use crate::chrome::ChromeVariant;

/// Number of iterations to hash the password to
/// obtain the key used to encrypt cookies.
const HASH_ROUNDS: u32 = 1003;

/// Passwords and derived keys are fetched at most once per process.
static KEY_CACHE: Lazy<Mutex<HashMap<ChromeVariant, Vec<u8>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Gets the password used to encrypt cookies in Chrome on macOS using the
/// keychain API.
pub(crate) fn get_v10_password(variant: ChromeVariant) -> Result<String, DecryptError> {
    let (service, account) = match variant {
        ChromeVariant::Chromium => ("Chromium Safe Storage", "Chromium"),
        ChromeVariant::Chrome => ("Chrome Safe Storage", "Chrome"),
        ChromeVariant::Edge => ("Microsoft Edge Safe Storage", "Microsoft Edge"),
    };

    let credential = PlatformCredential::Mac(MacCredential {
        service: String::from(service),
        account: String::from(account),
        domain: MacKeychainDomain::User,
    });

    let entry = Entry::new_with_credential(&credential)
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;

    entry
        .get_password()
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))
}

/// Gets the key used to encrypt cookies in Chrome on macOS.
pub(crate) fn get_v10_key(variant: ChromeVariant) -> Result<Vec<u8>, DecryptError> {
    let mut cache = KEY_CACHE.lock().expect("key cache lock poisoned");
    if let Some(key) = cache.get(&variant) {
        return Ok(key.clone());
    }

    let password = get_v10_password(variant)?;
    let key = derive_key_from_password(password, HASH_ROUNDS)?;
    cache.insert(variant, key.clone());
    Ok(key)
}
