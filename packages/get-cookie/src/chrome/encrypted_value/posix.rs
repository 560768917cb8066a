//! Unix-specific functions to get the key used to encrypt cookies in Chrome.
//! On Unix systems, cookies are encrypted using the AES 128-bit algorithm and
//! CBC mode, and the password from which the key is derived is "peanuts".

/// Default password used by Chrome on Linux when no keyring is available or
/// on other Unix platforms except macOS.
pub const CHROME_V10_PASSWORD: &str = "peanuts";

/// Default key used by Chrome on Linux when no keyring is available.
/// This is the result of deriving the key from the default ("peanuts")
/// password. To avoid having to derive the key every time, we hardcode it.
pub const CHROME_V10_KEY: [u8; 16] = [
    253, 98, 31, 229, 162, 180, 2, 83, 157, 250, 20, 124, 169, 39, 39, 120,
];
