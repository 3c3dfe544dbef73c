//! WinZip AES authenticated encryption.
//!
//! An AES-encrypted entry stores, in place of its compressed data:
//!
//! ```text
//! salt (8/12/16) | password verifier (2) | ciphertext | authentication code (10)
//! ```
//!
//! Keys come from PBKDF2-HMAC-SHA1 over the password and salt, the data is
//! AES in counter mode with a little-endian block counter starting at 1, and
//! the authentication code is the first 10 bytes of HMAC-SHA1 over the
//! ciphertext.

mod ctr;
mod keys;
mod stream;

pub use ctr::CounterCipher;
pub use keys::DerivedKeys;
pub use stream::WinZipAesStream;

/// Length of the password verification value.
pub const PASSWORD_VERIFIER_LEN: usize = 2;
/// Length of the truncated HMAC-SHA1 trailer.
pub const AUTH_CODE_LEN: usize = 10;
/// PBKDF2 iteration count fixed by the WinZip format.
pub const KEY_DERIVATION_ITERATIONS: u32 = 1000;
/// AES block size.
pub const BLOCK_LEN: usize = 16;

/// AES key size of an encrypted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    /// Decode the strength byte of the 0x9901 extra field.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        }
    }

    pub fn from_key_bits(bits: u32) -> Option<Self> {
        match bits {
            128 => Some(AesStrength::Aes128),
            192 => Some(AesStrength::Aes192),
            256 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn key_bits(self) -> u32 {
        self.key_len() as u32 * 8
    }

    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes stored ahead of the ciphertext: salt plus verifier.
    pub fn header_len(self) -> usize {
        self.salt_len() + PASSWORD_VERIFIER_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_sizes() {
        let sizes: Vec<_> = [1, 2, 3]
            .into_iter()
            .map(|c| AesStrength::from_code(c).unwrap())
            .map(|s| (s.key_bits(), s.salt_len(), s.header_len()))
            .collect();
        assert_eq!(sizes, vec![(128, 8, 10), (192, 12, 14), (256, 16, 18)]);
        assert_eq!(AesStrength::from_code(0), None);
        assert_eq!(AesStrength::from_key_bits(192), Some(AesStrength::Aes192));
    }
}
