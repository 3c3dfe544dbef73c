use sha1::Sha1;
use zeroize::Zeroizing;

use super::{AesStrength, KEY_DERIVATION_ITERATIONS, PASSWORD_VERIFIER_LEN};
use crate::error::{ZipError, ZipResult};

/// Key material derived from a password and salt.
///
/// Laid out as cipher key, MAC key, then the two-byte password verifier.
/// The buffer is wiped on drop.
pub struct DerivedKeys {
    material: Zeroizing<Vec<u8>>,
    key_len: usize,
}

impl DerivedKeys {
    pub fn derive(password: &[u8], salt: &[u8], strength: AesStrength) -> ZipResult<Self> {
        if salt.len() != strength.salt_len() {
            return Err(ZipError::InvalidArgument(format!(
                "{}-bit AES needs a {}-byte salt, got {}",
                strength.key_bits(),
                strength.salt_len(),
                salt.len()
            )));
        }

        let key_len = strength.key_len();
        let mut material = Zeroizing::new(vec![0u8; 2 * key_len + PASSWORD_VERIFIER_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, KEY_DERIVATION_ITERATIONS, &mut material[..]);
        Ok(Self { material, key_len })
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.material[..self.key_len]
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.material[self.key_len..2 * self.key_len]
    }

    pub fn verifier(&self) -> [u8; PASSWORD_VERIFIER_LEN] {
        let tail = &self.material[2 * self.key_len..];
        [tail[0], tail[1]]
    }
}
