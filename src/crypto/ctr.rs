use std::io;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::{AUTH_CODE_LEN, AesStrength, BLOCK_LEN, DerivedKeys};
use crate::error::{ZipError, ZipResult};

/// AES key schedule for one of the three WinZip strengths.
pub enum CounterCipher {
    Aes128(Box<Aes128>),
    Aes192(Box<Aes192>),
    Aes256(Box<Aes256>),
}

impl CounterCipher {
    pub fn new(strength: AesStrength, key: &[u8]) -> ZipResult<Self> {
        let invalid =
            |_| ZipError::InvalidArgument(format!("AES key must be {} bytes", strength.key_len()));
        Ok(match strength {
            AesStrength::Aes128 => {
                CounterCipher::Aes128(Box::new(Aes128::new_from_slice(key).map_err(invalid)?))
            }
            AesStrength::Aes192 => {
                CounterCipher::Aes192(Box::new(Aes192::new_from_slice(key).map_err(invalid)?))
            }
            AesStrength::Aes256 => {
                CounterCipher::Aes256(Box::new(Aes256::new_from_slice(key).map_err(invalid)?))
            }
        })
    }

    /// Keystream for the block numbered `nonce`.
    ///
    /// The counter block is all zeroes except for `nonce`, little-endian, in
    /// its first four bytes. Same key and nonce, same output.
    pub fn block_keystream(&self, nonce: u32) -> [u8; BLOCK_LEN] {
        let mut counter = [0u8; BLOCK_LEN];
        counter[..4].copy_from_slice(&nonce.to_le_bytes());
        let mut block = aes::Block::from(counter);
        match self {
            CounterCipher::Aes128(cipher) => cipher.encrypt_block(&mut block),
            CounterCipher::Aes192(cipher) => cipher.encrypt_block(&mut block),
            CounterCipher::Aes256(cipher) => cipher.encrypt_block(&mut block),
        }
        let mut keystream = [0u8; BLOCK_LEN];
        keystream.copy_from_slice(&block);
        keystream
    }
}

/// Running state of one encryption or decryption pass.
///
/// The keystream is consumed continuously, so callers may hand over data in
/// any chunking. The MAC always covers ciphertext.
pub(crate) struct CtrSession {
    cipher: CounterCipher,
    mac: Hmac<Sha1>,
    next_nonce: Option<u32>,
    keystream: [u8; BLOCK_LEN],
    keystream_pos: usize,
    processed: u64,
    tag: Option<[u8; AUTH_CODE_LEN]>,
}

impl CtrSession {
    pub(crate) fn new(strength: AesStrength, keys: &DerivedKeys) -> ZipResult<Self> {
        let cipher = CounterCipher::new(strength, keys.cipher_key())?;
        let mac = <Hmac<Sha1> as Mac>::new_from_slice(keys.mac_key())
            .map_err(|_| ZipError::InvalidArgument("unusable MAC key".to_string()))?;
        Ok(Self {
            cipher,
            mac,
            next_nonce: Some(1),
            keystream: [0u8; BLOCK_LEN],
            keystream_pos: BLOCK_LEN,
            processed: 0,
            tag: None,
        })
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed
    }

    pub(crate) fn tag(&self) -> Option<[u8; AUTH_CODE_LEN]> {
        self.tag
    }

    /// Decrypt `data` in place.
    pub(crate) fn decrypt(&mut self, data: &mut [u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.mac.update(data);
        self.apply_keystream(data)?;
        self.processed += data.len() as u64;
        Ok(())
    }

    /// Encrypt `data` in place.
    pub(crate) fn encrypt(&mut self, data: &mut [u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.apply_keystream(data)?;
        self.mac.update(data);
        self.processed += data.len() as u64;
        Ok(())
    }

    /// Compute the authentication code. Later calls return the same value.
    pub(crate) fn finalize(&mut self) -> [u8; AUTH_CODE_LEN] {
        if let Some(tag) = self.tag {
            return tag;
        }
        if self.processed == 0 {
            self.mac.update(&[]);
        }
        let digest = self.mac.clone().finalize().into_bytes();
        let mut tag = [0u8; AUTH_CODE_LEN];
        tag.copy_from_slice(&digest[..AUTH_CODE_LEN]);
        self.tag = Some(tag);
        tag
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.tag.is_some() {
            return Err(io::Error::other("AES stream already finalized"));
        }
        Ok(())
    }

    fn apply_keystream(&mut self, data: &mut [u8]) -> io::Result<()> {
        for byte in data.iter_mut() {
            if self.keystream_pos == BLOCK_LEN {
                let nonce = self
                    .next_nonce
                    .ok_or_else(|| io::Error::other("AES counter exhausted"))?;
                self.keystream = self.cipher.block_keystream(nonce);
                self.next_nonce = nonce.checked_add(1);
                self.keystream_pos = 0;
            }
            *byte ^= self.keystream[self.keystream_pos];
            self.keystream_pos += 1;
        }
        Ok(())
    }
}
