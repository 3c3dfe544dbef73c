use std::io::{self, Read, Seek, SeekFrom, Write};

use constant_time_eq::constant_time_eq;
use rand::RngCore;

use super::ctr::CtrSession;
use super::{AUTH_CODE_LEN, AesStrength, BLOCK_LEN, DerivedKeys, PASSWORD_VERIFIER_LEN};
use crate::error::{ZipError, ZipResult, unsupported};

enum Mode {
    Decrypt {
        remaining: u64,
    },
    Encrypt {
        pending: [u8; BLOCK_LEN],
        pending_len: usize,
    },
}

/// Stream filter that encrypts or decrypts one WinZip AES entry.
///
/// For decryption the stream is created over the entry's stored bytes: the
/// salt and verifier are consumed up front, reads yield plaintext and stop
/// after the declared ciphertext length, and [`finish_decrypt`](Self::finish_decrypt) reads
/// and checks the trailing authentication code.
///
/// For encryption the salt and verifier are written on creation, writes are
/// encrypted a block at a time, and [`finish_encrypt`](Self::finish_encrypt)
/// flushes the last partial block and appends the authentication code.
///
/// The stream is one-way: reading an encrypting stream, writing a decrypting
/// one, and seeking either fail with [`io::ErrorKind::Unsupported`].
pub struct WinZipAesStream<S> {
    inner: S,
    session: CtrSession,
    strength: AesStrength,
    mode: Mode,
}

impl<S: Read> WinZipAesStream<S> {
    /// Start decrypting. `ciphertext_len` excludes the salt, verifier and
    /// authentication code.
    ///
    /// Fails with [`ZipError::BadPassword`] when the stored verifier does not
    /// match the one derived from `password`.
    pub fn open_decrypt(
        mut inner: S,
        password: &[u8],
        strength: AesStrength,
        ciphertext_len: u64,
    ) -> ZipResult<Self> {
        // Offsets are relative to the start of the encrypted entry data.
        let mut salt = vec![0u8; strength.salt_len()];
        inner
            .read_exact(&mut salt)
            .map_err(|e| ZipError::short_read(e, 0, "AES salt"))?;
        let mut stored_verifier = [0u8; PASSWORD_VERIFIER_LEN];
        inner
            .read_exact(&mut stored_verifier)
            .map_err(|e| ZipError::short_read(e, salt.len() as u64, "AES password verifier"))?;

        let keys = DerivedKeys::derive(password, &salt, strength)?;
        if !constant_time_eq(&stored_verifier, &keys.verifier()) {
            return Err(ZipError::BadPassword);
        }

        Ok(Self {
            inner,
            session: CtrSession::new(strength, &keys)?,
            strength,
            mode: Mode::Decrypt {
                remaining: ciphertext_len,
            },
        })
    }
}

impl<S: Write> WinZipAesStream<S> {
    /// Start encrypting with a random salt.
    pub fn open_encrypt(inner: S, password: &[u8], strength: AesStrength) -> ZipResult<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::rng().fill_bytes(&mut salt);
        Self::open_encrypt_with_salt(inner, password, strength, &salt)
    }

    /// Start encrypting with a caller-chosen salt. A salt must never be
    /// reused with the same password.
    pub fn open_encrypt_with_salt(
        mut inner: S,
        password: &[u8],
        strength: AesStrength,
        salt: &[u8],
    ) -> ZipResult<Self> {
        let keys = DerivedKeys::derive(password, salt, strength)?;
        inner.write_all(salt)?;
        inner.write_all(&keys.verifier())?;

        Ok(Self {
            inner,
            session: CtrSession::new(strength, &keys)?,
            strength,
            mode: Mode::Encrypt {
                pending: [0u8; BLOCK_LEN],
                pending_len: 0,
            },
        })
    }
}

impl<S> WinZipAesStream<S> {
    pub fn strength(&self) -> AesStrength {
        self.strength
    }

    /// Plaintext bytes produced (decrypting) or accepted (encrypting) so far.
    pub fn bytes_transferred(&self) -> u64 {
        match &self.mode {
            Mode::Decrypt { .. } => self.session.processed(),
            Mode::Encrypt { pending_len, .. } => self.session.processed() + *pending_len as u64,
        }
    }

    /// The authentication code, once the stream has been finalized.
    pub fn authentication_tag(&self) -> Option<[u8; AUTH_CODE_LEN]> {
        self.session.tag()
    }

    /// Compare `stored` against the authentication code of the data seen so far.
    ///
    /// Finalizes the stream; no further data can pass through it.
    pub fn verify_tag(&mut self, stored: &[u8]) -> ZipResult<()> {
        let computed = self.session.finalize();
        if stored.len() != AUTH_CODE_LEN || !constant_time_eq(stored, &computed) {
            return Err(ZipError::Integrity);
        }
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Read> WinZipAesStream<S> {
    /// Read any ciphertext left unread, then the stored authentication code,
    /// and verify it. Returns the inner stream and the code.
    pub fn finish_decrypt(mut self) -> ZipResult<(S, [u8; AUTH_CODE_LEN])> {
        if !matches!(self.mode, Mode::Decrypt { .. }) {
            return Err(ZipError::Unsupported("finish_decrypt on an encrypting AES stream"));
        }
        io::copy(&mut self, &mut io::sink())?;

        let mut stored = [0u8; AUTH_CODE_LEN];
        self.inner.read_exact(&mut stored)?;
        self.verify_tag(&stored)?;
        Ok((self.inner, stored))
    }
}

impl<S: Write> WinZipAesStream<S> {
    /// Encrypt the buffered partial block and append the authentication code.
    /// Returns the inner stream and the code.
    pub fn finish_encrypt(mut self) -> ZipResult<(S, [u8; AUTH_CODE_LEN])> {
        let Mode::Encrypt {
            mut pending,
            pending_len,
        } = self.mode
        else {
            return Err(ZipError::Unsupported("finish_encrypt on a decrypting AES stream"));
        };

        if pending_len > 0 {
            self.session.encrypt(&mut pending[..pending_len])?;
            self.inner.write_all(&pending[..pending_len])?;
        }
        let tag = self.session.finalize();
        self.inner.write_all(&tag)?;
        self.inner.flush()?;
        Ok((self.inner, tag))
    }
}

impl<S: Read> Read for WinZipAesStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Mode::Decrypt { remaining } = &mut self.mode else {
            return Err(unsupported("read from an encrypting AES stream"));
        };
        if *remaining == 0 || buf.is_empty() {
            if *remaining == 0 {
                self.session.finalize();
            }
            return Ok(0);
        }

        let want = (*remaining).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("AES ciphertext ends {remaining} bytes early"),
            ));
        }

        self.session.decrypt(&mut buf[..n])?;
        *remaining -= n as u64;
        if *remaining == 0 {
            self.session.finalize();
        }
        Ok(n)
    }
}

impl<S: Write> Write for WinZipAesStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Mode::Encrypt {
            pending,
            pending_len,
        } = &mut self.mode
        else {
            return Err(unsupported("write to a decrypting AES stream"));
        };

        let mut input = buf;
        while !input.is_empty() {
            let take = (BLOCK_LEN - *pending_len).min(input.len());
            pending[*pending_len..*pending_len + take].copy_from_slice(&input[..take]);
            *pending_len += take;
            input = &input[take..];

            if *pending_len == BLOCK_LEN {
                self.session.encrypt(&mut pending[..])?;
                self.inner.write_all(&pending[..])?;
                *pending_len = 0;
            }
        }
        Ok(buf.len())
    }

    /// Flushes the inner stream. A partial block stays buffered until `finish_encrypt`.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S> Seek for WinZipAesStream<S> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seek on an AES stream"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SALT: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

    fn encrypt(plain: &[u8], strength: AesStrength) -> Vec<u8> {
        let salt: Vec<u8> = (0..strength.salt_len() as u8).collect();
        let mut stream =
            WinZipAesStream::open_encrypt_with_salt(Vec::new(), b"password", strength, &salt)
                .unwrap();
        stream.write_all(plain).unwrap();
        stream.finish_encrypt().unwrap().0
    }

    fn decrypt(envelope: &[u8], password: &[u8], strength: AesStrength) -> ZipResult<Vec<u8>> {
        let ciphertext_len = (envelope.len() - strength.header_len() - AUTH_CODE_LEN) as u64;
        let mut stream = WinZipAesStream::open_decrypt(
            Cursor::new(envelope),
            password,
            strength,
            ciphertext_len,
        )?;
        let mut plain = Vec::new();
        stream.read_to_end(&mut plain)?;
        stream.finish_decrypt()?;
        Ok(plain)
    }

    #[test]
    fn envelope_matches_reference() {
        let envelope = encrypt(b"hello, winzip aes!", AesStrength::Aes128);
        let mut expected = SALT.to_vec();
        expected.extend_from_slice(&[0xb5, 0x1c]);
        expected.extend_from_slice(&[
            0x8f, 0x4b, 0xe4, 0xcf, 0xc3, 0x79, 0x38, 0x5e, 0xe0, 0x8b, 0x47, 0x97, 0x8d, 0xb2,
            0x0e, 0x59, 0xd2, 0xef,
        ]);
        expected.extend_from_slice(&[0x1f, 0xfa, 0x0d, 0x2e, 0x2d, 0xa7, 0x14, 0x3e, 0xa5, 0x22]);
        assert_eq!(envelope, expected);
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let envelope = encrypt(b"abc", AesStrength::Aes128);
        for (cut, at) in [(5, 0), (9, 8)] {
            let result = WinZipAesStream::open_decrypt(
                Cursor::new(&envelope[..cut]),
                b"password",
                AesStrength::Aes128,
                3,
            );
            match result {
                Err(ZipError::Format { offset, .. }) => assert_eq!(offset, at),
                Err(other) => panic!("unexpected error: {other:?}"),
                Ok(_) => panic!("{cut} bytes opened as an envelope"),
            }
        }
    }

    #[test]
    fn aes256_reference() {
        let envelope = encrypt(b"hello, winzip aes!", AesStrength::Aes256);
        assert_eq!(&envelope[16..18], &[0x25, 0x6b]);
        assert_eq!(
            &envelope[envelope.len() - AUTH_CODE_LEN..],
            &[0x11, 0xfc, 0xa8, 0xc8, 0x17, 0x7b, 0xe9, 0xa2, 0xf4, 0xd6]
        );
    }

    #[test]
    fn round_trips_across_block_boundaries() {
        for strength in [AesStrength::Aes128, AesStrength::Aes192, AesStrength::Aes256] {
            for len in [0usize, 1, 15, 16, 17, 1000] {
                let plain: Vec<u8> = (0..len).map(|i| (i * 31) as u8).collect();
                let envelope = encrypt(&plain, strength);
                assert_eq!(envelope.len(), strength.header_len() + len + AUTH_CODE_LEN);
                assert_eq!(decrypt(&envelope, b"password", strength).unwrap(), plain);
            }
        }
    }

    #[test]
    fn empty_entry_tag() {
        let envelope = encrypt(b"", AesStrength::Aes128);
        assert_eq!(
            &envelope[10..],
            &[0xdf, 0xd9, 0x30, 0x9e, 0xfa, 0x0e, 0x42, 0x46, 0xb3, 0xe6]
        );
    }

    #[test]
    fn wrong_password_is_caught_before_data() {
        let envelope = encrypt(b"secret", AesStrength::Aes256);
        assert!(matches!(
            decrypt(&envelope, b"not the password", AesStrength::Aes256),
            Err(ZipError::BadPassword)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let mut envelope = encrypt(b"some payload worth protecting", AesStrength::Aes128);
        envelope[12] ^= 0x01;
        assert!(matches!(
            decrypt(&envelope, b"password", AesStrength::Aes128),
            Err(ZipError::Integrity)
        ));
    }

    #[test]
    fn tampered_tag_fails_authentication() {
        let mut envelope = encrypt(b"payload", AesStrength::Aes128);
        let last = envelope.len() - 1;
        envelope[last] ^= 0x80;
        assert!(matches!(
            decrypt(&envelope, b"password", AesStrength::Aes128),
            Err(ZipError::Integrity)
        ));
    }

    #[test]
    fn verify_tag_checks_length() {
        let envelope = encrypt(b"abc", AesStrength::Aes128);
        let mut stream = WinZipAesStream::open_decrypt(
            Cursor::new(&envelope),
            b"password",
            AesStrength::Aes128,
            3,
        )
        .unwrap();
        let mut plain = Vec::new();
        stream.read_to_end(&mut plain).unwrap();
        let tag = stream.authentication_tag().unwrap();
        assert!(matches!(stream.verify_tag(&tag[..8]), Err(ZipError::Integrity)));
        assert!(stream.verify_tag(&tag).is_ok());
    }

    #[test]
    fn one_way_and_unseekable() {
        let mut writer =
            WinZipAesStream::open_encrypt(Cursor::new(Vec::new()), b"pw", AesStrength::Aes128)
                .unwrap();
        assert_eq!(writer.get_ref().get_ref().len(), 10);
        assert_eq!(
            writer.read(&mut [0u8; 4]).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert_eq!(
            writer.seek(SeekFrom::Start(0)).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert_eq!(
            writer.stream_position().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );

        let envelope = encrypt(b"xyz", AesStrength::Aes128);
        let mut reader = WinZipAesStream::open_decrypt(
            Cursor::new(envelope),
            b"password",
            AesStrength::Aes128,
            3,
        )
        .unwrap();
        assert_eq!(
            reader.write(b"x").unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        let mut plain = Vec::new();
        reader.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"xyz");
    }

    #[test]
    fn counts_plaintext() {
        let mut writer =
            WinZipAesStream::open_encrypt(Vec::new(), b"pw", AesStrength::Aes192).unwrap();
        writer.write_all(&[0u8; 20]).unwrap();
        assert_eq!(writer.bytes_transferred(), 20);
        assert_eq!(writer.get_ref().len(), 14 + 16);
    }
}
