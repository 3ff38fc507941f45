//! Streaming AES-256-GCM for archive files.
//!
//! Layout: a 24-byte header (`STRX`, format version, 12-byte salt, 7-byte
//! nonce prefix) followed by chunks of at most [`CHUNK_SIZE`] plaintext bytes,
//! each framed as `[last u8][len u32 LE][ciphertext]`. The nonce of a chunk is
//! `prefix ‖ counter (u32 BE) ‖ last`, so chunks cannot be reordered, and a
//! stream that ends without a `last` chunk is reported as truncated.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

const MAGIC: &[u8; 4] = b"STRX";
const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 12;
const PREFIX_LEN: usize = 7;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + PREFIX_LEN;
const TAG_LEN: usize = 16;

/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn cipher(passphrase: &str, salt: &[u8]) -> io::Result<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(passphrase.as_bytes());
    let key = hasher.finalize();
    Aes256Gcm::new_from_slice(&key).map_err(|_| invalid_data("invalid key length"))
}

fn nonce(prefix: &[u8; PREFIX_LEN], counter: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..PREFIX_LEN].copy_from_slice(prefix);
    nonce[PREFIX_LEN..PREFIX_LEN + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Encrypting writer. Call [`EncryptWriter::finish`] to write the last chunk.
pub struct EncryptWriter<W: Write> {
    inner: W,
    cipher: Aes256Gcm,
    prefix: [u8; PREFIX_LEN],
    counter: u32,
    buffer: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(mut inner: W, passphrase: &str) -> io::Result<Self> {
        let salt = Aes256Gcm::generate_nonce(&mut OsRng);
        let random = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&random[..PREFIX_LEN]);

        inner.write_all(MAGIC)?;
        inner.write_all(&[FORMAT_VERSION])?;
        inner.write_all(&salt)?;
        inner.write_all(&prefix)?;

        Ok(Self {
            inner,
            cipher: cipher(passphrase, &salt)?,
            prefix,
            counter: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    fn seal(&mut self, last: bool) -> io::Result<()> {
        let nonce = nonce(&self.prefix, self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buffer.as_slice())
            .map_err(|_| invalid_data("encryption failed"))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| invalid_data("encrypted stream too long"))?;

        self.inner.write_all(&[u8::from(last)])?;
        self.inner
            .write_all(&(ciphertext.len() as u32).to_le_bytes())?;
        self.inner.write_all(&ciphertext)?;
        self.buffer.clear();
        Ok(())
    }

    /// Seal the remaining bytes as the last chunk and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.seal(true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == CHUNK_SIZE {
            self.seal(false)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader matching [`EncryptWriter`].
pub struct DecryptReader<R: Read> {
    inner: R,
    cipher: Aes256Gcm,
    prefix: [u8; PREFIX_LEN],
    counter: u32,
    plain: Vec<u8>,
    position: usize,
    done: bool,
}

impl<R: Read> DecryptReader<R> {
    /// Read and check the header.
    pub fn new(mut inner: R, passphrase: &str) -> io::Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid_data("file is not an encrypted archive")
            } else {
                e
            }
        })?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(invalid_data("file is not an encrypted archive"));
        }
        if header[MAGIC.len()] != FORMAT_VERSION {
            return Err(invalid_data("unsupported encryption format version"));
        }

        let salt = &header[MAGIC.len() + 1..MAGIC.len() + 1 + SALT_LEN];
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&header[HEADER_LEN - PREFIX_LEN..]);

        Ok(Self {
            inner,
            cipher: cipher(passphrase, salt)?,
            prefix,
            counter: 0,
            plain: Vec::new(),
            position: 0,
            done: false,
        })
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let mut frame = [0u8; 5];
        self.inner.read_exact(&mut frame).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::UnexpectedEof, "encrypted stream is truncated")
            } else {
                e
            }
        })?;
        let last = match frame[0] {
            0 => false,
            1 => true,
            _ => return Err(invalid_data("corrupted encrypted chunk")),
        };
        let len = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if len < TAG_LEN || len > CHUNK_SIZE + TAG_LEN {
            return Err(invalid_data("corrupted encrypted chunk"));
        }

        let mut ciphertext = vec![0u8; len];
        self.inner.read_exact(&mut ciphertext)?;

        let nonce = nonce(&self.prefix, self.counter, last);
        self.plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| invalid_data("decryption failed: wrong key or corrupted file"))?;
        self.position = 0;
        self.counter = self.counter.wrapping_add(1);
        self.done = last;
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position == self.plain.len() {
            if self.done {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        let n = buf.len().min(self.plain.len() - self.position);
        buf[..n].copy_from_slice(&self.plain[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt(data: &[u8], key: &str) -> Vec<u8> {
        let mut writer = EncryptWriter::new(Vec::new(), key).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn decrypt(data: &[u8], key: &str) -> io::Result<Vec<u8>> {
        let mut reader = DecryptReader::new(data, key)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_multi_chunk_stream() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let sealed = encrypt(&data, "secret");
        assert_eq!(&sealed[..4], MAGIC);
        assert_eq!(decrypt(&sealed, "secret").unwrap(), data);
    }

    #[test]
    fn test_empty_stream_has_last_chunk() {
        let sealed = encrypt(b"", "secret");
        assert!(decrypt(&sealed, "secret").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = encrypt(b"hello", "secret");
        let err = decrypt(&sealed, "guess").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncation_detected() {
        let data = vec![7u8; CHUNK_SIZE + 10];
        let sealed = encrypt(&data, "secret");
        let first_chunk_end = HEADER_LEN + 5 + CHUNK_SIZE + TAG_LEN;
        let err = decrypt(&sealed[..first_chunk_end], "secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_plain_file_rejected() {
        let err = decrypt(b"ustar archive bytes here", "secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
