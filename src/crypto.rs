//! Encryption support for ZIP entries
//!
//! Two schemes are implemented:
//!
//! - **ZipCrypto**: the legacy PKWARE stream cipher. Known-plaintext weak,
//!   but it is what the format standardizes and what most tools emit for
//!   password-protected archives.
//! - **WZ_AES**: WinZip-compatible AES encryption (AE-1/AE-2).
//!   PBKDF2-HMAC-SHA1 key derivation (1000 iterations), AES-CTR with a
//!   little-endian counter starting at 1, and an HMAC-SHA1 authentication
//!   code over the ciphertext truncated to 10 bytes.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128LE;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::error::{Result, ZipError};

type HmacSha1 = Hmac<Sha1>;

/// Length of the ZipCrypto encryption header
pub(crate) const ZIPCRYPTO_HEADER_LEN: usize = 12;

/// Length of the truncated HMAC-SHA1 tag trailing WZ_AES file data
pub(crate) const WZ_AES_HMAC_LEN: usize = 10;

/// PBKDF2 iteration count fixed by the WinZip AES specification
const WZ_AES_PBKDF2_ROUNDS: u32 = 1000;

/// WZ_AES vendor version: AE-1 keeps the CRC, AE-2 zeroes it
pub(crate) const WZ_AES_V1: u16 = 0x0001;
pub(crate) const WZ_AES_V2: u16 = 0x0002;
pub(crate) const WZ_AES_VENDOR_ID: [u8; 2] = *b"AE";

/// Encryption scheme selected for writing entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// Legacy PKWARE stream cipher
    ZipCrypto,
    /// WinZip AES (AE-1/AE-2) with the given key strength
    WzAes(AesStrength),
}

/// AES key strength for WZ_AES entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    /// Strength code as stored in the AES extra field
    pub fn code(self) -> u8 {
        match self {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    /// Salt size in bytes
    pub fn salt_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 8,
            AesStrength::Aes192 => 12,
            AesStrength::Aes256 => 16,
        }
    }

    /// Key size in bytes
    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    /// Encryption header length: salt plus the 2-byte password check
    pub(crate) fn encryption_header_len(self) -> usize {
        self.salt_len() + 2
    }
}

fn random_bytes(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf)
        .map_err(|e| ZipError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

// ---------------------------------------------------------------------------
// ZipCrypto

const fn gen_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = gen_crc_table();

fn crc32_step(key: u32, ch: u8) -> u32 {
    (key >> 8) ^ CRC32_TABLE[((key ^ ch as u32) & 0xFF) as usize]
}

/// The three rolling ZipCrypto keys
///
/// One instance is a complete cipher state: construction mixes in the
/// password, then each processed byte advances the keys.
#[derive(Debug)]
pub(crate) struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    pub(crate) fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x1234_5678,
            key1: 0x2345_6789,
            key2: 0x3456_7890,
        };
        for &c in password {
            keys.update(c);
        }
        keys
    }

    fn update(&mut self, c: u8) {
        self.key0 = crc32_step(self.key0, c);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_step(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        // Only bits 8..16 of the product matter, so 16-bit math suffices
        let k = (self.key2 | 2) as u16;
        (k.wrapping_mul(k ^ 1) >> 8) as u8
    }

    pub(crate) fn decrypt(&mut self, buf: &mut [u8]) {
        for c in buf.iter_mut() {
            *c ^= self.stream_byte();
            self.update(*c);
        }
    }

    pub(crate) fn encrypt(&mut self, buf: &mut [u8]) {
        for c in buf.iter_mut() {
            let plain = *c;
            *c ^= self.stream_byte();
            self.update(plain);
        }
    }
}

/// Decrypt and verify a ZipCrypto encryption header.
///
/// The first 11 bytes are random; the 12th must match `check_byte` (the
/// high byte of the CRC, or of the DOS time when a data descriptor is in
/// use). Returns the cipher state positioned after the header.
pub(crate) fn zipcrypto_decrypter(
    password: &[u8],
    header: &[u8; ZIPCRYPTO_HEADER_LEN],
    check_byte: u8,
    name: &str,
) -> Result<ZipCryptoKeys> {
    let mut keys = ZipCryptoKeys::new(password);
    let mut plain = *header;
    keys.decrypt(&mut plain);
    if plain[11] != check_byte {
        return Err(ZipError::BadPassword(name.to_string()));
    }
    Ok(keys)
}

/// Build an encrypted ZipCrypto header: 11 random bytes plus the check
/// byte, run through the freshly keyed cipher.
pub(crate) fn zipcrypto_encrypter(
    password: &[u8],
    check_byte: u8,
) -> Result<(ZipCryptoKeys, [u8; ZIPCRYPTO_HEADER_LEN])> {
    let mut keys = ZipCryptoKeys::new(password);
    let mut header = [0u8; ZIPCRYPTO_HEADER_LEN];
    random_bytes(&mut header[..11])?;
    header[11] = check_byte;
    keys.encrypt(&mut header);
    Ok((keys, header))
}

// ---------------------------------------------------------------------------
// WZ_AES

enum AesCtrCipher {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl std::fmt::Debug for AesCtrCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            AesCtrCipher::Aes128(_) => "Aes128",
            AesCtrCipher::Aes192(_) => "Aes192",
            AesCtrCipher::Aes256(_) => "Aes256",
        };
        f.debug_tuple("AesCtrCipher").field(&variant).finish()
    }
}

impl AesCtrCipher {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        // WinZip AES: 128-bit little-endian counter, starting at 1
        let iv = 1u128.to_le_bytes();
        let bad_key = |_| ZipError::InvalidArgument("bad AES key length".to_string());
        Ok(match strength {
            AesStrength::Aes128 => {
                AesCtrCipher::Aes128(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
            AesStrength::Aes192 => {
                AesCtrCipher::Aes192(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
            AesStrength::Aes256 => {
                AesCtrCipher::Aes256(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
        })
    }

    fn apply_keystream(&mut self, data: &mut [u8]) {
        match self {
            AesCtrCipher::Aes128(c) => c.apply_keystream(data),
            AesCtrCipher::Aes192(c) => c.apply_keystream(data),
            AesCtrCipher::Aes256(c) => c.apply_keystream(data),
        }
    }
}

struct DerivedKeys {
    cipher_key: Vec<u8>,
    mac_key: Vec<u8>,
    verify: [u8; 2],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> DerivedKeys {
    let key_len = strength.key_len();
    let mut material = vec![0u8; 2 * key_len + 2];
    pbkdf2_hmac::<Sha1>(password, salt, WZ_AES_PBKDF2_ROUNDS, &mut material);
    DerivedKeys {
        cipher_key: material[..key_len].to_vec(),
        mac_key: material[key_len..2 * key_len].to_vec(),
        verify: [material[2 * key_len], material[2 * key_len + 1]],
    }
}

fn new_hmac(mac_key: &[u8]) -> Result<HmacSha1> {
    HmacSha1::new_from_slice(mac_key)
        .map_err(|_| ZipError::InvalidArgument("bad HMAC key length".to_string()))
}

/// WZ_AES decryption context for one entry
#[derive(Debug)]
pub(crate) struct WzAesDecrypter {
    cipher: AesCtrCipher,
    hmac: HmacSha1,
}

impl WzAesDecrypter {
    /// `header` is the encryption header pulled from the stream:
    /// `salt_len` salt bytes followed by the 2-byte password check.
    pub(crate) fn new(
        password: &[u8],
        strength: AesStrength,
        header: &[u8],
        name: &str,
    ) -> Result<Self> {
        let salt_len = strength.salt_len();
        if header.len() != strength.encryption_header_len() {
            return Err(ZipError::Corrupt(format!(
                "AES encryption header has {} bytes, expected {}",
                header.len(),
                strength.encryption_header_len()
            )));
        }
        let keys = derive_keys(password, &header[..salt_len], strength);
        if keys.verify != [header[salt_len], header[salt_len + 1]] {
            return Err(ZipError::BadPassword(name.to_string()));
        }
        Ok(Self {
            cipher: AesCtrCipher::new(strength, &keys.cipher_key)?,
            hmac: new_hmac(&keys.mac_key)?,
        })
    }

    /// Decrypt in place. The MAC covers the ciphertext, so it is updated
    /// before the keystream is applied.
    pub(crate) fn decrypt(&mut self, data: &mut [u8]) {
        self.hmac.update(data);
        self.cipher.apply_keystream(data);
    }

    pub(crate) fn verify_hmac(&self, tag: &[u8], name: &str) -> Result<()> {
        let expected = self.hmac.clone().finalize().into_bytes();
        if &expected[..WZ_AES_HMAC_LEN] != tag {
            return Err(ZipError::BadHmac(name.to_string()));
        }
        Ok(())
    }
}

/// WZ_AES encryption context for one entry
pub(crate) struct WzAesEncrypter {
    cipher: AesCtrCipher,
    hmac: HmacSha1,
    header: Vec<u8>,
}

impl WzAesEncrypter {
    pub(crate) fn new(password: &[u8], strength: AesStrength) -> Result<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        random_bytes(&mut salt)?;
        let keys = derive_keys(password, &salt, strength);
        let mut header = salt;
        header.extend_from_slice(&keys.verify);
        Ok(Self {
            cipher: AesCtrCipher::new(strength, &keys.cipher_key)?,
            hmac: new_hmac(&keys.mac_key)?,
            header,
        })
    }

    /// Encryption header to write ahead of the file data
    pub(crate) fn header(&self) -> &[u8] {
        &self.header
    }

    /// Encrypt in place and fold the ciphertext into the MAC.
    pub(crate) fn encrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
        self.hmac.update(data);
    }

    /// Authentication code to append after the file data
    pub(crate) fn finalize(self) -> [u8; WZ_AES_HMAC_LEN] {
        let mac = self.hmac.finalize().into_bytes();
        let mut tag = [0u8; WZ_AES_HMAC_LEN];
        tag.copy_from_slice(&mac[..WZ_AES_HMAC_LEN]);
        tag
    }
}
