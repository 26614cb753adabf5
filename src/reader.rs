//! Streaming entry reader
//!
//! [`ZipEntryReader`] reads one archive member through the full pipeline:
//! positioned I/O on the shared stream, decryption, decompression, then
//! CRC (or HMAC, for AES entries) verification once the end is reached.
//! Construction verifies the local header against the central directory
//! before any data is touched.
//!
//! Readers hold their own cursor, so several may be open at once over the
//! same archive; each low-level read is one seek+read under the archive
//! lock.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::archive::SharedStream;
use crate::compression::Decompressor;
use crate::crypto::{
    zipcrypto_decrypter, WzAesDecrypter, ZipCryptoKeys, WZ_AES_HMAC_LEN, WZ_AES_V2,
    ZIPCRYPTO_HEADER_LEN,
};
use crate::entry::{
    ZipEntry, FLAG_COMPRESSED_PATCH, FLAG_ENCRYPTED_CENTRAL_DIR, FLAG_STRONG_ENCRYPTION,
};
use crate::error::{Result, ZipError};
use crate::spec::{LocalFileHeader, LOCAL_FILE_HEADER_SIZE};

/// Compressed bytes are pulled from the stream in blocks of at least this
const MIN_READ_SIZE: usize = 4096;

/// Forward seeks discard plaintext in chunks of at most this
const MAX_SEEK_READ: usize = 1 << 24;

enum Decrypter {
    ZipCrypto(ZipCryptoKeys),
    WzAes(WzAesDecrypter),
}

/// Streaming reader over one archive member
pub struct ZipEntryReader {
    shared: Arc<SharedStream>,
    entry: ZipEntry,
    /// Virtual cursor into the archive file
    pos: u64,
    /// First byte of file data, after any encryption header
    compress_start: u64,
    /// Compressed payload length net of encryption header and MAC tag
    orig_compress_left: u64,
    compress_left: u64,
    /// Plaintext bytes not yet handed out
    left: u64,
    readbuffer: Vec<u8>,
    offset: usize,
    eof: bool,
    crc: crc32fast::Hasher,
    expected_crc: Option<u32>,
    decrypter: Option<Decrypter>,
    decompressor: Decompressor,
    encryption_header: Vec<u8>,
    password: Option<Vec<u8>>,
    seekable: bool,
}

impl ZipEntryReader {
    pub(crate) fn new(
        shared: Arc<SharedStream>,
        entry: ZipEntry,
        concat: u64,
        password: Option<Vec<u8>>,
        seekable: bool,
    ) -> Result<Self> {
        let mut pos = entry.header_offset + concat;

        let mut fixed = [0u8; LOCAL_FILE_HEADER_SIZE];
        shared.read_exact_at(&mut pos, &mut fixed)?;
        let header = LocalFileHeader::parse(&fixed)?;

        let mut name = vec![0u8; header.name_len as usize];
        shared.read_exact_at(&mut pos, &mut name)?;
        if name != entry.orig_name {
            return Err(ZipError::Corrupt(format!(
                "file name in directory {:?} and header {:?} differ",
                entry.name,
                String::from_utf8_lossy(&name)
            )));
        }
        // The local extra field is not interesting here; the central
        // directory already supplied the authoritative metadata.
        pos += header.extra_len as u64;

        if entry.flags & FLAG_COMPRESSED_PATCH != 0 {
            return Err(ZipError::Unsupported(
                "compressed patched data (flag bit 5)".into(),
            ));
        }
        if entry.flags & FLAG_STRONG_ENCRYPTION != 0 {
            return Err(ZipError::Unsupported("strong encryption (flag bit 6)".into()));
        }
        if entry.flags & FLAG_ENCRYPTED_CENTRAL_DIR != 0 {
            return Err(ZipError::Unsupported(
                "encrypted central directory (flag bit 13)".into(),
            ));
        }
        entry.compression.check_supported()?;

        let mut orig_compress_left = entry.compressed_size;
        let mut encryption_header = Vec::new();
        if entry.is_encrypted() {
            if password.is_none() {
                return Err(ZipError::PasswordRequired(entry.name.clone()));
            }
            // The start (and for AES also the end) of the payload is key
            // material rather than file data.
            let (header_len, overhead) = match &entry.aes {
                Some(aes) => {
                    let n = aes.strength.encryption_header_len();
                    (n, n + WZ_AES_HMAC_LEN)
                }
                None => (ZIPCRYPTO_HEADER_LEN, ZIPCRYPTO_HEADER_LEN),
            };
            orig_compress_left = entry
                .compressed_size
                .checked_sub(overhead as u64)
                .ok_or_else(|| {
                    ZipError::Corrupt("compressed size smaller than encryption header".into())
                })?;
            encryption_header = vec![0u8; header_len];
            shared.read_exact_at(&mut pos, &mut encryption_header)?;
        }

        let expected_crc = match &entry.aes {
            // AE-2 stores no CRC; verify one anyway if a writer left it in
            Some(aes) if aes.version == WZ_AES_V2 && entry.crc32 == 0 => None,
            _ => Some(entry.crc32),
        };

        let decompressor = Decompressor::new(entry.compression)?;
        let mut reader = Self {
            shared,
            compress_start: pos,
            orig_compress_left,
            compress_left: 0,
            left: 0,
            pos,
            readbuffer: Vec::new(),
            offset: 0,
            eof: false,
            crc: crc32fast::Hasher::new(),
            expected_crc,
            decrypter: None,
            decompressor,
            encryption_header,
            password,
            seekable,
            entry,
        };
        reader.rewind_pipeline()?;
        Ok(reader)
    }

    /// The entry this reader was opened over.
    pub fn entry(&self) -> &ZipEntry {
        &self.entry
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Reset the whole pipeline to the first data byte: cursor, counters,
    /// CRC, decrypter and decompressor. Used at construction and for
    /// backward seeks.
    fn rewind_pipeline(&mut self) -> Result<()> {
        self.pos = self.compress_start;
        self.compress_left = self.orig_compress_left;
        self.left = self.entry.uncompressed_size;
        self.readbuffer.clear();
        self.offset = 0;
        self.eof = false;
        self.crc = crc32fast::Hasher::new();
        self.decrypter = self.build_decrypter()?;
        self.decompressor = Decompressor::new(self.entry.compression)?;
        Ok(())
    }

    fn build_decrypter(&self) -> Result<Option<Decrypter>> {
        if !self.entry.is_encrypted() {
            return Ok(None);
        }
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| ZipError::PasswordRequired(self.entry.name.clone()))?;
        match &self.entry.aes {
            Some(aes) => Ok(Some(Decrypter::WzAes(WzAesDecrypter::new(
                password,
                aes.strength,
                &self.encryption_header,
                &self.entry.name,
            )?))),
            None => {
                let mut header = [0u8; ZIPCRYPTO_HEADER_LEN];
                header.copy_from_slice(&self.encryption_header);
                // The 12th header byte checks the password against the
                // CRC high byte, or the DOS time when the CRC was not
                // known at write time (flag bit 3).
                let check_byte = if self.entry.uses_data_descriptor() {
                    (self.entry.raw_time() >> 8) as u8
                } else {
                    (self.entry.crc32 >> 24) as u8
                };
                Ok(Some(Decrypter::ZipCrypto(zipcrypto_decrypter(
                    password,
                    &header,
                    check_byte,
                    &self.entry.name,
                )?)))
            }
        }
    }

    /// Fetch and decrypt up to `want` compressed bytes.
    fn read_compressed(&mut self, want: usize) -> Result<Vec<u8>> {
        if self.compress_left == 0 {
            return Ok(Vec::new());
        }
        let want = want.max(MIN_READ_SIZE).min(self.compress_left as usize);
        let mut buf = vec![0u8; want];
        let got = self.shared.read_at(&mut self.pos, &mut buf)?;
        if got == 0 {
            return Err(ZipError::Corrupt("unexpected end of file data".into()));
        }
        buf.truncate(got);
        self.compress_left -= got as u64;
        match &mut self.decrypter {
            Some(Decrypter::ZipCrypto(keys)) => keys.decrypt(&mut buf),
            Some(Decrypter::WzAes(aes)) => aes.decrypt(&mut buf),
            None => {}
        }
        Ok(buf)
    }

    /// One pull through the pipeline: fetch, decrypt, decompress, clamp
    /// to the advertised size, account the CRC, and verify integrity once
    /// the end is reached. May legitimately return no bytes mid-stream.
    fn pull(&mut self) -> Result<Vec<u8>> {
        if self.eof {
            return Ok(Vec::new());
        }
        let raw = self.read_compressed(MIN_READ_SIZE)?;
        let mut data = self.decompressor.decompress(&raw)?;

        let mut at_end = self.decompressor.eof() || self.compress_left == 0;
        if at_end {
            data.extend_from_slice(&self.decompressor.finish()?);
        }
        if data.len() as u64 > self.left {
            data.truncate(self.left as usize);
        }
        self.left -= data.len() as u64;
        if self.left == 0 {
            at_end = true;
        }
        self.crc.update(&data);
        if at_end {
            self.eof = true;
            self.check_integrity()?;
        }
        Ok(data)
    }

    fn check_integrity(&mut self) -> Result<()> {
        if matches!(self.decrypter, Some(Decrypter::WzAes(_))) {
            // Whatever ciphertext remains (an LZMA end marker, say) still
            // belongs to the MAC.
            while self.compress_left > 0 {
                self.read_compressed(MIN_READ_SIZE)?;
            }
            let mut tag = [0u8; WZ_AES_HMAC_LEN];
            self.shared.read_exact_at(&mut self.pos, &mut tag)?;
            if let Some(Decrypter::WzAes(aes)) = &self.decrypter {
                aes.verify_hmac(&tag, &self.entry.name)?;
            }
        }
        self.check_crc()
    }

    fn check_crc(&self) -> Result<()> {
        if let Some(expected) = self.expected_crc {
            let actual = self.crc.clone().finalize();
            if actual != expected {
                return Err(ZipError::BadCrc(self.entry.name.clone()));
            }
        }
        Ok(())
    }

    /// Next run of plaintext bytes; empty means end of entry. Integrity
    /// errors surface here when the last bytes are delivered.
    pub fn read_chunk(&mut self) -> Result<Vec<u8>> {
        if self.offset < self.readbuffer.len() {
            let out = self.readbuffer[self.offset..].to_vec();
            self.readbuffer.clear();
            self.offset = 0;
            return Ok(out);
        }
        while !self.eof {
            let data = self.pull()?;
            if !data.is_empty() {
                return Ok(data);
            }
        }
        Ok(Vec::new())
    }

    /// Read the remainder of the entry into memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.readbuffer[self.offset..]);
        self.readbuffer.clear();
        self.offset = 0;
        while !self.eof {
            let data = self.pull()?;
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Position within the plaintext.
    pub fn tell(&self) -> u64 {
        self.entry.uncompressed_size - self.left - (self.readbuffer.len() - self.offset) as u64
    }
}

impl Read for ZipEntryReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.offset >= self.readbuffer.len() {
            self.readbuffer.clear();
            self.offset = 0;
            while !self.eof {
                let data = self.pull().map_err(io::Error::from)?;
                if !data.is_empty() {
                    self.readbuffer = data;
                    break;
                }
            }
        }
        let available = &self.readbuffer[self.offset..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for ZipEntryReader {
    /// Seeking is positional bookkeeping within the plaintext. Targets
    /// inside the readahead buffer are pointer moves; going backward
    /// resets the pipeline and replays; going forward reads and discards.
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "underlying stream is not seekable",
            ));
        }
        let file_size = self.entry.uncompressed_size as i64;
        let current = self.tell() as i64;
        let new_pos = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => current + delta,
            SeekFrom::End(delta) => file_size + delta,
        }
        .clamp(0, file_size);

        let read_offset = new_pos - current;
        let buff_offset = read_offset + self.offset as i64;
        if buff_offset >= 0 && (buff_offset as usize) < self.readbuffer.len() {
            self.offset = buff_offset as usize;
            return Ok(self.tell());
        }
        let mut remaining = if read_offset < 0 {
            self.rewind_pipeline().map_err(io::Error::from)?;
            new_pos as u64
        } else {
            read_offset as u64
        };
        while remaining > 0 {
            let buffered = self.readbuffer.len() - self.offset;
            if buffered > 0 {
                let take = buffered.min(remaining as usize).min(MAX_SEEK_READ);
                self.offset += take;
                remaining -= take as u64;
                continue;
            }
            if self.eof {
                break;
            }
            let data = self.pull().map_err(io::Error::from)?;
            self.readbuffer = data;
            self.offset = 0;
        }
        Ok(self.tell())
    }
}
