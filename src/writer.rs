//! Streaming entry writer
//!
//! [`ZipEntryWriter`] writes one archive member: local header, encryption
//! header, then `encrypt(compress(data))` as the caller streams bytes in.
//! Finishing flushes the codec, emits the AES authentication tag when
//! applicable, and completes the header bookkeeping with either a data
//! descriptor (unseekable sinks) or a patch of the local header.
//!
//! Exactly one writer may be open per archive; the shared stream's
//! `writing` flag turns concurrent reads into [`ZipError::Busy`] for the
//! duration. Dropping a writer without [`finish`] leaves its bytes in the
//! file but omits the entry from the central directory.
//!
//! [`finish`]: ZipEntryWriter::finish

use std::io::{self, Write};

use log::warn;

use crate::archive::ZipArchive;
use crate::compression::{CompressionMethod, Compressor};
use crate::crypto::{
    zipcrypto_encrypter, EncryptionMethod, WzAesEncrypter, ZipCryptoKeys, WZ_AES_HMAC_LEN,
    WZ_AES_V1, WZ_AES_V2, WZ_AES_VENDOR_ID,
};
use crate::entry::{
    AesMode, ZipEntry, FLAG_COMPRESS_OPTION_1, FLAG_ENCRYPTED, FLAG_USE_DATA_DESCRIPTOR,
};
use crate::error::{Result, ZipError};
use crate::spec::ZIP64_LIMIT;

enum Encrypter {
    ZipCrypto {
        keys: ZipCryptoKeys,
        header: [u8; 12],
    },
    WzAes(WzAesEncrypter),
}

/// Streaming writer for one new archive member
pub struct ZipEntryWriter<'a> {
    archive: &'a mut ZipArchive,
    entry: ZipEntry,
    zip64: bool,
    compressor: Compressor,
    encrypter: Option<Encrypter>,
    crc: crc32fast::Hasher,
    file_size: u64,
    compress_size: u64,
    finished: bool,
}

/// AE-2 (no CRC) for tiny files, where the CRC would leak most of the
/// content, and for bzip2, which checks its own integrity; AE-1 otherwise.
fn aes_version_for(file_size: u64, method: CompressionMethod) -> u16 {
    if file_size < 20 || method == CompressionMethod::Bzip2 {
        WZ_AES_V2
    } else {
        WZ_AES_V1
    }
}

impl<'a> ZipEntryWriter<'a> {
    pub(crate) fn new(
        archive: &'a mut ZipArchive,
        mut entry: ZipEntry,
        force_zip64: bool,
    ) -> Result<Self> {
        if force_zip64 && !archive.allow_zip64 {
            return Err(ZipError::InvalidArgument(
                "force_zip64 requested, but ZIP64 extensions are disallowed".into(),
            ));
        }

        // Sizes and CRC are rewritten with correct values on finish
        entry.compressed_size = 0;
        entry.crc32 = 0;
        entry.flags = 0;

        let encrypting = archive.encryption.is_some();
        if encrypting {
            entry.flags |= FLAG_ENCRYPTED;
        }
        if entry.compression == CompressionMethod::Lzma {
            // Compressed data includes an end-of-stream marker
            entry.flags |= FLAG_COMPRESS_OPTION_1;
        }
        if !archive.seekable {
            entry.flags |= FLAG_USE_DATA_DESCRIPTOR;
        }
        if matches!(archive.encryption, Some(EncryptionMethod::ZipCrypto)) {
            // The password check byte must be derivable before the CRC is
            // known, so ZipCrypto entries verify against the timestamp
            entry.flags |= FLAG_USE_DATA_DESCRIPTOR;
        }
        if entry.external_attr == 0 {
            entry.external_attr = 0o600 << 16; // ?rw-------
        }

        // The compressed stream can outgrow the plaintext slightly
        let zip64 = archive.allow_zip64
            && (force_zip64 || entry.uncompressed_size as f64 * 1.05 > ZIP64_LIMIT as f64);

        if archive.seekable {
            archive.shared.seek_to(archive.start_dir)?;
        }
        entry.header_offset = archive.shared.position()? - archive.concat;
        archive.check_writable(&entry)?;

        let mut encrypter = None;
        if let Some(scheme) = archive.encryption {
            let password = archive
                .password
                .clone()
                .ok_or_else(|| ZipError::PasswordRequired(entry.name.clone()))?;
            match scheme {
                EncryptionMethod::ZipCrypto => {
                    let check_byte = (entry.raw_time() >> 8) as u8;
                    let (keys, header) = zipcrypto_encrypter(&password, check_byte)?;
                    encrypter = Some(Encrypter::ZipCrypto { keys, header });
                }
                EncryptionMethod::WzAes(strength) => {
                    entry.aes = Some(AesMode {
                        version: aes_version_for(entry.uncompressed_size, entry.compression),
                        vendor_id: WZ_AES_VENDOR_ID,
                        strength,
                    });
                    encrypter = Some(Encrypter::WzAes(WzAesEncrypter::new(&password, strength)?));
                }
            }
        }

        let compressor = Compressor::new(entry.compression, entry.compression_level)?;
        let header = entry.local_header(Some(zip64))?;
        archive.modified = true;
        archive.shared.set_writing(true);
        if let Err(e) = archive.shared.write_all(&header) {
            archive.shared.set_writing(false);
            return Err(e);
        }

        let mut writer = Self {
            archive,
            entry,
            zip64,
            compressor,
            encrypter,
            crc: crc32fast::Hasher::new(),
            file_size: 0,
            compress_size: 0,
            finished: false,
        };
        writer.write_encryption_header()?;
        Ok(writer)
    }

    fn write_encryption_header(&mut self) -> Result<()> {
        let header: Option<Vec<u8>> = match &self.encrypter {
            Some(Encrypter::ZipCrypto { header, .. }) => Some(header.to_vec()),
            Some(Encrypter::WzAes(enc)) => Some(enc.header().to_vec()),
            None => None,
        };
        if let Some(header) = header {
            self.compress_size += header.len() as u64;
            self.archive.shared.write_all(&header)?;
        }
        Ok(())
    }

    /// The entry as it stands; sizes and CRC are only final after
    /// [`finish`](ZipEntryWriter::finish).
    pub fn entry(&self) -> &ZipEntry {
        &self.entry
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        match &mut self.encrypter {
            Some(Encrypter::ZipCrypto { keys, .. }) => keys.encrypt(data),
            Some(Encrypter::WzAes(enc)) => enc.encrypt(data),
            None => {}
        }
    }

    pub(crate) fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(ZipError::InvalidMode("write to a finished entry writer"));
        }
        self.file_size += data.len() as u64;
        self.crc.update(data);
        let mut out = self.compressor.compress(data)?;
        if !out.is_empty() {
            self.encrypt(&mut out);
            self.compress_size += out.len() as u64;
            self.archive.shared.write_all(&out)?;
        }
        Ok(())
    }

    /// Flush the pipeline, finalize header bookkeeping, and register the
    /// entry with the archive. Returns the completed metadata.
    pub fn finish(mut self) -> Result<ZipEntry> {
        self.finish_inner()?;
        Ok(self.entry.clone())
    }

    fn finish_inner(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let mut tail = self.compressor.finish()?;
        if !tail.is_empty() {
            self.encrypt(&mut tail);
            self.archive.shared.write_all(&tail)?;
            self.compress_size += tail.len() as u64;
        }
        if let Some(Encrypter::WzAes(enc)) = self.encrypter.take() {
            let tag = enc.finalize();
            self.archive.shared.write_all(&tag)?;
            self.compress_size += WZ_AES_HMAC_LEN as u64;
        }

        self.entry.compressed_size = self.compress_size;
        self.entry.uncompressed_size = self.file_size;
        self.entry.crc32 = self.crc.clone().finalize();
        if !self.entry.uses_data_descriptor() {
            // The construction-time AES version came from a size estimate;
            // the headers written below can carry the real decision
            if let Some(aes) = &mut self.entry.aes {
                aes.version = aes_version_for(self.file_size, self.entry.compression);
            }
        }

        if !self.zip64 {
            if self.file_size > ZIP64_LIMIT {
                return Err(ZipError::TooLarge("file size"));
            }
            if self.compress_size > ZIP64_LIMIT {
                return Err(ZipError::TooLarge("compressed size"));
            }
        }

        if self.entry.uses_data_descriptor() {
            // CRC and sizes go in a trailer after the data
            let descriptor = self.entry.data_descriptor(self.zip64);
            self.archive.shared.write_all(&descriptor)?;
            self.archive.start_dir = self.archive.shared.position()?;
        } else {
            // Patch the local header now that the true values are known
            let end = self.archive.shared.position()?;
            self.archive.start_dir = end;
            self.archive
                .shared
                .seek_to(self.entry.header_offset + self.archive.concat)?;
            let header = self.entry.local_header(Some(self.zip64))?;
            self.archive.shared.write_all(&header)?;
            self.archive.shared.seek_to(end)?;
        }

        self.archive.shared.set_writing(false);
        self.archive.register_entry(self.entry.clone());
        self.finished = true;
        Ok(())
    }
}

impl Write for ZipEntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ZipEntryWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // The entry's bytes stay in the file, but it is never
            // registered, so the central directory will omit it
            self.archive.shared.set_writing(false);
            warn!(
                "write handle for {:?} dropped without finish; entry omitted",
                self.entry.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Mode, ZipArchive};

    #[test]
    fn test_aes_version_rule() {
        assert_eq!(aes_version_for(0, CompressionMethod::Stored), WZ_AES_V2);
        assert_eq!(aes_version_for(19, CompressionMethod::Deflated), WZ_AES_V2);
        assert_eq!(aes_version_for(20, CompressionMethod::Deflated), WZ_AES_V1);
        assert_eq!(aes_version_for(1 << 20, CompressionMethod::Bzip2), WZ_AES_V2);
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
        let writer = archive.open_writer(ZipEntry::new("one.txt"), false).unwrap();
        // The first writer borrows the archive mutably, so a second one is
        // impossible to even express; but a stale reader hitting the
        // stream must see Busy.
        assert!(writer.archive.shared.is_writing());
        drop(writer);
        assert!(!archive.shared.is_writing());
    }

    #[test]
    fn test_dropped_writer_omits_entry() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
        archive.write_bytes("kept.txt", b"kept").unwrap();
        {
            let mut writer = archive
                .open_writer(ZipEntry::new("dropped.txt"), false)
                .unwrap();
            writer.write_chunk(b"partial data").unwrap();
            // dropped without finish()
        }
        archive.close().unwrap();

        let archive = ZipArchive::open(&path, Mode::Read).unwrap();
        assert_eq!(archive.names(), vec!["kept.txt"]);
    }
}
