//! Per-entry metadata for archive members
//!
//! A [`ZipEntry`] is the in-memory description of one archive member:
//! names, DOS timestamp, sizes, CRC, flag bits, offsets and extra blocks.
//! It also knows how to emit its local header, central directory record
//! and data descriptor, and how to decode the ZIP64 and WinZip AES extra
//! fields found during the central directory walk.

use std::fs;
use std::path::{Component, Path, MAIN_SEPARATOR};

use chrono::{Datelike, Timelike};
use codepage_437::{FromCp437, CP437_CONTROL};

use crate::compression::{CompressionMethod, WZ_AES_COMPRESS_TYPE};
use crate::crypto::{AesStrength, WZ_AES_V2};
use crate::error::{Result, ZipError};
use crate::spec::{
    self, CentralDirectoryHeader, DataDescriptor, LocalFileHeader, EXTRA_WZ_AES, EXTRA_ZIP64,
    ZIP64_LIMIT, ZIP64_SENTINEL,
};

pub(crate) const DEFAULT_VERSION: u16 = 20;
pub(crate) const ZIP64_VERSION: u16 = 45;
/// We recognize (but do not necessarily support) features up to this version
pub(crate) const MAX_EXTRACT_VERSION: u16 = 63;

pub(crate) const FLAG_ENCRYPTED: u16 = 1 << 0;
/// Method-specific option bit; set for LZMA when an EOS marker is present
pub(crate) const FLAG_COMPRESS_OPTION_1: u16 = 1 << 1;
pub(crate) const FLAG_USE_DATA_DESCRIPTOR: u16 = 1 << 3;
pub(crate) const FLAG_COMPRESSED_PATCH: u16 = 1 << 5;
pub(crate) const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;
pub(crate) const FLAG_UTF8_FILENAME: u16 = 1 << 11;
pub(crate) const FLAG_ENCRYPTED_CENTRAL_DIR: u16 = 1 << 13;

/// MS-DOS directory attribute bit in `external_attr`
pub(crate) const DOS_DIRECTORY_ATTR: u32 = 0x10;

/// Timestamp in the resolution the DOS date/time fields can hold
///
/// Years span 1980..=2107 and seconds lose their low bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Default for DateTime {
    fn default() -> Self {
        Self {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateTime {
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Result<Self> {
        if !(1980..=2107).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(ZipError::InvalidArgument(format!(
                "date/time {}-{:02}-{:02} {:02}:{:02}:{:02} is not representable",
                year, month, day, hour, minute, second
            )));
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// The current local time, clamped into the representable range.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self::from_chrono(&now).unwrap_or_else(|| {
            if now.year() < 1980 {
                Self::default()
            } else {
                Self::max_representable()
            }
        })
    }

    fn max_representable() -> Self {
        Self {
            year: 2107,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 59,
        }
    }

    fn from_chrono(dt: &chrono::DateTime<chrono::Local>) -> Option<Self> {
        if !(1980..=2107).contains(&dt.year()) {
            return None;
        }
        Some(Self {
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    }

    pub(crate) fn from_dos(date: u16, time: u16) -> Self {
        Self {
            year: (date >> 9) + 1980,
            month: ((date >> 5) & 0xF) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }

    pub(crate) fn dos_date(&self) -> u16 {
        (self.year - 1980) << 9 | (self.month as u16) << 5 | self.day as u16
    }

    pub(crate) fn dos_time(&self) -> u16 {
        (self.hour as u16) << 11 | (self.minute as u16) << 5 | (self.second as u16) / 2
    }
}

/// WinZip AES parameters of an encrypted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesMode {
    /// Vendor version: 1 (AE-1, CRC present) or 2 (AE-2, CRC zeroed)
    pub version: u16,
    /// Vendor ID bytes, normally `"AE"`
    pub vendor_id: [u8; 2],
    pub strength: AesStrength,
}

/// Description of one archive member
#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// Normalized archive path, forward-slash separated
    pub name: String,
    /// Name bytes exactly as stored in the archive, kept so the local
    /// header can be checked against the central directory
    pub(crate) orig_name: Vec<u8>,
    pub date_time: DateTime,
    /// The real compression method; for AES entries the header carries
    /// the 99 sentinel and this holds the method from the extra field
    pub compression: CompressionMethod,
    /// Level hint passed to the codec; ignored for stored and lzma
    pub compression_level: Option<u32>,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Offset of the local header, relative to the start of the archive
    /// proper (any prepended stub is accounted for by the session)
    pub header_offset: u64,
    /// Raw extra-field blob as read from the central directory
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub create_system: u8,
    pub create_version: u16,
    pub extract_version: u16,
    pub internal_attr: u16,
    pub external_attr: u32,
    pub volume: u16,
    pub aes: Option<AesMode>,
}

#[cfg(windows)]
const CREATE_SYSTEM: u8 = 0;
#[cfg(not(windows))]
const CREATE_SYSTEM: u8 = 3;

impl ZipEntry {
    /// Build an entry with default metadata for the given archive path.
    ///
    /// The name is truncated at the first NUL byte and any platform
    /// separators are normalized to forward slashes.
    pub fn new(name: &str) -> Self {
        let name = match name.find('\0') {
            Some(i) => &name[..i],
            None => name,
        };
        let name = if MAIN_SEPARATOR != '/' {
            name.replace(MAIN_SEPARATOR, "/")
        } else {
            name.to_string()
        };
        let orig_name = name.as_bytes().to_vec();
        Self {
            name,
            orig_name,
            date_time: DateTime::default(),
            compression: CompressionMethod::Stored,
            compression_level: None,
            flags: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            header_offset: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            create_system: CREATE_SYSTEM,
            create_version: DEFAULT_VERSION,
            extract_version: DEFAULT_VERSION,
            internal_attr: 0,
            external_attr: 0,
            volume: 0,
            aes: None,
        }
    }

    /// Construct an entry for a file or directory on the filesystem.
    ///
    /// The archive name defaults to the path with any root and drive
    /// stripped; directories get a trailing slash and the MS-DOS
    /// directory bit. Timestamps outside 1980..=2107 are clamped unless
    /// `strict_timestamps` is set, in which case they are an error.
    pub fn from_path(
        path: impl AsRef<Path>,
        arcname: Option<&str>,
        strict_timestamps: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        let is_dir = metadata.is_dir();

        let mtime: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
        let date_time = match DateTime::from_chrono(&mtime) {
            Some(dt) => dt,
            None if strict_timestamps => {
                return Err(ZipError::InvalidArgument(format!(
                    "timestamp of {:?} is outside 1980..=2107",
                    path
                )))
            }
            None if mtime.year() < 1980 => DateTime::default(),
            None => DateTime::max_representable(),
        };

        let mut arcname = match arcname {
            Some(name) => name.to_string(),
            None => path
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/"),
        };
        if is_dir && !arcname.ends_with('/') {
            arcname.push('/');
        }

        let mut entry = ZipEntry::new(&arcname);
        entry.date_time = date_time;
        entry.external_attr = (unix_mode(&metadata) & 0xFFFF) << 16;
        if is_dir {
            entry.external_attr |= DOS_DIRECTORY_ATTR;
            entry.uncompressed_size = 0;
        } else {
            entry.uncompressed_size = metadata.len();
        }
        Ok(entry)
    }

    /// True if this member is a directory.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub(crate) fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_USE_DATA_DESCRIPTOR != 0
    }

    pub(crate) fn raw_time(&self) -> u16 {
        self.date_time.dos_time()
    }

    /// Name bytes plus the flag word with bit 11 set when the name does
    /// not fit in ASCII.
    pub(crate) fn encoded_name_and_flags(&self) -> (&[u8], u16) {
        if self.name.is_ascii() {
            (self.name.as_bytes(), self.flags)
        } else {
            (self.name.as_bytes(), self.flags | FLAG_UTF8_FILENAME)
        }
    }

    /// Method code that goes into the header: 99 for AES entries.
    fn header_method(&self) -> u16 {
        if self.aes.is_some() {
            WZ_AES_COMPRESS_TYPE
        } else {
            self.compression.code()
        }
    }

    /// CRC as written: AE-2 entries must store zero.
    fn header_crc(&self, crc: u32) -> u32 {
        match &self.aes {
            Some(aes) if aes.version == WZ_AES_V2 => 0,
            _ => crc,
        }
    }

    fn aes_extra_block(&self, aes: &AesMode) -> Vec<u8> {
        let mut body = Vec::with_capacity(7);
        body.extend_from_slice(&aes.version.to_le_bytes());
        body.extend_from_slice(&aes.vendor_id);
        body.push(aes.strength.code());
        body.extend_from_slice(&self.compression.code().to_le_bytes());
        spec::encode_extra_field(EXTRA_WZ_AES, &body)
    }

    /// Emit the local file header.
    ///
    /// `zip64 = Some(..)` pins the decision made by the write pipeline so
    /// the header keeps its size when patched later; `None` lets the
    /// sizes decide. A ZIP64 local block carries *both* sizes, unlike the
    /// central directory's overflowed-fields-only rule.
    pub(crate) fn local_header(&self, zip64: Option<bool>) -> Result<Vec<u8>> {
        let (crc, compress_size, file_size) = if self.uses_data_descriptor() {
            (0, 0, 0)
        } else {
            (self.crc32, self.compressed_size, self.uncompressed_size)
        };

        let requires_zip64 = file_size > ZIP64_LIMIT || compress_size > ZIP64_LIMIT;
        let zip64 = zip64.unwrap_or(requires_zip64);

        let mut extra = Vec::new();
        let mut min_version = DEFAULT_VERSION;
        if zip64 {
            let mut body = Vec::with_capacity(16);
            body.extend_from_slice(&file_size.to_le_bytes());
            body.extend_from_slice(&compress_size.to_le_bytes());
            extra.extend_from_slice(&spec::encode_extra_field(EXTRA_ZIP64, &body));
        }
        let (file_field, compress_field) = if requires_zip64 {
            if !zip64 {
                return Err(ZipError::TooLarge("file size"));
            }
            min_version = ZIP64_VERSION;
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (file_size as u32, compress_size as u32)
        };

        let crc = self.header_crc(crc);
        if let Some(aes) = &self.aes {
            extra.extend_from_slice(&self.aes_extra_block(aes));
        }
        min_version = min_version.max(self.compression.min_extract_version());

        let (name, flags) = self.encoded_name_and_flags();
        let header = LocalFileHeader {
            extract_version: min_version.max(self.extract_version),
            flags,
            method: self.header_method(),
            mod_time: self.date_time.dos_time(),
            mod_date: self.date_time.dos_date(),
            crc32: crc,
            compressed_size: compress_field,
            uncompressed_size: file_field,
            name_len: 0,
            extra_len: 0,
        };
        Ok(header.encode(name, &extra))
    }

    /// Emit the central directory record for this entry, including the
    /// name, extra and comment tail.
    pub(crate) fn central_directory_record(&self) -> Result<Vec<u8>> {
        let mut zip64_fields: Vec<u64> = Vec::new();
        let file_field = if self.uncompressed_size > ZIP64_LIMIT {
            zip64_fields.push(self.uncompressed_size);
            ZIP64_SENTINEL
        } else {
            self.uncompressed_size as u32
        };
        let compress_field = if self.compressed_size > ZIP64_LIMIT {
            zip64_fields.push(self.compressed_size);
            ZIP64_SENTINEL
        } else {
            self.compressed_size as u32
        };
        let offset_field = if self.header_offset > ZIP64_LIMIT {
            zip64_fields.push(self.header_offset);
            ZIP64_SENTINEL
        } else {
            self.header_offset as u32
        };

        let mut extra = Vec::new();
        let mut min_version = DEFAULT_VERSION;
        if !zip64_fields.is_empty() {
            let mut body = Vec::with_capacity(8 * zip64_fields.len());
            for field in &zip64_fields {
                body.extend_from_slice(&field.to_le_bytes());
            }
            extra.extend_from_slice(&spec::encode_extra_field(EXTRA_ZIP64, &body));
            min_version = ZIP64_VERSION;
        }
        let crc = self.header_crc(self.crc32);
        if let Some(aes) = &self.aes {
            extra.extend_from_slice(&self.aes_extra_block(aes));
        }
        min_version = min_version.max(self.compression.min_extract_version());

        let (name, flags) = self.encoded_name_and_flags();
        let header = CentralDirectoryHeader {
            create_version: (min_version.max(self.create_version)) & 0xFF,
            create_system: self.create_system,
            extract_version: min_version.max(self.extract_version),
            flags,
            method: self.header_method(),
            mod_time: self.date_time.dos_time(),
            mod_date: self.date_time.dos_date(),
            crc32: crc,
            compressed_size: compress_field,
            uncompressed_size: file_field,
            name_len: 0,
            extra_len: 0,
            comment_len: 0,
            disk_start: 0,
            internal_attr: self.internal_attr,
            external_attr: self.external_attr,
            header_offset: offset_field,
        };
        Ok(header.encode(name, &extra, &self.comment))
    }

    pub(crate) fn data_descriptor(&self, zip64: bool) -> Vec<u8> {
        DataDescriptor {
            crc32: self.header_crc(self.crc32),
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
        }
        .encode(zip64)
    }

    /// Decode the extra fields this library understands: ZIP64 sentinel
    /// replacement and the WinZip AES descriptor. Unknown tags are kept
    /// in `extra` but otherwise ignored.
    pub(crate) fn decode_extra(&mut self, central: bool) -> Result<()> {
        let extra = std::mem::take(&mut self.extra);
        let result = self.decode_extra_inner(&extra, central);
        self.extra = extra;
        result
    }

    fn decode_extra_inner(&mut self, extra: &[u8], central: bool) -> Result<()> {
        for (tag, data) in spec::parse_extra_fields(extra)? {
            match tag {
                EXTRA_ZIP64 => self.decode_extra_zip64(data, central)?,
                EXTRA_WZ_AES => self.decode_extra_wz_aes(data)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn decode_extra_zip64(&mut self, data: &[u8], central: bool) -> Result<()> {
        let mut rest = data;
        let mut take_u64 = |field: &str| -> Result<u64> {
            if rest.len() < 8 {
                return Err(ZipError::Corrupt(format!(
                    "corrupt zip64 extra field, {} not found",
                    field
                )));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&rest[..8]);
            rest = &rest[8..];
            Ok(u64::from_le_bytes(raw))
        };

        if self.uncompressed_size == ZIP64_SENTINEL as u64 {
            self.uncompressed_size = take_u64("file size")?;
        }
        if self.compressed_size == ZIP64_SENTINEL as u64 {
            self.compressed_size = take_u64("compress size")?;
        }
        if central && self.header_offset == ZIP64_SENTINEL as u64 {
            self.header_offset = take_u64("header offset")?;
        }
        Ok(())
    }

    fn decode_extra_wz_aes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != 7 {
            return Err(ZipError::Corrupt(format!(
                "corrupt extra field {:04x} (size={})",
                EXTRA_WZ_AES,
                data.len()
            )));
        }
        let version = u16::from_le_bytes([data[0], data[1]]);
        let vendor_id = [data[2], data[3]];
        let strength = AesStrength::from_code(data[4])
            .ok_or_else(|| ZipError::Unsupported(format!("AES strength code {}", data[4])))?;
        // A header method of 99 only marks the encryption; the method
        // that actually compressed the data rides in the extra field.
        self.compression = CompressionMethod::from_code(u16::from_le_bytes([data[5], data[6]]));
        self.aes = Some(AesMode {
            version,
            vendor_id,
            strength,
        });
        Ok(())
    }

    /// Decode stored name bytes: UTF-8 when flag bit 11 is set, the
    /// historical CP437 otherwise.
    pub(crate) fn decode_name(raw: &[u8], utf8: bool) -> Result<String> {
        if utf8 {
            String::from_utf8(raw.to_vec())
                .map_err(|_| ZipError::Corrupt("invalid UTF-8 in file name".into()))
        } else {
            Ok(String::from_cp437(raw.to_vec(), &CP437_CONTROL))
        }
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> u32 {
    0
}
