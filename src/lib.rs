//! # v-zip: Streaming ZIP Archive Library
//!
//! `v-zip` reads, writes and appends PKWARE ZIP archives through
//! bounded-memory streaming pipelines. It speaks the ZIP64 large-archive
//! extension, classic ZipCrypto password protection, and WinZip-compatible
//! AES encryption (AE-1/AE-2), with stored, deflate, bzip2 and lzma
//! entries.
//!
//! ## Features
//!
//! - **Four open modes**: read, write, exclusive-create and append
//! - **Streaming Read**: per-entry readers that decrypt, decompress and
//!   verify on the fly; several can be open at once
//! - **Streaming Write**: on-the-fly compression and encryption, no temp
//!   files, data descriptors for unseekable sinks
//! - **Integrity**: CRC-32 on every read, HMAC-SHA1 authentication for
//!   AES entries, password verification before any data is decrypted
//!
//! ## Quick Start
//!
//! ### Reading a ZIP file
//!
//! ```no_run
//! use v_zip::{Mode, ZipArchive};
//!
//! let archive = ZipArchive::open("archive.zip", Mode::Read)?;
//!
//! // List all entries
//! for entry in archive.entries() {
//!     println!("{}: {} bytes", entry.name, entry.uncompressed_size);
//! }
//!
//! // Read a specific file
//! let data = archive.read("file.txt", None)?;
//! # Ok::<(), v_zip::ZipError>(())
//! ```
//!
//! ### Writing a ZIP file
//!
//! ```no_run
//! use v_zip::{CompressionMethod, Mode, ZipArchive};
//!
//! let mut archive = ZipArchive::open("output.zip", Mode::Write)?;
//!
//! archive.write_bytes("file1.txt", "Hello, World!")?;
//! archive.write_file_with("data.log", None, Some(CompressionMethod::Deflated), Some(6))?;
//!
//! archive.close()?;
//! # Ok::<(), v_zip::ZipError>(())
//! ```
//!
//! ### Encrypted entries
//!
//! ```no_run
//! use v_zip::{AesStrength, EncryptionMethod, Mode, ZipArchive};
//!
//! let mut archive = ZipArchive::open("secret.zip", Mode::Write)?;
//! archive.set_password(Some(b"hunter2"));
//! archive.set_encryption(Some(EncryptionMethod::WzAes(AesStrength::Aes256)));
//! archive.write_bytes("secret.txt", "ssh!")?;
//! archive.close()?;
//! # Ok::<(), v_zip::ZipError>(())
//! ```

pub mod archive;
pub mod compression;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod reader;
mod spec;
pub mod writer;

pub use archive::{is_zip_file, ArchiveOptions, ArchiveStream, Mode, ZipArchive};
pub use compression::CompressionMethod;
pub use crypto::{AesStrength, EncryptionMethod};
pub use entry::{AesMode, DateTime, ZipEntry};
pub use error::{Result, ZipError};
pub use reader::ZipEntryReader;
pub use writer::ZipEntryWriter;
