//! End-to-end archive tests: write, close, reopen, read back.

use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use v_zip::{
    is_zip_file, AesStrength, ArchiveOptions, CompressionMethod, EncryptionMethod, Mode, ZipArchive,
    ZipEntry, ZipError,
};

fn temp_zip(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

/// Write-only sink whose bytes survive the archive; used to exercise the
/// unseekable data-descriptor path.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn stored_roundtrip_with_known_crc() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "hello.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("a.txt", "hello").unwrap();
    archive.close().unwrap();

    assert!(is_zip_file(&path));
    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.names(), vec!["a.txt"]);
    assert_eq!(archive.read("a.txt", None).unwrap(), b"hello");
    assert_eq!(archive.info("a.txt").unwrap().crc32, 0x3610A686);
    assert_eq!(archive.info("a.txt").unwrap().uncompressed_size, 5);
}

fn payloads() -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        vec![0x42],
        (0..4096u32).map(|i| (i * 7 % 251) as u8).collect(),
    ]
}

fn roundtrip_with(
    codec: CompressionMethod,
    encryption: Option<EncryptionMethod>,
) {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "combo.zip");
    let password: &[u8] = b"correct horse battery staple";
    let payloads = payloads();

    let mut archive = ZipArchive::open_with(
        &path,
        Mode::Write,
        ArchiveOptions {
            compression: codec,
            ..ArchiveOptions::default()
        },
    )
    .unwrap();
    if encryption.is_some() {
        archive.set_password(Some(password));
        archive.set_encryption(encryption);
    }
    for (i, payload) in payloads.iter().enumerate() {
        archive.write_bytes(&format!("file{}.bin", i), payload).unwrap();
    }
    archive.close().unwrap();

    let mut archive = ZipArchive::open(&path, Mode::Read).unwrap();
    archive.set_password(Some(password));
    for (i, payload) in payloads.iter().enumerate() {
        let got = archive.read(&format!("file{}.bin", i), None).unwrap();
        assert_eq!(
            &got, payload,
            "payload {} mismatch for {:?} with {:?}",
            i, codec, encryption
        );
    }
}

#[test]
fn roundtrip_every_codec_plain() {
    for codec in [
        CompressionMethod::Stored,
        CompressionMethod::Deflated,
        CompressionMethod::Bzip2,
        CompressionMethod::Lzma,
    ] {
        roundtrip_with(codec, None);
    }
}

#[test]
fn roundtrip_every_codec_zipcrypto() {
    for codec in [
        CompressionMethod::Stored,
        CompressionMethod::Deflated,
        CompressionMethod::Bzip2,
        CompressionMethod::Lzma,
    ] {
        roundtrip_with(codec, Some(EncryptionMethod::ZipCrypto));
    }
}

#[test]
fn roundtrip_every_codec_aes() {
    for codec in [
        CompressionMethod::Stored,
        CompressionMethod::Deflated,
        CompressionMethod::Bzip2,
        CompressionMethod::Lzma,
    ] {
        for strength in [AesStrength::Aes128, AesStrength::Aes192, AesStrength::Aes256] {
            roundtrip_with(codec, Some(EncryptionMethod::WzAes(strength)));
        }
    }
}

#[test]
fn zipcrypto_wrong_password() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "crypted.zip");
    let payload = "hello".repeat(10_000);

    let mut archive = ZipArchive::open_with(
        &path,
        Mode::Write,
        ArchiveOptions {
            compression: CompressionMethod::Deflated,
            ..ArchiveOptions::default()
        },
    )
    .unwrap();
    archive.set_password(Some(b"pw"));
    archive.set_encryption(Some(EncryptionMethod::ZipCrypto));
    archive.write_bytes("big.txt", payload.as_bytes()).unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(
        archive.read("big.txt", Some(b"pw")).unwrap(),
        payload.as_bytes()
    );
    assert!(matches!(
        archive.read("big.txt", Some(b"no")),
        Err(ZipError::BadPassword(_))
    ));
    assert!(matches!(
        archive.read("big.txt", None),
        Err(ZipError::PasswordRequired(_))
    ));
}

/// Offset of the central directory, from the no-comment EOCD trailer.
fn central_directory_offset(bytes: &[u8]) -> usize {
    let eocd = &bytes[bytes.len() - 22..];
    assert_eq!(&eocd[..4], b"PK\x05\x06");
    u32::from_le_bytes(eocd[16..20].try_into().unwrap()) as usize
}

#[test]
fn aes_tamper_detection() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "aes.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.set_password(Some(b"pw"));
    archive.set_encryption(Some(EncryptionMethod::WzAes(AesStrength::Aes256)));
    archive.write_bytes("zeros.bin", vec![0u8; 100]).unwrap();
    archive.close().unwrap();

    // Intact archive reads back
    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.read("zeros.bin", Some(b"pw")).unwrap(), vec![0u8; 100]);
    drop(archive);

    // Flip the last byte of the HMAC tag (the byte just before the
    // central directory)
    let mut bytes = fs::read(&path).unwrap();
    let cd_offset = central_directory_offset(&bytes);
    bytes[cd_offset - 1] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert!(matches!(
        archive.read("zeros.bin", Some(b"pw")),
        Err(ZipError::BadHmac(_))
    ));

    // Flip a ciphertext byte instead
    let mut bytes = fs::read(&path).unwrap();
    bytes[cd_offset - 1] ^= 0x01; // restore the tag
    bytes[cd_offset - 30] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert!(matches!(
        archive.read("zeros.bin", Some(b"pw")),
        Err(ZipError::BadHmac(_))
    ));
}

#[test]
fn stored_tamper_fails_crc() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "plain.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("data.bin", vec![7u8; 256]).unwrap();
    archive.close().unwrap();

    let mut bytes = fs::read(&path).unwrap();
    let cd_offset = central_directory_offset(&bytes);
    bytes[cd_offset - 17] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert!(matches!(
        archive.read("data.bin", None),
        Err(ZipError::BadCrc(_))
    ));
    assert_eq!(archive.test().unwrap(), Some("data.bin".to_string()));
}

#[test]
fn large_archive_comment() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "comment.zip");
    let comment = vec![b'c'; 40_000];

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("x", "x").unwrap();
    archive.set_comment(comment.clone());
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.comment(), &comment[..]);
    drop(archive);

    // Close without modification rewrites nothing
    let before = fs::read(&path).unwrap();
    let mut archive = ZipArchive::open(&path, Mode::Append).unwrap();
    assert_eq!(archive.comment(), &comment[..]);
    archive.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn comment_is_truncated_at_field_limit() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "comment.zip");
    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.set_comment(vec![b'y'; 70_000]);
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.comment().len(), 65_535);
}

#[test]
fn concat_prepended_stub_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "plain.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("a.txt", "alpha").unwrap();
    archive.write_bytes("b.txt", "beta").unwrap();
    archive.close().unwrap();

    // Prepend an arbitrary 4 KiB stub
    let original = fs::read(&path).unwrap();
    let mut stubbed = vec![0xEE; 4096];
    stubbed.extend_from_slice(&original);
    let stub_path = temp_zip(&dir, "stubbed.zip");
    fs::write(&stub_path, &stubbed).unwrap();

    let archive = ZipArchive::open(&stub_path, Mode::Read).unwrap();
    assert_eq!(archive.names(), vec!["a.txt", "b.txt"]);
    assert_eq!(archive.read("a.txt", None).unwrap(), b"alpha");
    assert_eq!(archive.read("b.txt", None).unwrap(), b"beta");
}

#[test]
fn concat_archive_appendable() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "stubbed.zip");

    // Archive behind a stub, then append to it
    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("one.txt", "one").unwrap();
    archive.close().unwrap();
    let original = fs::read(&path).unwrap();
    let mut stubbed = b"#!/bin/sh\nexit 0\n".to_vec();
    stubbed.extend_from_slice(&original);
    fs::write(&path, &stubbed).unwrap();

    let mut archive = ZipArchive::open(&path, Mode::Append).unwrap();
    archive.write_bytes("two.txt", "two").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.names(), vec!["one.txt", "two.txt"]);
    assert_eq!(archive.read("one.txt", None).unwrap(), b"one");
    assert_eq!(archive.read("two.txt", None).unwrap(), b"two");
}

#[test]
fn append_preserves_existing_entries() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "append.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("first.txt", "first").unwrap();
    archive.write_bytes("second.txt", "second").unwrap();
    archive.close().unwrap();

    let mut archive = ZipArchive::open(&path, Mode::Append).unwrap();
    assert_eq!(archive.entries().len(), 2);
    archive.write_bytes("third.txt", "third").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.names(), vec!["first.txt", "second.txt", "third.txt"]);
    for (name, data) in [("first.txt", "first"), ("second.txt", "second"), ("third.txt", "third")]
    {
        assert_eq!(archive.read(name, None).unwrap(), data.as_bytes());
    }
}

#[test]
fn append_to_non_zip_file() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "notes.txt");
    fs::write(&path, b"just some notes, not a zip\n").unwrap();

    let mut archive = ZipArchive::open(&path, Mode::Append).unwrap();
    assert!(archive.entries().is_empty());
    archive.write_bytes("added.txt", "added").unwrap();
    archive.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"just some notes"));

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.read("added.txt", None).unwrap(), b"added");
}

#[test]
fn directory_entries() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "dirs.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("dir/", "").unwrap();
    archive.write_bytes("dir/file.txt", "inner").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    let entry = archive.info("dir/").unwrap();
    assert!(entry.is_dir());
    assert_eq!(entry.uncompressed_size, 0);
    assert_eq!(entry.compressed_size, 0);
    assert_ne!(entry.external_attr & 0x10, 0);

    let out = TempDir::new().unwrap();
    archive.extract_all(Some(out.path()), None, None).unwrap();
    assert!(out.path().join("dir").is_dir());
    assert_eq!(
        fs::read(out.path().join("dir/file.txt")).unwrap(),
        b"inner"
    );
}

#[test]
fn extract_sanitizes_hostile_names() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "hostile.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("../../escape.txt", "nope").unwrap();
    archive.write_bytes("/abs/olute.txt", "abs").unwrap();
    archive.write_bytes("..\\..\\win-escape.txt", "nope").unwrap();
    archive.write_bytes("C:/drive/letter.txt", "drv").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    let out = TempDir::new().unwrap();
    let written = archive
        .extract("../../escape.txt", Some(out.path()), None)
        .unwrap();
    assert_eq!(written, out.path().join("escape.txt"));
    assert!(out.path().join("escape.txt").is_file());
    let written = archive.extract("/abs/olute.txt", Some(out.path()), None).unwrap();
    assert_eq!(written, out.path().join("abs").join("olute.txt"));

    // Backslash traversal stays inside the target whether the platform
    // treats the backslash as a separator (filtered) or as a plain name
    // byte (one component)
    let written = archive
        .extract("..\\..\\win-escape.txt", Some(out.path()), None)
        .unwrap();
    assert!(written.starts_with(out.path()));
    assert!(written.is_file());

    // Drive-letter prefixes never become directory components that
    // anchor outside the target
    let written = archive
        .extract("C:/drive/letter.txt", Some(out.path()), None)
        .unwrap();
    assert!(written.starts_with(out.path()));
    assert!(written.is_file());
}

#[test]
fn forced_zip64_entry_roundtrips() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "force64.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    let mut writer = archive.open_writer(ZipEntry::new("small.txt"), true).unwrap();
    writer.write_all(b"tiny payload").unwrap();
    writer.finish().unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.read("small.txt", None).unwrap(), b"tiny payload");
}

#[test]
fn many_entries_use_eocd64() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "many.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    for i in 0..65_536u32 {
        archive.write_bytes(&format!("f{}", i), "x").unwrap();
    }
    archive.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert!(bytes
        .windows(4)
        .any(|w| w == b"PK\x06\x06"), "EOCD64 record missing");
    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.entries().len(), 65_536);
    assert_eq!(archive.read("f65535", None).unwrap(), b"x");
}

#[test]
fn many_entries_without_zip64_fail() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "many.zip");

    let mut archive = ZipArchive::open_with(
        &path,
        Mode::Write,
        ArchiveOptions {
            allow_zip64: false,
            ..ArchiveOptions::default()
        },
    )
    .unwrap();
    let mut failed = false;
    for i in 0..65_536u32 {
        match archive.write_bytes(&format!("f{}", i), "x") {
            Ok(()) => {}
            Err(ZipError::TooLarge(_)) => {
                failed = true;
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(failed, "expected a too-large failure without ZIP64");
}

#[test]
fn busy_while_writer_open() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "busy.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("first.bin", vec![1u8; 100_000]).unwrap();

    let mut reader = archive.open_reader("first.bin", None).unwrap();
    let mut writer = archive.open_writer(ZipEntry::new("second.bin"), false).unwrap();
    writer.write_all(b"data").unwrap();

    // A reader created before the writer opened must fail while the
    // writer is active, then recover once it finishes.
    assert!(matches!(reader.read_chunk(), Err(ZipError::Busy(_))));
    writer.finish().unwrap();
    assert_eq!(reader.read_all().unwrap(), vec![1u8; 100_000]);
    archive.close().unwrap();
}

#[test]
fn lookup_and_mode_errors() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "errors.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("present.txt", "here").unwrap();
    archive.close().unwrap();

    let mut archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert!(matches!(
        archive.info("absent.txt"),
        Err(ZipError::EntryNotFound(_))
    ));
    assert!(matches!(
        archive.write_bytes("nope.txt", "x"),
        Err(ZipError::InvalidMode(_))
    ));

    // Exclusive create refuses an existing file
    assert!(ZipArchive::open(&path, Mode::CreateNew).is_err());
}

#[test]
fn duplicate_names_last_writer_wins() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "dup.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("same.txt", "old").unwrap();
    archive.write_bytes("same.txt", "new").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    // Both entries survive; lookups resolve to the last one
    assert_eq!(archive.entries().len(), 2);
    assert_eq!(archive.read("same.txt", None).unwrap(), b"new");
    let first = archive.entries()[0].clone();
    let mut reader = archive.open_reader_for(&first, None).unwrap();
    assert_eq!(reader.read_all().unwrap(), b"old");
}

#[test]
fn idempotent_discovery() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "idem.zip");

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("one.txt", "one").unwrap();
    archive.write_bytes("two.txt", "twotwo").unwrap();
    archive.close().unwrap();

    let first = ZipArchive::open(&path, Mode::Read).unwrap();
    let second = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(first.names(), second.names());
    for (a, b) in first.entries().iter().zip(second.entries()) {
        assert_eq!(a.crc32, b.crc32);
        assert_eq!(a.compressed_size, b.compressed_size);
        assert_eq!(a.uncompressed_size, b.uncompressed_size);
        assert_eq!(a.header_offset, b.header_offset);
    }
}

#[test]
fn unseekable_sink_uses_data_descriptors() {
    let sink = SharedSink::default();
    let mut archive = ZipArchive::from_unseekable_with(
        sink.clone(),
        ArchiveOptions {
            compression: CompressionMethod::Deflated,
            ..ArchiveOptions::default()
        },
    )
    .unwrap();
    archive.write_bytes("a.txt", "streamed alpha").unwrap();
    archive.write_bytes("b.txt", "streamed beta").unwrap();
    archive.close().unwrap();

    let bytes = sink.0.lock().unwrap().clone();
    assert!(bytes.windows(4).any(|w| w == b"PK\x07\x08"), "no data descriptor");

    let archive = ZipArchive::from_stream(Cursor::new(bytes), Mode::Read).unwrap();
    for entry in archive.entries() {
        assert_ne!(entry.flags & (1 << 3), 0, "flag bit 3 not set");
    }
    assert_eq!(archive.read("a.txt", None).unwrap(), b"streamed alpha");
    assert_eq!(archive.read("b.txt", None).unwrap(), b"streamed beta");
}

#[test]
fn write_file_from_filesystem() {
    let dir = TempDir::new().unwrap();
    let src_dir = TempDir::new().unwrap();
    let src = src_dir.path().join("input.log");
    fs::write(&src, b"log line one\nlog line two\n").unwrap();

    let path = temp_zip(&dir, "fs.zip");
    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive
        .write_file_with(&src, Some("logs/input.log"), Some(CompressionMethod::Deflated), None)
        .unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(
        archive.read("logs/input.log", None).unwrap(),
        b"log line one\nlog line two\n"
    );
}

#[test]
fn entry_seek_across_reset() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "seek.zip");
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

    let mut archive = ZipArchive::open_with(
        &path,
        Mode::Write,
        ArchiveOptions {
            compression: CompressionMethod::Deflated,
            ..ArchiveOptions::default()
        },
    )
    .unwrap();
    archive.write_bytes("data.bin", &payload).unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    let mut reader = archive.open_reader("data.bin", None).unwrap();
    let mut buf = [0u8; 16];

    reader.seek(SeekFrom::Start(90_000)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf[0], (90_000u32 % 251) as u8);

    reader.seek(SeekFrom::Start(10)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf[0], 10);
}

#[test]
fn test_reports_first_failing_entry() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "ok.zip");
    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    archive.write_bytes("fine.txt", "fine").unwrap();
    archive.close().unwrap();

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    assert_eq!(archive.test().unwrap(), None);
}

/// Writes 2 GiB; run with `cargo test -- --ignored` when that is okay.
#[test]
#[ignore]
fn zip64_boundary_entry() {
    let dir = TempDir::new().unwrap();
    let path = temp_zip(&dir, "huge.zip");
    let total: u64 = 1 << 31;
    let chunk = vec![0xA5u8; 1 << 20];

    let mut archive = ZipArchive::open(&path, Mode::Write).unwrap();
    let mut entry = ZipEntry::new("huge.bin");
    entry.uncompressed_size = total;
    let mut writer = archive.open_writer(entry, false).unwrap();
    let mut written = 0u64;
    while written < total {
        writer.write_all(&chunk).unwrap();
        written += chunk.len() as u64;
    }
    let finished = writer.finish().unwrap();
    assert_eq!(finished.uncompressed_size, total);
    archive.close().unwrap();

    // EOCD64 and locator present in the tail
    let mut file = fs::File::open(&path).unwrap();
    file.seek(SeekFrom::End(-200)).unwrap();
    let mut tail = Vec::new();
    file.read_to_end(&mut tail).unwrap();
    assert!(tail.windows(4).any(|w| w == b"PK\x06\x06"));
    assert!(tail.windows(4).any(|w| w == b"PK\x06\x07"));

    let archive = ZipArchive::open(&path, Mode::Read).unwrap();
    let entry = archive.info("huge.bin").unwrap();
    assert_eq!(entry.uncompressed_size, total);
    let mut reader = archive.open_reader("huge.bin", None).unwrap();
    reader.seek(SeekFrom::End(-4)).unwrap();
    let mut last = [0u8; 4];
    reader.read_exact(&mut last).unwrap();
    assert_eq!(last, [0xA5; 4]);
    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), total);
}
