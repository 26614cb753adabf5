//! Archive session: open, enumerate, read, write, append, close
//!
//! [`ZipArchive`] is the facade over one underlying byte stream. It owns
//! the entry list and name index, locates the central directory when
//! opening for read or append, and materializes the central directory and
//! end records when a modified archive is closed.
//!
//! The stream is shared: every read handle gets its own virtual cursor
//! over a [`SharedStream`] and performs positioned reads under the
//! archive lock, so concurrent readers of different entries are safe.
//! Write handles are exclusive; while one is open, reads fail with
//! [`ZipError::Busy`].

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::compression::CompressionMethod;
use crate::crypto::EncryptionMethod;
use crate::entry::{DateTime, ZipEntry, DOS_DIRECTORY_ATTR, FLAG_UTF8_FILENAME, MAX_EXTRACT_VERSION};
use crate::error::{Result, ZipError};
use crate::reader::ZipEntryReader;
use crate::spec::{
    CentralDirectoryHeader, EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64EocdLocator,
    CENTRAL_DIRECTORY_HEADER_SIZE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, EOCD64_LOCATOR_SIZE,
    EOCD64_SIZE, EOCD_SIZE, ZIP64_LIMIT, ZIP_FILECOUNT_LIMIT, ZIP_MAX_COMMENT,
};
use crate::writer::ZipEntryWriter;

/// An EOCD can be preceded by up to 65535 comment bytes
const EOCD_SEARCH_LIMIT: u64 = (ZIP_MAX_COMMENT + EOCD_SIZE) as u64;

/// The byte stream an archive operates on
pub trait ArchiveStream: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send> ArchiveStream for T {}

/// Open mode for an archive, mirroring the classic r/w/x/a quartet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read an existing archive; discovery must succeed
    Read,
    /// Truncate and write a fresh archive
    Write,
    /// Like `Write`, but fail if the file already exists
    CreateNew,
    /// Add entries to an existing archive (or to any file, treating its
    /// current contents as an opaque prefix)
    Append,
}

/// Archive-wide defaults fixed at open time
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Default compression method for written entries
    pub compression: CompressionMethod,
    /// Default level hint for the codec
    pub compression_level: Option<u32>,
    /// Permit ZIP64 extensions when sizes or counts demand them
    pub allow_zip64: bool,
    /// Error on filesystem timestamps outside 1980..=2107 instead of
    /// clamping them
    pub strict_timestamps: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Stored,
            compression_level: None,
            allow_zip64: true,
            strict_timestamps: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared stream

/// The underlying stream plus the state every handle consults
///
/// Readers keep their own cursor and go through [`read_at`]; the archive
/// and its single write handle use the plain cursor. The `writing` flag
/// makes reads fail fast while a write handle is open.
///
/// [`read_at`]: SharedStream::read_at
pub(crate) struct SharedStream {
    stream: Mutex<Box<dyn ArchiveStream>>,
    writing: AtomicBool,
}

impl SharedStream {
    fn new(stream: Box<dyn ArchiveStream>) -> Self {
        Self {
            stream: Mutex::new(stream),
            writing: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ArchiveStream>> {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_writing(&self, writing: bool) {
        self.writing.store(writing, Ordering::SeqCst);
    }

    /// One positioned read: seek to the caller's cursor, read, save the
    /// new cursor. Fails while a write handle is open.
    pub(crate) fn read_at(&self, pos: &mut u64, buf: &mut [u8]) -> Result<usize> {
        if self.is_writing() {
            return Err(ZipError::Busy(
                "can't read from the archive while a write handle is open on it",
            ));
        }
        let mut fp = self.lock();
        fp.seek(SeekFrom::Start(*pos))?;
        let n = fp.read(buf)?;
        *pos += n as u64;
        Ok(n)
    }

    pub(crate) fn read_exact_at(&self, pos: &mut u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(pos, &mut buf[filled..])?;
            if n == 0 {
                return Err(ZipError::Corrupt("unexpected end of data".into()));
            }
            filled += n;
        }
        Ok(())
    }

    pub(crate) fn write_all(&self, data: &[u8]) -> Result<()> {
        self.lock().write_all(data)?;
        Ok(())
    }

    pub(crate) fn position(&self) -> Result<u64> {
        Ok(self.lock().stream_position()?)
    }

    pub(crate) fn seek_to(&self, pos: u64) -> Result<u64> {
        Ok(self.lock().seek(SeekFrom::Start(pos))?)
    }

    fn seek_end(&self) -> Result<u64> {
        Ok(self.lock().seek(SeekFrom::End(0))?)
    }

    fn flush(&self) -> Result<()> {
        self.lock().flush()?;
        Ok(())
    }
}

/// Counting adapter for sinks that cannot seek; `stream_position` works,
/// everything else a writer-only pipeline does not need is refused.
struct CountingWriter<W: Write + Send> {
    inner: W,
    offset: u64,
}

impl<W: Write + Send> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, offset: 0 }
    }
}

impl<W: Write + Send> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> Read for CountingWriter<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is write-only",
        ))
    }
}

impl<W: Write + Send> Seek for CountingWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.offset),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not seekable",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Directory discovery

struct DirectoryEnd {
    entries_total: u64,
    cd_size: u64,
    cd_offset: u64,
    eocd_offset: u64,
    comment: Vec<u8>,
    zip64: bool,
}

fn find_directory_end<R: Read + Seek + ?Sized>(fp: &mut R) -> Result<DirectoryEnd> {
    let file_size = fp.seek(SeekFrom::End(0))?;
    let sig = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();

    // Common case first: the EOCD is the last thing in the file and
    // carries no comment.
    if file_size >= EOCD_SIZE as u64 {
        fp.seek(SeekFrom::Start(file_size - EOCD_SIZE as u64))?;
        let mut tail = [0u8; EOCD_SIZE];
        fp.read_exact(&mut tail)?;
        if tail[..4] == sig && tail[EOCD_SIZE - 2..] == [0, 0] {
            let rec = EndOfCentralDirectory::parse(&tail)?;
            let end = DirectoryEnd {
                entries_total: rec.entries_total as u64,
                cd_size: rec.cd_size as u64,
                cd_offset: rec.cd_offset as u64,
                eocd_offset: file_size - EOCD_SIZE as u64,
                comment: Vec::new(),
                zip64: false,
            };
            return try_zip64_upgrade(fp, end);
        }
    }

    // Otherwise the record may be buried under a comment; scan the tail
    // for the last occurrence of its magic.
    let search = file_size.min(EOCD_SEARCH_LIMIT);
    let start = file_size - search;
    fp.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; search as usize];
    fp.read_exact(&mut buf)?;
    let pos = buf
        .windows(4)
        .rposition(|window| window == &sig[..])
        .ok_or(ZipError::NotAZip)?;
    if pos + EOCD_SIZE > buf.len() {
        return Err(ZipError::NotAZip);
    }
    let rec = EndOfCentralDirectory::parse(&buf[pos..pos + EOCD_SIZE])?;
    // Take exactly the claimed comment length (or what is actually there)
    let comment_end = (pos + EOCD_SIZE + rec.comment_len as usize).min(buf.len());
    let comment = buf[pos + EOCD_SIZE..comment_end].to_vec();
    let end = DirectoryEnd {
        entries_total: rec.entries_total as u64,
        cd_size: rec.cd_size as u64,
        cd_offset: rec.cd_offset as u64,
        eocd_offset: start + pos as u64,
        comment,
        zip64: false,
    };
    try_zip64_upgrade(fp, end)
}

/// Look for a ZIP64 locator directly in front of the EOCD and, if valid,
/// replace the 32-bit totals with the 64-bit record's values.
fn try_zip64_upgrade<R: Read + Seek + ?Sized>(
    fp: &mut R,
    mut end: DirectoryEnd,
) -> Result<DirectoryEnd> {
    let locator_size = EOCD64_LOCATOR_SIZE as u64;
    let record_size = EOCD64_SIZE as u64;
    if end.eocd_offset < locator_size + record_size {
        return Ok(end);
    }

    fp.seek(SeekFrom::Start(end.eocd_offset - locator_size))?;
    let mut buf = [0u8; EOCD64_LOCATOR_SIZE];
    if fp.read_exact(&mut buf).is_err() {
        return Ok(end);
    }
    let locator = match Zip64EocdLocator::parse(&buf)? {
        Some(locator) => locator,
        None => return Ok(end),
    };
    if locator.disk_with_eocd64 != 0 || locator.disk_count != 1 {
        return Err(ZipError::Unsupported(
            "zipfiles that span multiple disks".into(),
        ));
    }

    // Assume no extensible data: the record sits right before its locator
    fp.seek(SeekFrom::Start(end.eocd_offset - locator_size - record_size))?;
    let mut buf = [0u8; EOCD64_SIZE];
    if fp.read_exact(&mut buf).is_err() {
        return Ok(end);
    }
    if let Ok(rec) = Zip64EndOfCentralDirectory::parse(&buf) {
        end.entries_total = rec.entries_total;
        end.cd_size = rec.cd_size;
        end.cd_offset = rec.cd_offset;
        end.zip64 = true;
    }
    Ok(end)
}

struct DirectoryContents {
    entries: Vec<ZipEntry>,
    concat: u64,
    start_dir: u64,
    comment: Vec<u8>,
}

fn read_directory<R: Read + Seek + ?Sized>(fp: &mut R) -> Result<DirectoryContents> {
    let end = find_directory_end(fp)?;

    // The archive may be appended to a stub (a self-extractor, say);
    // everything before the archive proper shifts the offsets by the same
    // amount, recoverable from where the EOCD actually is.
    let trailer = if end.zip64 {
        (EOCD64_SIZE + EOCD64_LOCATOR_SIZE) as u64
    } else {
        0
    };
    let concat = (end.eocd_offset as i64)
        .checked_sub(trailer as i64)
        .and_then(|v| v.checked_sub(end.cd_size as i64))
        .and_then(|v| v.checked_sub(end.cd_offset as i64))
        .filter(|v| *v >= 0)
        .ok_or_else(|| ZipError::Corrupt("inconsistent central directory location".into()))?
        as u64;
    let start_dir = end.cd_offset + concat;
    debug!(
        "central directory: {} bytes at {} (concat {}), {} entries claimed",
        end.cd_size, start_dir, concat, end.entries_total
    );

    fp.seek(SeekFrom::Start(start_dir))?;
    let mut data = vec![0u8; end.cd_size as usize];
    fp.read_exact(&mut data)
        .map_err(|_| ZipError::Corrupt("truncated central directory".into()))?;

    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let header = CentralDirectoryHeader::parse(&data[pos..])?;
        pos += CENTRAL_DIRECTORY_HEADER_SIZE;
        let name_len = header.name_len as usize;
        let extra_len = header.extra_len as usize;
        let comment_len = header.comment_len as usize;
        if pos + name_len + extra_len + comment_len > data.len() {
            return Err(ZipError::Corrupt("truncated central directory".into()));
        }
        let raw_name = &data[pos..pos + name_len];
        let extra = &data[pos + name_len..pos + name_len + extra_len];
        let comment = &data[pos + name_len + extra_len..pos + name_len + extra_len + comment_len];
        pos += name_len + extra_len + comment_len;

        let extract_version = header.extract_version & 0xFF;
        if extract_version > MAX_EXTRACT_VERSION {
            return Err(ZipError::Unsupported(format!(
                "zip file version {:.1}",
                extract_version as f32 / 10.0
            )));
        }

        let name = ZipEntry::decode_name(raw_name, header.flags & FLAG_UTF8_FILENAME != 0)?;
        let mut entry = ZipEntry::new(&name);
        entry.orig_name = raw_name.to_vec();
        entry.extra = extra.to_vec();
        entry.comment = comment.to_vec();
        entry.create_version = header.create_version;
        entry.create_system = header.create_system;
        entry.extract_version = extract_version;
        entry.flags = header.flags;
        entry.compression = CompressionMethod::from_code(header.method);
        entry.date_time = DateTime::from_dos(header.mod_date, header.mod_time);
        entry.crc32 = header.crc32;
        entry.compressed_size = header.compressed_size as u64;
        entry.uncompressed_size = header.uncompressed_size as u64;
        entry.volume = header.disk_start;
        entry.internal_attr = header.internal_attr;
        entry.external_attr = header.external_attr;
        entry.header_offset = header.header_offset as u64;
        entry.decode_extra(true)?;
        entries.push(entry);
    }

    Ok(DirectoryContents {
        entries,
        concat,
        start_dir,
        comment: end.comment,
    })
}

/// Quick check whether the file ends in something that parses as an
/// end-of-central-directory record.
pub fn is_zip_file<P: AsRef<Path>>(path: P) -> bool {
    match File::open(path) {
        Ok(mut file) => find_directory_end(&mut file).is_ok(),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// The archive session

/// A ZIP archive opened over a byte stream
pub struct ZipArchive {
    pub(crate) shared: Arc<SharedStream>,
    pub(crate) mode: Mode,
    pub(crate) entries: Vec<ZipEntry>,
    pub(crate) by_name: HashMap<String, usize>,
    comment: Vec<u8>,
    /// Absolute position where the next local header (and eventually the
    /// central directory) goes
    pub(crate) start_dir: u64,
    /// Bytes of foreign data preceding the archive proper; added to every
    /// stored header offset when seeking
    pub(crate) concat: u64,
    pub(crate) modified: bool,
    pub(crate) seekable: bool,
    pub(crate) allow_zip64: bool,
    strict_timestamps: bool,
    compression: CompressionMethod,
    compression_level: Option<u32>,
    pub(crate) password: Option<Vec<u8>>,
    pub(crate) encryption: Option<EncryptionMethod>,
    closed: bool,
}

impl ZipArchive {
    /// Open the archive at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        Self::open_with(path, mode, ArchiveOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: Mode, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = match mode {
            Mode::Read => OpenOptions::new().read(true).open(path)?,
            Mode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            Mode::CreateNew => OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)?,
            Mode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };
        Self::from_parts(Box::new(file), mode, options, true)
    }

    /// Operate on a caller-supplied stream (a file, a `Cursor`, ...).
    pub fn from_stream<S: ArchiveStream + 'static>(stream: S, mode: Mode) -> Result<Self> {
        Self::from_stream_with(stream, mode, ArchiveOptions::default())
    }

    pub fn from_stream_with<S: ArchiveStream + 'static>(
        stream: S,
        mode: Mode,
        options: ArchiveOptions,
    ) -> Result<Self> {
        Self::from_parts(Box::new(stream), mode, options, true)
    }

    /// Write an archive to a sink that cannot seek (a socket, a pipe).
    /// Entries carry data descriptors so nothing needs patching.
    pub fn from_unseekable<W: Write + Send + 'static>(sink: W) -> Result<Self> {
        Self::from_unseekable_with(sink, ArchiveOptions::default())
    }

    pub fn from_unseekable_with<W: Write + Send + 'static>(
        sink: W,
        options: ArchiveOptions,
    ) -> Result<Self> {
        Self::from_parts(Box::new(CountingWriter::new(sink)), Mode::Write, options, false)
    }

    fn from_parts(
        stream: Box<dyn ArchiveStream>,
        mode: Mode,
        options: ArchiveOptions,
        seekable: bool,
    ) -> Result<Self> {
        options.compression.check_supported()?;
        let mut archive = Self {
            shared: Arc::new(SharedStream::new(stream)),
            mode,
            entries: Vec::new(),
            by_name: HashMap::new(),
            comment: Vec::new(),
            start_dir: 0,
            concat: 0,
            modified: false,
            seekable,
            allow_zip64: options.allow_zip64,
            strict_timestamps: options.strict_timestamps,
            compression: options.compression,
            compression_level: options.compression_level,
            password: None,
            encryption: None,
            closed: false,
        };

        match mode {
            Mode::Read => archive.load_directory()?,
            Mode::Write | Mode::CreateNew => {
                // Mark modified so the end records get written even if no
                // entries are ever added
                archive.modified = true;
                archive.start_dir = archive.shared.position()?;
            }
            Mode::Append => match archive.load_directory() {
                Ok(()) => {}
                Err(ZipError::NotAZip) | Err(ZipError::Corrupt(_)) => {
                    // Not a zip: leave the current contents alone and
                    // append a fresh archive after them
                    archive.entries.clear();
                    archive.by_name.clear();
                    archive.comment.clear();
                    archive.concat = 0;
                    archive.start_dir = archive.shared.seek_end()?;
                    archive.modified = true;
                }
                Err(e) => return Err(e),
            },
        }
        Ok(archive)
    }

    fn load_directory(&mut self) -> Result<()> {
        let contents = {
            let mut fp = self.shared.lock();
            read_directory(&mut **fp)?
        };
        self.by_name.clear();
        for (index, entry) in contents.entries.iter().enumerate() {
            if self.by_name.insert(entry.name.clone(), index).is_some() {
                warn!("Duplicate name: {:?}", entry.name);
            }
        }
        self.entries = contents.entries;
        self.concat = contents.concat;
        self.start_dir = contents.start_dir;
        self.comment = contents.comment;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::InvalidMode(
                "attempt to use a ZIP archive that was already closed",
            ));
        }
        Ok(())
    }

    fn ensure_write_mode(&self) -> Result<()> {
        self.ensure_open()?;
        if !matches!(self.mode, Mode::Write | Mode::CreateNew | Mode::Append) {
            return Err(ZipError::InvalidMode("write requires mode 'w', 'x', or 'a'"));
        }
        if self.shared.is_writing() {
            return Err(ZipError::Busy(
                "can't write to the archive while an open writing handle exists",
            ));
        }
        Ok(())
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Look up an entry by name. When duplicates exist, the last one wins.
    pub fn info(&self, name: &str) -> Result<&ZipEntry> {
        self.by_name
            .get(name)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))
    }

    /// The archive comment bytes.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Set the archive comment, truncating to the 65535-byte field limit.
    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) {
        let mut comment = comment.into();
        if comment.len() > ZIP_MAX_COMMENT {
            warn!(
                "Archive comment is too long; truncating to {} bytes",
                ZIP_MAX_COMMENT
            );
            comment.truncate(ZIP_MAX_COMMENT);
        }
        self.comment = comment;
        self.modified = true;
    }

    /// Default password for subsequent reads and encrypted writes.
    pub fn set_password(&mut self, password: Option<&[u8]>) {
        self.password = password.filter(|p| !p.is_empty()).map(|p| p.to_vec());
    }

    /// Default encryption scheme for subsequent writes; `None` writes
    /// plaintext entries.
    pub fn set_encryption(&mut self, scheme: Option<EncryptionMethod>) {
        self.encryption = scheme;
    }

    /// Read a whole entry into memory.
    pub fn read(&self, name: &str, password: Option<&[u8]>) -> Result<Vec<u8>> {
        self.open_reader(name, password)?.read_all()
    }

    /// Open a streaming reader over one entry.
    pub fn open_reader(&self, name: &str, password: Option<&[u8]>) -> Result<ZipEntryReader> {
        let entry = self.info(name)?.clone();
        self.open_reader_for(&entry, password)
    }

    /// Open a streaming reader over a specific entry (useful when
    /// duplicate names shadow each other).
    pub fn open_reader_for(
        &self,
        entry: &ZipEntry,
        password: Option<&[u8]>,
    ) -> Result<ZipEntryReader> {
        self.ensure_open()?;
        let password = password
            .filter(|p| !p.is_empty())
            .map(|p| p.to_vec())
            .or_else(|| self.password.clone());
        ZipEntryReader::new(
            Arc::clone(&self.shared),
            entry.clone(),
            self.concat,
            password,
            self.seekable,
        )
    }

    /// Open a streaming writer for one new entry. At most one writer may
    /// exist at a time; drop it without [`ZipEntryWriter::finish`] and the
    /// entry is omitted from the archive.
    pub fn open_writer(&mut self, entry: ZipEntry, force_zip64: bool) -> Result<ZipEntryWriter<'_>> {
        self.ensure_write_mode()?;
        ZipEntryWriter::new(self, entry, force_zip64)
    }

    /// Add a file (or directory) from the filesystem.
    pub fn write_file<P: AsRef<Path>>(&mut self, path: P, arcname: Option<&str>) -> Result<()> {
        self.write_file_with(path, arcname, None, None)
    }

    pub fn write_file_with<P: AsRef<Path>>(
        &mut self,
        path: P,
        arcname: Option<&str>,
        compression: Option<CompressionMethod>,
        level: Option<u32>,
    ) -> Result<()> {
        self.ensure_write_mode()?;
        let path = path.as_ref();
        let mut entry = ZipEntry::from_path(path, arcname, self.strict_timestamps)?;
        if entry.is_dir() {
            return self.write_dir_entry(entry);
        }
        entry.compression = compression.unwrap_or(self.compression);
        entry.compression_level = level.or(self.compression_level);

        let mut source = File::open(path)?;
        let mut writer = self.open_writer(entry, false)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_chunk(&buf[..n])?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Write `data` under `name`. A trailing slash writes a directory
    /// entry.
    pub fn write_bytes(&mut self, name: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let mut entry = ZipEntry::new(name);
        entry.date_time = DateTime::now();
        entry.compression = self.compression;
        entry.compression_level = self.compression_level;
        if entry.is_dir() {
            entry.external_attr = 0o40775 << 16 | DOS_DIRECTORY_ATTR;
        } else {
            entry.external_attr = 0o600 << 16;
        }
        self.write_entry_bytes(entry, data)
    }

    /// Like [`write_bytes`], but with caller-controlled entry metadata.
    ///
    /// [`write_bytes`]: ZipArchive::write_bytes
    pub fn write_entry_bytes(&mut self, mut entry: ZipEntry, data: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_write_mode()?;
        let data = data.as_ref();
        entry.uncompressed_size = data.len() as u64;
        let mut writer = self.open_writer(entry, false)?;
        writer.write_chunk(data)?;
        writer.finish()?;
        Ok(())
    }

    /// Directory members carry no data; only a local header is written.
    fn write_dir_entry(&mut self, mut entry: ZipEntry) -> Result<()> {
        entry.compressed_size = 0;
        entry.uncompressed_size = 0;
        entry.crc32 = 0;
        self.check_writable(&entry)?;
        if self.seekable {
            self.shared.seek_to(self.start_dir)?;
        }
        entry.header_offset = self.shared.position()? - self.concat;
        self.modified = true;
        let header = entry.local_header(Some(false))?;
        self.shared.write_all(&header)?;
        self.start_dir = self.shared.position()?;
        self.register_entry(entry);
        Ok(())
    }

    /// Preconditions for adding `entry`, shared by all write paths.
    pub(crate) fn check_writable(&self, entry: &ZipEntry) -> Result<()> {
        if self.by_name.contains_key(&entry.name) {
            warn!("Duplicate name: {:?}", entry.name);
        }
        if !matches!(self.mode, Mode::Write | Mode::CreateNew | Mode::Append) {
            return Err(ZipError::InvalidMode("write requires mode 'w', 'x', or 'a'"));
        }
        if self.closed {
            return Err(ZipError::InvalidMode(
                "attempt to write to a ZIP archive that was already closed",
            ));
        }
        entry.compression.check_supported()?;
        if !self.allow_zip64 {
            if self.entries.len() as u64 >= ZIP_FILECOUNT_LIMIT {
                return Err(ZipError::TooLarge("files count"));
            }
            if entry.uncompressed_size > ZIP64_LIMIT {
                return Err(ZipError::TooLarge("file size"));
            }
            if entry.header_offset > ZIP64_LIMIT {
                return Err(ZipError::TooLarge("zipfile size"));
            }
        }
        Ok(())
    }

    pub(crate) fn register_entry(&mut self, entry: ZipEntry) {
        let index = self.entries.len();
        self.by_name.insert(entry.name.clone(), index);
        self.entries.push(entry);
    }

    /// Extract one member under `dir` (the current directory by default),
    /// sanitizing the stored path. Returns the path written.
    pub fn extract(
        &self,
        member: &str,
        dir: Option<&Path>,
        password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let entry = self.info(member)?.clone();
        self.extract_entry(&entry, dir, password)
    }

    pub fn extract_entry(
        &self,
        entry: &ZipEntry,
        dir: Option<&Path>,
        password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let base = match dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let target = sanitized_target_path(&entry.name, &base);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            return Ok(target);
        }
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut reader = self.open_reader_for(entry, password)?;
        let mut output = File::create(&target)?;
        loop {
            let chunk = reader.read_chunk()?;
            if chunk.is_empty() {
                break;
            }
            output.write_all(&chunk)?;
        }
        Ok(target)
    }

    /// Extract every member (or the named subset).
    pub fn extract_all(
        &self,
        dir: Option<&Path>,
        members: Option<&[&str]>,
        password: Option<&[u8]>,
    ) -> Result<()> {
        match members {
            Some(names) => {
                for name in names {
                    self.extract(name, dir, password)?;
                }
            }
            None => {
                for entry in &self.entries {
                    self.extract_entry(entry, dir, password)?;
                }
            }
        }
        Ok(())
    }

    /// Read every entry to its end, returning the name of the first one
    /// that fails its integrity checks, if any.
    pub fn test(&self) -> Result<Option<String>> {
        for entry in &self.entries {
            let mut reader = match self.open_reader_for(entry, None) {
                Ok(reader) => reader,
                Err(ZipError::Corrupt(_)) => return Ok(Some(entry.name.clone())),
                Err(e) => return Err(e),
            };
            loop {
                match reader.read_chunk() {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(_) => {}
                    Err(ZipError::Corrupt(_))
                    | Err(ZipError::BadCrc(_))
                    | Err(ZipError::BadHmac(_)) => return Ok(Some(entry.name.clone())),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }

    /// Write the end records if the archive was modified, then detach
    /// from the stream. Idempotent; also invoked on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.shared.is_writing() {
            return Err(ZipError::Busy(
                "can't close the archive while an open writing handle exists",
            ));
        }
        let result = if matches!(self.mode, Mode::Write | Mode::CreateNew | Mode::Append)
            && self.modified
        {
            self.write_end_record()
        } else {
            Ok(())
        };
        self.closed = true;
        result
    }

    fn write_end_record(&mut self) -> Result<()> {
        if self.seekable {
            self.shared.seek_to(self.start_dir)?;
        }
        for entry in &self.entries {
            let record = entry.central_directory_record()?;
            self.shared.write_all(&record)?;
        }
        let cd_end = self.shared.position()?;
        let count = self.entries.len() as u64;
        let cd_size = cd_end - self.start_dir;
        let cd_offset = self.start_dir - self.concat;

        let zip64_reason = if count > ZIP_FILECOUNT_LIMIT {
            Some("files count")
        } else if cd_offset > ZIP64_LIMIT {
            Some("central directory offset")
        } else if cd_size > ZIP64_LIMIT {
            Some("central directory size")
        } else {
            None
        };
        if let Some(reason) = zip64_reason {
            if !self.allow_zip64 {
                return Err(ZipError::TooLarge(reason));
            }
            let record = Zip64EndOfCentralDirectory {
                create_version: 45,
                extract_version: 45,
                disk_number: 0,
                disk_start: 0,
                entries_this_disk: count,
                entries_total: count,
                cd_size,
                cd_offset,
            };
            self.shared.write_all(&record.encode())?;
            let locator = Zip64EocdLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_end - self.concat,
                disk_count: 1,
            };
            self.shared.write_all(&locator.encode())?;
        }

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_start: 0,
            entries_this_disk: count.min(ZIP_FILECOUNT_LIMIT) as u16,
            entries_total: count.min(ZIP_FILECOUNT_LIMIT) as u16,
            cd_size: cd_size.min(u32::MAX as u64) as u32,
            cd_offset: cd_offset.min(u32::MAX as u64) as u32,
            comment_len: 0,
        };
        self.shared.write_all(&eocd.encode(&self.comment))?;
        self.shared.flush()?;
        Ok(())
    }
}

impl Drop for ZipArchive {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ---------------------------------------------------------------------------
// Extraction path safety

/// Separators recognized in archived names: the format's `/` always,
/// plus `\` where the local filesystem treats it as one too. Splitting
/// on this set is the same as mapping every separator onto the
/// platform's and then splitting on that.
#[cfg(windows)]
const NAME_SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
const NAME_SEPARATORS: &[char] = &['/'];

/// Build the on-disk target for an archived name: map the archive
/// separator onto the platform's, drop any drive letter or UNC prefix,
/// drop empty, `.` and `..` components, sanitize what the local
/// filesystem cannot represent, and join under `base`.
fn sanitized_target_path(name: &str, base: &Path) -> PathBuf {
    let name = strip_drive(name);
    let mut target = base.to_path_buf();
    for part in name.split(NAME_SEPARATORS) {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        let part = sanitize_component(part);
        if part.is_empty() {
            continue;
        }
        target.push(part);
    }
    target
}

/// Drop a leading `X:` drive or `\\server\share` UNC prefix, the way
/// `splitdrive` does on the platforms that have them.
#[cfg(windows)]
fn strip_drive(name: &str) -> &str {
    let bytes = name.as_bytes();
    let is_sep = |c: u8| c == b'/' || c == b'\\';
    if bytes.len() >= 2 && bytes[1] == b':' {
        return &name[2..];
    }
    if bytes.len() >= 3 && is_sep(bytes[0]) && is_sep(bytes[1]) && !is_sep(bytes[2]) {
        // UNC: the prefix runs through the server and share names
        let server_end = match bytes[2..].iter().position(|&c| is_sep(c)) {
            Some(i) => i + 2,
            None => return name,
        };
        if bytes.len() > server_end + 1 && is_sep(bytes[server_end + 1]) {
            return name;
        }
        let share_end = bytes[server_end + 1..]
            .iter()
            .position(|&c| is_sep(c))
            .map(|i| server_end + 1 + i)
            .unwrap_or(bytes.len());
        return &name[share_end..];
    }
    name
}

#[cfg(not(windows))]
fn strip_drive(name: &str) -> &str {
    name
}

#[cfg(windows)]
fn sanitize_component(part: &str) -> String {
    let translated: String = part
        .chars()
        .map(|c| if ":<>|\"?*".contains(c) { '_' } else { c })
        .collect();
    translated.trim_end_matches('.').to_string()
}

#[cfg(not(windows))]
fn sanitize_component(part: &str) -> String {
    part.to_string()
}
