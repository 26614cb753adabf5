//! Compression codecs for ZIP entries
//!
//! Wraps the stream codecs this library supports behind incremental
//! `Compressor`/`Decompressor` values so the read and write pipelines can
//! push bounded chunks through them:
//!
//! - stored (method 0): identity
//! - deflate (method 8): raw deflate streams via flate2
//! - bzip2 (method 12): via the bzip2 crate
//! - lzma (method 14): raw LZMA1 wrapped in the 4-byte zip version/length
//!   prefix, via lzma-rs
//!
//! lzma-rs has no incremental raw encoder, so the LZMA compressor buffers
//! the entry's plaintext and encodes it when the entry is finished.
//! Decompression is incremental for every method.

use std::mem;

use flate2::{Compression, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, ZipError};

/// Compression method of an AES-encrypted entry is carried in the extra
/// field; the header method is this sentinel.
pub(crate) const WZ_AES_COMPRESS_TYPE: u16 = 99;

/// LZMA SDK version advertised in the zip-lzma prefix, matching what the
/// 7-zip lineage of tools writes.
const LZMA_SDK_MAJOR_VERSION: u8 = 9;
const LZMA_SDK_MINOR_VERSION: u8 = 4;

/// LZMA1 property blobs are always lc/lp/pb plus a 32-bit dictionary size
const LZMA_PROPS_LEN: usize = 5;

/// Output is produced in chunks of this size while draining a codec
const OUT_CHUNK: usize = 4096;

/// Compression method for a ZIP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (method 0)
    Stored,
    /// Raw deflate (method 8)
    Deflated,
    /// bzip2 (method 12)
    Bzip2,
    /// LZMA with the zip version/properties prefix (method 14)
    Lzma,
    /// Any method this library cannot decode
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            12 => CompressionMethod::Bzip2,
            14 => CompressionMethod::Lzma,
            other => CompressionMethod::Unsupported(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Lzma => 14,
            CompressionMethod::Unsupported(code) => code,
        }
    }

    /// Minimum "version needed to extract" this method demands
    pub(crate) fn min_extract_version(self) -> u16 {
        match self {
            CompressionMethod::Stored | CompressionMethod::Deflated => 20,
            CompressionMethod::Bzip2 => 46,
            CompressionMethod::Lzma => 63,
            CompressionMethod::Unsupported(_) => 20,
        }
    }

    pub(crate) fn check_supported(self) -> Result<()> {
        if let CompressionMethod::Unsupported(code) = self {
            let descr = match code {
                1 => " (shrink)",
                2..=5 => " (reduce)",
                6 => " (implode)",
                9 => " (deflate64)",
                93 => " (zstd)",
                98 => " (ppmd)",
                _ => "",
            };
            return Err(ZipError::Unsupported(format!(
                "compression method {}{}",
                code, descr
            )));
        }
        Ok(())
    }
}

fn codec_io_err(context: &str, err: impl std::fmt::Display) -> ZipError {
    ZipError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

// ---------------------------------------------------------------------------
// Compressors

/// Incremental compressor for the write pipeline
pub(crate) enum Compressor {
    Stored,
    Deflate(flate2::Compress),
    Bzip2(bzip2::Compress),
    Lzma(LzmaCompressor),
}

impl Compressor {
    /// `level` is a codec hint: 0-9 for deflate, 1-9 for bzip2, ignored
    /// for stored and lzma.
    pub(crate) fn new(method: CompressionMethod, level: Option<u32>) -> Result<Self> {
        method.check_supported()?;
        Ok(match method {
            CompressionMethod::Stored => Compressor::Stored,
            CompressionMethod::Deflated => {
                let level = level.map(|l| l.min(9)).unwrap_or(6);
                Compressor::Deflate(flate2::Compress::new(Compression::new(level), false))
            }
            CompressionMethod::Bzip2 => {
                let level = level.map(|l| l.clamp(1, 9)).unwrap_or(6);
                Compressor::Bzip2(bzip2::Compress::new(bzip2::Compression::new(level), 30))
            }
            CompressionMethod::Lzma => Compressor::Lzma(LzmaCompressor::new()),
            CompressionMethod::Unsupported(_) => unreachable!(),
        })
    }

    pub(crate) fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Stored => Ok(data.to_vec()),
            Compressor::Deflate(raw) => deflate_run(raw, data, false),
            Compressor::Bzip2(raw) => bzip2_run(raw, data, false),
            Compressor::Lzma(enc) => {
                enc.buf.extend_from_slice(data);
                Ok(Vec::new())
            }
        }
    }

    /// Flush the codec and return whatever output remains buffered.
    pub(crate) fn finish(&mut self) -> Result<Vec<u8>> {
        match self {
            Compressor::Stored => Ok(Vec::new()),
            Compressor::Deflate(raw) => deflate_run(raw, &[], true),
            Compressor::Bzip2(raw) => bzip2_run(raw, &[], true),
            Compressor::Lzma(enc) => enc.finish(),
        }
    }
}

fn deflate_run(raw: &mut flate2::Compress, data: &[u8], finish: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let flush = if finish {
        FlushCompress::Finish
    } else {
        FlushCompress::None
    };
    loop {
        out.reserve(OUT_CHUNK);
        let before = raw.total_in();
        let status = raw
            .compress_vec(&data[pos..], &mut out, flush)
            .map_err(|e| codec_io_err("deflate", e))?;
        pos += (raw.total_in() - before) as usize;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if !finish && pos >= data.len() {
                    break;
                }
            }
        }
    }
    Ok(out)
}

fn bzip2_run(raw: &mut bzip2::Compress, data: &[u8], finish: bool) -> Result<Vec<u8>> {
    use bzip2::{Action, Status};
    let mut out = Vec::new();
    let mut pos = 0usize;
    let action = if finish { Action::Finish } else { Action::Run };
    loop {
        out.reserve(OUT_CHUNK);
        let before = raw.total_in();
        let status = raw
            .compress_vec(&data[pos..], &mut out, action)
            .map_err(|e| codec_io_err("bzip2", e))?;
        pos += (raw.total_in() - before) as usize;
        match status {
            Status::StreamEnd => break,
            _ => {
                if !finish && pos >= data.len() {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Whole-entry LZMA encoder
///
/// Output framing is `{major, minor, props_len}` followed by the 5-byte
/// LZMA1 properties and the raw stream, the layout zip method 14 expects.
pub(crate) struct LzmaCompressor {
    buf: Vec<u8>,
}

impl LzmaCompressor {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let options = lzma_rs::compress::Options {
            unpacked_size: lzma_rs::compress::UnpackedSize::SkipWritingToHeader,
            ..Default::default()
        };
        let mut payload = Vec::new();
        lzma_rs::lzma_compress_with_options(&mut &self.buf[..], &mut payload, &options)?;
        let mut out = Vec::with_capacity(4 + payload.len());
        out.push(LZMA_SDK_MAJOR_VERSION);
        out.push(LZMA_SDK_MINOR_VERSION);
        out.extend_from_slice(&(LZMA_PROPS_LEN as u16).to_le_bytes());
        // payload starts with the props bytes the encoder emitted
        out.extend_from_slice(&payload);
        self.buf.clear();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Decompressors

/// Incremental decompressor for the read pipeline
///
/// `decompress` consumes the whole input chunk; `eof` reports whether the
/// codec has seen its end-of-stream marker (stored and lzma never signal,
/// the caller bounds them by the compressed size instead).
pub(crate) enum Decompressor {
    Stored,
    Deflate { raw: flate2::Decompress, eof: bool },
    Bzip2 { raw: bzip2::Decompress, eof: bool },
    Lzma(LzmaDecompressor),
}

impl Decompressor {
    pub(crate) fn new(method: CompressionMethod) -> Result<Self> {
        method.check_supported()?;
        Ok(match method {
            CompressionMethod::Stored => Decompressor::Stored,
            CompressionMethod::Deflated => Decompressor::Deflate {
                raw: flate2::Decompress::new(false),
                eof: false,
            },
            CompressionMethod::Bzip2 => Decompressor::Bzip2 {
                raw: bzip2::Decompress::new(false),
                eof: false,
            },
            CompressionMethod::Lzma => Decompressor::Lzma(LzmaDecompressor::new()),
            CompressionMethod::Unsupported(_) => unreachable!(),
        })
    }

    pub(crate) fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Decompressor::Stored => Ok(data.to_vec()),
            Decompressor::Deflate { raw, eof } => {
                let mut out = Vec::new();
                let mut pos = 0usize;
                while pos < data.len() && !*eof {
                    out.reserve(OUT_CHUNK);
                    let before = raw.total_in();
                    let status = raw
                        .decompress_vec(&data[pos..], &mut out, FlushDecompress::None)
                        .map_err(|e| ZipError::Corrupt(format!("bad deflate data: {}", e)))?;
                    pos += (raw.total_in() - before) as usize;
                    if status == Status::StreamEnd {
                        *eof = true;
                    }
                }
                Ok(out)
            }
            Decompressor::Bzip2 { raw, eof } => {
                let mut out = Vec::new();
                let mut pos = 0usize;
                while pos < data.len() && !*eof {
                    out.reserve(OUT_CHUNK);
                    let before = raw.total_in();
                    let status = raw
                        .decompress_vec(&data[pos..], &mut out)
                        .map_err(|e| ZipError::Corrupt(format!("bad bzip2 data: {}", e)))?;
                    pos += (raw.total_in() - before) as usize;
                    if status == bzip2::Status::StreamEnd {
                        *eof = true;
                    }
                }
                Ok(out)
            }
            Decompressor::Lzma(dec) => dec.decompress(data),
        }
    }

    /// Called once all compressed bytes are in; drains output the codec
    /// may still be holding back.
    pub(crate) fn finish(&mut self) -> Result<Vec<u8>> {
        match self {
            Decompressor::Lzma(dec) => dec.finish(),
            _ => Ok(Vec::new()),
        }
    }

    pub(crate) fn eof(&self) -> bool {
        match self {
            Decompressor::Stored => false,
            Decompressor::Deflate { eof, .. } => *eof,
            Decompressor::Bzip2 { eof, .. } => *eof,
            Decompressor::Lzma(_) => false,
        }
    }
}

/// Incremental LZMA decoder
///
/// Strips the 4-byte zip prefix, then feeds the properties and raw stream
/// to lzma-rs.
pub(crate) struct LzmaDecompressor {
    stream: Option<lzma_rs::decompress::Stream<Vec<u8>>>,
    prefix: Vec<u8>,
}

impl LzmaDecompressor {
    fn new() -> Self {
        Self {
            stream: None,
            prefix: Vec::new(),
        }
    }

    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        use std::io::Write;

        let mut data = data;
        if self.stream.is_none() {
            self.prefix.extend_from_slice(data);
            if self.prefix.len() < 4 {
                return Ok(Vec::new());
            }
            let props_len = u16::from_le_bytes([self.prefix[2], self.prefix[3]]) as usize;
            if props_len != LZMA_PROPS_LEN {
                return Err(ZipError::Unsupported(format!(
                    "LZMA properties of {} bytes",
                    props_len
                )));
            }
            let options = lzma_rs::decompress::Options {
                unpacked_size: lzma_rs::decompress::UnpackedSize::UseProvided(None),
                allow_incomplete: true,
                ..Default::default()
            };
            let mut stream =
                lzma_rs::decompress::Stream::new_with_options(&options, Vec::new());
            let tail = mem::take(&mut self.prefix);
            stream
                .write_all(&tail[4..])
                .map_err(|e| ZipError::Corrupt(format!("bad lzma data: {}", e)))?;
            self.stream = Some(stream);
            data = &[];
        }
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        if !data.is_empty() {
            stream
                .write_all(data)
                .map_err(|e| ZipError::Corrupt(format!("bad lzma data: {}", e)))?;
        }
        match stream.get_output_mut() {
            Some(out) => Ok(mem::take(out)),
            None => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        match self.stream.take() {
            Some(stream) => stream
                .finish()
                .map_err(|e| ZipError::Corrupt(format!("bad lzma data: {:?}", e))),
            None => Ok(Vec::new()),
        }
    }
}
