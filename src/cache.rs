//! Persistent lyric cache.
//!
//! One file per track, named after the formatted track string. The frame is
//! little-endian throughout: a 4-byte `lrcd` signature, the uncompressed body
//! size (u32), the line count (u16) and a zero-padded 6-byte source id,
//! followed by the LZ4 block-compressed body. The body is a concatenation of
//! `position:u32 text_len:u16 text` records.
//!
//! Writes go through an adjacent temp file and an atomic rename, so readers
//! only ever observe a complete prior or new frame. Any read failure other
//! than plain IO is reported as a distinct error but treated as a miss by
//! callers; a bad file may simply be overwritten.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::{LyricLine, Lyrics, TrackMetadata};
use crate::utils;

const SIGNATURE: [u8; 4] = *b"lrcd";
const HEADER_LEN: usize = 16;
const SOURCE_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("truncated frame")]
    Truncated,
    #[error("decompress: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("corrupt body")]
    CorruptBody,
}

pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Cache { dir: dir.into() }
    }

    fn file_path(&self, meta: &TrackMetadata) -> PathBuf {
        self.dir.join(utils::format_filename(meta))
    }

    pub fn set(&self, meta: &TrackMetadata, lyrics: &Lyrics) -> Result<(), CacheError> {
        let body_size: usize = lyrics.lines.iter().map(|l| l.text.len() + 6).sum();
        let mut body = Vec::with_capacity(body_size);
        for line in &lyrics.lines {
            body.extend_from_slice(&(line.position as u32).to_le_bytes());
            body.extend_from_slice(&(line.text.len() as u16).to_le_bytes());
            body.extend_from_slice(line.text.as_bytes());
        }
        let compressed = lz4_flex::block::compress(&body);

        let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
        frame.extend_from_slice(&SIGNATURE);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&(lyrics.len() as u16).to_le_bytes());
        let mut source = [0u8; SOURCE_LEN];
        let source_bytes = lyrics.source.as_bytes();
        let n = source_bytes.len().min(SOURCE_LEN);
        source[..n].copy_from_slice(&source_bytes[..n]);
        frame.extend_from_slice(&source);
        frame.extend_from_slice(&compressed);

        let path = self.file_path(meta);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &frame)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn get(&self, meta: &TrackMetadata) -> Result<Lyrics, CacheError> {
        let buf = fs::read(self.file_path(meta))?;
        if buf.len() < HEADER_LEN {
            return Err(CacheError::Truncated);
        }
        if buf[..4] != SIGNATURE {
            return Err(CacheError::SignatureMismatch);
        }
        let body_size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let line_count = u16::from_le_bytes([buf[8], buf[9]]) as usize;

        let body = lz4_flex::block::decompress(&buf[HEADER_LEN..], body_size)?;

        let mut lines = Vec::with_capacity(line_count);
        let mut off = 0usize;
        for _ in 0..line_count {
            if off + 6 > body.len() {
                return Err(CacheError::CorruptBody);
            }
            let position =
                u32::from_le_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]])
                    as i64;
            let text_len =
                u16::from_le_bytes([body[off + 4], body[off + 5]]) as usize;
            off += 6;
            if off + text_len > body.len() {
                return Err(CacheError::CorruptBody);
            }
            let text = std::str::from_utf8(&body[off..off + text_len])
                .map_err(|_| CacheError::CorruptBody)?
                .to_string();
            off += text_len;
            lines.push(LyricLine { position, text });
        }

        let source_bytes = &buf[10..10 + SOURCE_LEN];
        let source_len = source_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let source = String::from_utf8_lossy(&source_bytes[..source_len]).into_owned();

        Ok(Lyrics { lines, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meta() -> TrackMetadata {
        TrackMetadata {
            title: "春日影".to_string(),
            artists: vec!["CRYCHIC".to_string()],
            text: String::new(),
            url: String::new(),
            duration: Duration::from_secs(258),
        }
    }

    fn lyrics(source: &str) -> Lyrics {
        Lyrics {
            lines: vec![
                LyricLine {
                    position: 0,
                    text: "a".to_string(),
                },
                LyricLine {
                    position: 1000,
                    text: "b".to_string(),
                },
            ],
            source: source.to_string(),
        }
    }

    #[test]
    fn round_trip_preserves_lines_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let written = lyrics("lrclib");
        cache.set(&meta(), &written).unwrap();

        let read = cache.get(&meta()).unwrap();
        assert_eq!(read, written);

        let raw = fs::read(dir.path().join(utils::format_filename(&meta()))).unwrap();
        assert_eq!(&raw[..4], &[0x6C, 0x72, 0x63, 0x64]);
    }

    #[test]
    fn long_source_truncates_to_six_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set(&meta(), &lyrics("toolong")).unwrap();
        let read = cache.get(&meta()).unwrap();
        assert_eq!(read.source, "toolon");
    }

    #[test]
    fn bad_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set(&meta(), &lyrics("ncm")).unwrap();
        let path = dir.path().join(utils::format_filename(&meta()));
        let mut raw = fs::read(&path).unwrap();
        raw[0] = b'x';
        fs::write(&path, &raw).unwrap();
        assert!(matches!(
            cache.get(&meta()),
            Err(CacheError::SignatureMismatch)
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        assert!(matches!(cache.get(&meta()), Err(CacheError::Io(_))));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let path = dir.path().join(utils::format_filename(&meta()));
        fs::write(&path, b"lrcd\x00").unwrap();
        assert!(matches!(cache.get(&meta()), Err(CacheError::Truncated)));
    }

    #[test]
    fn empty_lyrics_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let written = Lyrics {
            lines: Vec::new(),
            source: "kugou".to_string(),
        };
        cache.set(&meta(), &written).unwrap();
        let read = cache.get(&meta()).unwrap();
        assert_eq!(read, written);
    }
}
