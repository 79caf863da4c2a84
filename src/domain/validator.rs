//! Upload checks run before any file is persisted or transcoded.

use std::io::{self, SeekFrom};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// 10 GiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Bytes inspected when sniffing the media type.
pub const SNIFF_LEN: usize = 1024;

/// Sniffed media types accepted for transcoding, with their usual extension.
pub const ALLOWED_TYPES: [(&str, &str); 6] = [
    ("video/mp4", ".mp4"),
    ("video/mpeg", ".mpeg"),
    ("video/quicktime", ".mov"),
    ("video/x-msvideo", ".avi"),
    ("video/x-matroska", ".mkv"),
    ("video/webm", ".webm"),
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("File size must be no more than {:.1}GB (got {size} bytes)", gib(.max))]
    Oversized { size: u64, max: u64 },
    #[error("Unsupported file type {mime}. Allowed types: {}", allowed_extensions())]
    UnsupportedType { mime: String },
    #[error("Could not read upload: {0}")]
    Io(#[from] io::Error),
}

fn gib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn allowed_extensions() -> String {
    ALLOWED_TYPES
        .iter()
        .map(|(_, ext)| *ext)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy)]
pub struct VideoValidator {
    max_size: u64,
}

impl Default for VideoValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl VideoValidator {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Check the declared size, then sniff the content. Returns the sniffed
    /// media type. The reader is rewound to its start whenever it was read.
    pub async fn validate<R>(
        &self,
        reader: &mut R,
        declared_size: u64,
    ) -> Result<&'static str, ValidationError>
    where
        R: AsyncRead + AsyncSeek + Unpin + ?Sized,
    {
        if declared_size > self.max_size {
            return Err(ValidationError::Oversized {
                size: declared_size,
                max: self.max_size,
            });
        }

        let prefix = read_prefix(reader).await;
        let rewind = reader.seek(SeekFrom::Start(0)).await;
        let prefix = prefix?;
        rewind?;

        let mime = sniff_mime(&prefix);
        ALLOWED_TYPES
            .iter()
            .find(|(allowed, _)| *allowed == mime)
            .map(|(allowed, _)| *allowed)
            .ok_or_else(|| ValidationError::UnsupportedType {
                mime: mime.to_string(),
            })
    }
}

async fn read_prefix<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Media type of a content prefix, ignoring any file name.
pub fn sniff_mime(prefix: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type();
    }
    if prefix.is_empty() {
        "application/x-empty"
    } else if std::str::from_utf8(prefix).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Minimal ISO BMFF header: an `ftyp` box with the `isom` brand.
    fn mp4_prefix() -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x00, 0x18];
        data.extend_from_slice(b"ftypisom");
        data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        data.extend_from_slice(b"isomiso2");
        data.extend_from_slice(&[0u8; 64]);
        data
    }

    fn webm_prefix() -> Vec<u8> {
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01];
        data.extend_from_slice(&[0x42, 0x82, 0x84]);
        data.extend_from_slice(b"webm");
        data.extend_from_slice(&[0u8; 32]);
        data
    }

    /// Panics if anything tries to read from it.
    struct Untouchable;

    impl AsyncRead for Untouchable {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            panic!("oversized uploads must be rejected without reading");
        }
    }

    impl AsyncSeek for Untouchable {
        fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
            panic!("oversized uploads must be rejected without seeking");
        }

        fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Poll::Ready(Ok(0))
        }
    }

    #[tokio::test]
    async fn test_accepts_mp4() {
        let data = mp4_prefix();
        let mut cursor = Cursor::new(data.clone());
        let mime = VideoValidator::default()
            .validate(&mut cursor, data.len() as u64)
            .await
            .unwrap();
        assert_eq!(mime, "video/mp4");
        assert_eq!(cursor.position(), 0);
    }

    #[tokio::test]
    async fn test_accepts_webm() {
        let data = webm_prefix();
        let mut cursor = Cursor::new(data.clone());
        let mime = VideoValidator::default()
            .validate(&mut cursor, data.len() as u64)
            .await
            .unwrap();
        assert_eq!(mime, "video/webm");
    }

    #[tokio::test]
    async fn test_rejects_text_named_like_video() {
        // The name would say movie.mp4; only the content matters.
        let data = b"this is definitely not a movie\n".repeat(64);
        let mut cursor = Cursor::new(data.clone());
        let err = VideoValidator::default()
            .validate(&mut cursor, data.len() as u64)
            .await
            .unwrap_err();
        match err {
            ValidationError::UnsupportedType { mime } => assert_eq!(mime, "text/plain"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(cursor.position(), 0);
    }

    #[tokio::test]
    async fn test_rejects_oversized_without_reading() {
        let eleven_gib = 11 * 1024 * 1024 * 1024;
        let err = VideoValidator::default()
            .validate(&mut Untouchable, eleven_gib)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Oversized { size, .. } if size == eleven_gib));
    }

    #[tokio::test]
    async fn test_custom_limit() {
        let data = mp4_prefix();
        let mut cursor = Cursor::new(data.clone());
        let err = VideoValidator::new(10)
            .validate(&mut cursor, data.len() as u64)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Oversized { max: 10, .. }));
    }

    #[test]
    fn test_sniff_fallbacks() {
        assert_eq!(sniff_mime(b""), "application/x-empty");
        assert_eq!(sniff_mime(b"plain words"), "text/plain");
        assert_eq!(sniff_mime(&[0x81, 0x99, 0xfe, 0x07]), "application/octet-stream");
    }
}
