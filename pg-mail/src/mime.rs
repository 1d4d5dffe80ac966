//! The MIME envelope around sealed mail.
//!
//! [`MimeEncoder`] is a streaming transform: it wraps an opaque ciphertext stream into a
//! `multipart/mixed` body without holding the whole payload. Input is collected in a buffer
//! of [`BUF_BYTES`] (16 lines of 57 bytes). Because that size is a multiple of three, base64
//! groups never straddle two buffers and padding can only occur at the very end, so the output
//! does not depend on how the input was chunked.

use base64ct::{Base64, Encoding};
use rand::RngCore;

use crate::consts::*;
use crate::error::Error;

const CRLF: &str = "\r\n";

/// A plaintext/HTML alternative composed alongside the sealed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    /// The plain text version.
    pub plain: String,
    /// The HTML version.
    pub html: String,
}

/// Which parts the envelope carries next to the encrypted part.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOptions {
    /// A fixed boundary, a random one is generated otherwise.
    pub boundary: Option<String>,
    /// Add a human-readable part for clients that cannot unseal.
    pub fallback: bool,
    /// Add an alternative part.
    pub alternative: Option<Alternative>,
}

/// Streaming base64 MIME encoder for the encrypted part.
#[derive(Debug)]
pub struct MimeEncoder {
    boundary: String,
    options: EnvelopeOptions,
    buf: Vec<u8>,
}

fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("postguard-{}", hex::encode(bytes))
}

// Encodes full lines of `LINE_BYTES` and a possibly shorter last line, each followed by CRLF.
fn encode_lines(data: &[u8], out: &mut String) {
    for line in data.chunks(LINE_BYTES) {
        out.push_str(&Base64::encode_string(line));
        out.push_str(CRLF);
    }
}

impl MimeEncoder {
    /// Create a new encoder.
    pub fn new(mut options: EnvelopeOptions) -> Self {
        let boundary = options.boundary.take().unwrap_or_else(random_boundary);

        MimeEncoder {
            boundary,
            options,
            buf: Vec::with_capacity(BUF_BYTES),
        }
    }

    /// The multipart boundary.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value of the outer `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.boundary)
    }

    /// The envelope up to and including the headers of the encrypted part.
    pub fn start(&mut self) -> String {
        let b = &self.boundary;
        let mut out = String::new();

        out.push_str(&format!("MIME-Version: 1.0{CRLF}"));
        out.push_str(&format!("Content-Type: {}{CRLF}", self.content_type()));
        out.push_str(CRLF);

        if self.options.fallback {
            out.push_str(&format!("--{b}{CRLF}"));
            out.push_str(&format!("Content-Type: text/plain; charset=utf-8{CRLF}"));
            out.push_str(&format!("Content-Transfer-Encoding: 7bit{CRLF}"));
            out.push_str(CRLF);
            out.push_str(&format!("{FALLBACK_TEXT}{CRLF}"));
        }

        if let Some(alt) = &self.options.alternative {
            let ab = format!("{b}-alt");

            out.push_str(&format!("--{b}{CRLF}"));
            out.push_str(&format!(
                "Content-Type: multipart/alternative; boundary=\"{ab}\"{CRLF}"
            ));
            out.push_str(CRLF);

            for (subtype, body) in [("plain", &alt.plain), ("html", &alt.html)] {
                out.push_str(&format!("--{ab}{CRLF}"));
                out.push_str(&format!("Content-Type: text/{subtype}; charset=utf-8{CRLF}"));
                out.push_str(&format!("Content-Transfer-Encoding: 8bit{CRLF}"));
                out.push_str(CRLF);
                out.push_str(body);
                out.push_str(CRLF);
            }

            out.push_str(&format!("--{ab}--{CRLF}"));
        }

        out.push_str(&format!("--{b}{CRLF}"));
        out.push_str(&format!(
            "Content-Type: {CONTENT_TYPE}; name=\"{ATTACHMENT_NAME}\"{CRLF}"
        ));
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{ATTACHMENT_NAME}\"{CRLF}"
        ));
        out.push_str(&format!("Content-Transfer-Encoding: base64{CRLF}"));
        out.push_str(CRLF);

        out
    }

    /// Consume a chunk of ciphertext, returning the lines of every buffer it filled.
    pub fn transform(&mut self, mut chunk: &[u8]) -> String {
        let mut out = String::new();

        while !chunk.is_empty() {
            let rem = BUF_BYTES - self.buf.len();
            let take = rem.min(chunk.len());

            self.buf.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];

            if self.buf.len() == BUF_BYTES {
                encode_lines(&self.buf, &mut out);
                self.buf.clear();
            }
        }

        out
    }

    /// Encode what is left in the buffer and close the envelope.
    pub fn flush(&mut self) -> String {
        let mut out = String::new();

        encode_lines(&self.buf, &mut out);
        self.buf.clear();

        out.push_str(&format!("--{}--{CRLF}", self.boundary));

        out
    }
}

/// Whether a message is sealed, judging by its attachments.
///
/// A sealed message has exactly one attachment: the encrypted part.
pub fn is_sealed<S: AsRef<str>>(attachment_names: &[S]) -> bool {
    matches!(attachment_names, [name] if name.as_ref() == ATTACHMENT_NAME)
}

/// Find the encrypted part of an envelope and decode it.
pub fn extract_encrypted(envelope: &str) -> Result<Vec<u8>, Error> {
    let content_type = format!("content-type: {CONTENT_TYPE}");
    let mut lines = envelope.lines();

    lines
        .by_ref()
        .find(|l| l.to_ascii_lowercase().starts_with(&content_type))
        .ok_or_else(|| Error::FormatViolation("encrypted part".to_string()))?;

    // Skip the remaining part headers.
    lines.by_ref().find(|l| l.is_empty());

    let encoded: String = lines
        .take_while(|l| !l.starts_with("--"))
        .flat_map(|l| l.chars().filter(|c| !c.is_ascii_whitespace()))
        .collect();

    Base64::decode_vec(&encoded).map_err(|_e| Error::FormatViolation("base64".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn fixed() -> EnvelopeOptions {
        EnvelopeOptions {
            boundary: Some("b".to_string()),
            ..Default::default()
        }
    }

    fn encode_chunked(data: &[u8], chunk_size: usize) -> String {
        let mut enc = MimeEncoder::new(fixed());
        let mut out = enc.start();
        for chunk in data.chunks(chunk_size) {
            out.push_str(&enc.transform(chunk));
        }
        out.push_str(&enc.flush());
        out
    }

    fn rand_vec(length: usize) -> Vec<u8> {
        let mut vec = vec![0u8; length];
        rand::thread_rng().fill_bytes(&mut vec);
        vec
    }

    #[test]
    fn test_chunking_does_not_matter() {
        let data = rand_vec(3 * BUF_BYTES + 100);

        let whole = encode_chunked(&data, data.len());
        assert_eq!(whole, encode_chunked(&data, 1));
        assert_eq!(whole, encode_chunked(&data, 7));
        assert_eq!(whole, encode_chunked(&data, BUF_BYTES));

        assert_eq!(extract_encrypted(&whole).unwrap(), data);
    }

    #[test]
    fn test_line_width() {
        for len in [1, 56, 57, 58, BUF_BYTES - 1, BUF_BYTES, BUF_BYTES + 1, 5 * BUF_BYTES] {
            let data = rand_vec(len);
            let env = encode_chunked(&data, 100);

            let body_start = env.find("base64\r\n\r\n").unwrap() + "base64\r\n\r\n".len();
            let body_end = env.rfind("--b--").unwrap();
            let body = &env[body_start..body_end];

            assert!(body.ends_with("\r\n"));
            let lines: Vec<&str> = body.split_terminator("\r\n").collect();
            let (last, full) = lines.split_last().unwrap();

            assert!(full.iter().all(|l| l.len() == LINE_CHARS));
            assert!(!last.is_empty() && last.len() <= LINE_CHARS);

            // Padding only ever at the end.
            assert!(full.iter().all(|l| !l.contains('=')));

            assert_eq!(extract_encrypted(&env).unwrap(), data);
        }
    }

    #[test]
    fn test_transform_emits_full_buffers_only() {
        let mut enc = MimeEncoder::new(fixed());
        assert_eq!(enc.transform(&[0u8; BUF_BYTES - 1]), "");

        let block = enc.transform(&[0u8; 2]);
        assert_eq!(block.len(), BUF_LINES * (LINE_CHARS + 2));
        assert!(block.ends_with("\r\n"));

        assert_eq!(enc.flush(), "AA==\r\n--b--\r\n");
    }

    #[test]
    fn test_envelope_headers() {
        let mut enc = MimeEncoder::new(EnvelopeOptions {
            boundary: Some("b".to_string()),
            fallback: true,
            alternative: Some(Alternative {
                plain: "hi".to_string(),
                html: "<p>hi</p>".to_string(),
            }),
        });

        let start = enc.start();
        assert!(start.starts_with(
            "MIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"b\"\r\n\r\n--b\r\n"
        ));
        assert!(start.contains(FALLBACK_TEXT));
        assert!(start.contains("--b-alt\r\nContent-Type: text/html"));
        assert!(start.ends_with(
            "--b\r\nContent-Type: application/postguard; name=\"postguard.encrypted\"\r\n\
             Content-Disposition: attachment; filename=\"postguard.encrypted\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n"
        ));

        let mut env = start;
        env.push_str(&enc.transform(b"hello"));
        env.push_str(&enc.flush());
        assert_eq!(extract_encrypted(&env).unwrap(), b"hello");
    }

    #[test]
    fn test_random_boundary() {
        let a = MimeEncoder::new(EnvelopeOptions::default());
        let b = MimeEncoder::new(EnvelopeOptions::default());
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn test_is_sealed() {
        assert!(is_sealed(&["postguard.encrypted"]));
        assert!(!is_sealed(&["postguard.encrypted", "other.pdf"]));
        assert!(!is_sealed::<&str>(&[]));
        assert!(!is_sealed(&["invoice.pdf"]));
    }

    #[test]
    fn test_extract_missing_part() {
        assert!(matches!(
            extract_encrypted("Content-Type: text/plain\r\n\r\nhi\r\n"),
            Err(Error::FormatViolation(_))
        ));
    }
}
