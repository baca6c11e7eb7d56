//! Newline line framing
//!
//! Wire format: UTF-8 text, one line per `\n`. Trailing `\r` and whitespace
//! are trimmed from each line. Line length is not limited here.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Line separator used when writing
pub const LINE_SEPARATOR: &str = "\r\n";

/// Splits a byte stream into trimmed lines
///
/// The partial tail of the buffer stays in place until the next chunk
/// completes it.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Bytes of the buffer already scanned without finding `\n`
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.min(src.len());
        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let line_bytes = src.split_to(start + offset);
                src.advance(1);
                self.scanned = 0;
                Ok(Some(to_line(&line_bytes)))
            }
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // An unterminated tail at EOF is not a line
        if !src.is_empty() {
            tracing::debug!(bytes = src.len(), "Discarding unterminated line at EOF");
            src.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

impl Encoder<&str> for LineFramer {
    type Error = std::io::Error;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + LINE_SEPARATOR.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(LINE_SEPARATOR.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut LineFramer, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = framer.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_complete_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from("TASSERVER 0.38 * 8201 0\r\nPING\n");
        assert_eq!(drain(&mut framer, &mut buf), vec!["TASSERVER 0.38 * 8201 0", "PING"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_stays_buffered() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from("ACCEP");
        assert!(framer.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"TED bot\r\nJOIN");
        assert_eq!(drain(&mut framer, &mut buf), vec!["ACCEPTED bot"]);
        assert_eq!(&buf[..], b"JOIN");
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let input = b":a!b@c SAID main a hello world \r\nPONG\r\n\r\nJOINED main bob\nMOTD hi\r\n";

        let mut whole = BytesMut::from(&input[..]);
        let expected = drain(&mut LineFramer::new(), &mut whole);
        assert_eq!(expected.len(), 5);

        for chunk_size in 1..input.len() {
            let mut framer = LineFramer::new();
            let mut buf = BytesMut::new();
            let mut lines = Vec::new();
            for chunk in input.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                lines.extend(drain(&mut framer, &mut buf));
            }
            assert_eq!(lines, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from("SAY main hi \t\r\n");
        assert_eq!(drain(&mut framer, &mut buf), vec!["SAY main hi"]);
    }

    #[test]
    fn test_eof_discards_unterminated_tail() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from("PING\nHALF");
        assert_eq!(framer.decode_eof(&mut buf).unwrap().as_deref(), Some("PING"));
        assert!(framer.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_appends_separator() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::new();
        framer.encode("PING", &mut buf).unwrap();
        assert_eq!(&buf[..], b"PING\r\n");
    }
}
