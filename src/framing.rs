//! Length-prefixed message framing for the IDE-mode protocol.
//!
//! Every message on the wire, in either direction, is a fixed-width
//! hexadecimal byte count followed by an S-expression body:
//!
//! ```text
//! 000021(:return (:ok "0") 2)\n
//! ```
//!
//! The header is exactly six lowercase hex characters (`000021` = 33 bytes
//! of body). The tool process writes replies back-to-back, so a single read
//! may carry several frames, or a fraction of one; [`FrameReader`]
//! accumulates chunks and hands back only complete bodies.

use tracing::debug;

/// Width of the hexadecimal length header, in bytes.
pub const HEADER_LEN: usize = 6;

/// Maximum body size (16MB) to catch a corrupted header before it turns
/// into an unbounded buffer.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

use crate::parser::ProtocolError;

/// Prepend the six-character hex length header to a message body.
///
/// The length counts bytes, not characters, so multi-byte identifiers in
/// request arguments are framed correctly.
pub fn frame(body: &str) -> String {
    format!("{:06x}{}", body.len(), body)
}

/// Stateful extractor of complete message bodies from a chunked byte stream.
///
/// The reader is either accumulating (waiting for enough bytes to complete
/// the frame announced by the current header) or idle; a single growable
/// buffer of unconsumed bytes is the only state. Chunks may split frames at
/// any byte offset, including inside the header or inside a multi-byte
/// UTF-8 sequence.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    closed: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader::default()
    }

    /// Stop extracting frames; every subsequent chunk is discarded.
    ///
    /// On termination the tool process can emit non-protocol diagnostic
    /// text on the same stream, which must not reach the parser.
    pub fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append a chunk and drain every complete frame it makes available.
    ///
    /// Returns the bodies in arrival order, trimmed of the surrounding
    /// whitespace (the trailing `\n` in particular). Draining the full
    /// batch here, rather than one frame per call, keeps the loop
    /// exhaustive even when handling one body synchronously produces
    /// another before the caller returns.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolError> {
        if self.closed {
            debug!(len = chunk.len(), "frame reader closed, discarding chunk");
            return Ok(Vec::new());
        }

        self.buffer.extend_from_slice(chunk);
        // Line-ending normalization: replies routed through files pick up
        // \r\n endings that the header length does not account for.
        if self.buffer.contains(&b'\r') {
            normalize_crlf(&mut self.buffer);
        }

        let mut bodies = Vec::new();
        loop {
            if self.buffer.len() <= HEADER_LEN {
                break; // wait for the rest of the header
            }
            let header = std::str::from_utf8(&self.buffer[..HEADER_LEN])
                .map_err(|_| ProtocolError::InvalidUtf8)?;
            let body_len =
                usize::from_str_radix(header, 16).map_err(|_| ProtocolError::BadHeader {
                    header: header.to_string(),
                })?;
            if body_len > MAX_BODY_SIZE {
                return Err(ProtocolError::BadHeader {
                    header: header.to_string(),
                });
            }
            let frame_len = HEADER_LEN + body_len;
            if self.buffer.len() < frame_len {
                break; // wait for the rest of the body
            }
            let body = std::str::from_utf8(&self.buffer[HEADER_LEN..frame_len])
                .map_err(|_| ProtocolError::InvalidUtf8)?;
            bodies.push(body.trim().to_string());
            self.buffer.drain(..frame_len);
        }
        Ok(bodies)
    }
}

/// Collapse every `\r\n` pair in place. A lone trailing `\r` is kept; its
/// `\n` may be at the front of the next chunk, and the pair is collapsed
/// once it arrives.
fn normalize_crlf(buffer: &mut Vec<u8>) {
    let mut write = 0;
    let mut read = 0;
    while read < buffer.len() {
        if buffer[read] == b'\r' && buffer.get(read + 1) == Some(&b'\n') {
            read += 1;
            continue;
        }
        buffer[write] = buffer[read];
        write += 1;
        read += 1;
    }
    buffer.truncate(write);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wire(bodies: &[&str]) -> Vec<u8> {
        bodies
            .iter()
            .map(|b| frame(&format!("{}\n", b)))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn test_frame_pads_hex_length_to_six() {
        assert_eq!(frame("(:version 1)\n"), "00000d(:version 1)\n");
        let long = "x".repeat(0x123);
        assert_eq!(&frame(&long)[..HEADER_LEN], "000123");
    }

    #[test]
    fn test_frame_counts_bytes_not_chars() {
        // '→' is three bytes in UTF-8.
        assert_eq!(&frame("→")[..HEADER_LEN], "000003");
    }

    #[test]
    fn test_single_complete_frame() {
        let mut reader = FrameReader::new();
        let bodies = reader.push(&wire(&[r#"(:return (:ok "0") 2)"#])).unwrap();
        assert_eq!(bodies, vec![r#"(:return (:ok "0") 2)"#.to_string()]);
    }

    #[test]
    fn test_header_is_parsed_as_hex() {
        let mut reader = FrameReader::new();
        let input = b"000016(:return (:ok \"0\") 2)\n";
        assert_eq!(input.len() - HEADER_LEN, 0x16);
        let bodies = reader.push(input).unwrap();
        assert_eq!(bodies, vec![r#"(:return (:ok "0") 2)"#.to_string()]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut reader = FrameReader::new();
        let bodies = reader
            .push(&wire(&["(:set-prompt \"Main\" 1)", "(:return (:ok ()) 1)"]))
            .unwrap();
        assert_eq!(
            bodies,
            vec![
                "(:set-prompt \"Main\" 1)".to_string(),
                "(:return (:ok ()) 1)".to_string(),
            ]
        );
    }

    #[test]
    fn test_partial_header_then_rest() {
        let mut reader = FrameReader::new();
        let stream = wire(&["(:return (:ok 2) 7)"]);
        assert_eq!(reader.push(&stream[..3]).unwrap(), Vec::<String>::new());
        assert_eq!(
            reader.push(&stream[3..]).unwrap(),
            vec!["(:return (:ok 2) 7)".to_string()]
        );
    }

    #[test]
    fn test_every_split_offset_yields_the_same_bodies() {
        let stream = wire(&[
            "(:write-string \"compiling\" 3)",
            r#"(:return (:ok "Nat → Nat" ()) 3)"#,
            "(:return (:ok ()) 4)",
        ]);
        let expected = {
            let mut reader = FrameReader::new();
            reader.push(&stream).unwrap()
        };
        assert_eq!(expected.len(), 3);

        for split in 0..=stream.len() {
            let mut reader = FrameReader::new();
            let mut bodies = reader.push(&stream[..split]).unwrap();
            bodies.extend(reader.push(&stream[split..]).unwrap());
            assert_eq!(bodies, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let stream = wire(&["(:return (:ok \"→\") 1)", "(:return (:ok ()) 2)"]);
        let mut reader = FrameReader::new();
        let mut bodies = Vec::new();
        for byte in &stream {
            bodies.extend(reader.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(
            bodies,
            vec![
                "(:return (:ok \"→\") 1)".to_string(),
                "(:return (:ok ()) 2)".to_string(),
            ]
        );
    }

    #[test]
    fn test_crlf_normalized_even_when_split_across_chunks() {
        // The declared length counts "\n", but file-routed replies arrive
        // with "\r\n"; the pair must collapse before the length check, even
        // when the two bytes land in different chunks.
        let declared = frame("(:ok \"a\nb\")\n");
        let inflated = declared.replace('\n', "\r\n").into_bytes();
        let split = inflated.iter().position(|&b| b == b'\r').unwrap() + 1;

        let mut reader = FrameReader::new();
        assert_eq!(
            reader.push(&inflated[..split]).unwrap(),
            Vec::<String>::new()
        );
        let bodies = reader.push(&inflated[split..]).unwrap();
        assert_eq!(bodies, vec!["(:ok \"a\nb\")".to_string()]);
    }

    #[test]
    fn test_bad_header_is_fatal() {
        let mut reader = FrameReader::new();
        let err = reader.push(b"zzzzzz(:ok)\n").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BadHeader {
                header: "zzzzzz".to_string()
            }
        );
    }

    #[test]
    fn test_closed_reader_discards_everything() {
        let mut reader = FrameReader::new();
        reader.close();
        // Non-protocol noise after process death must not reach the parser.
        let bodies = reader.push(b"idris2: internal error: goodbye\n").unwrap();
        assert_eq!(bodies, Vec::<String>::new());
        assert!(reader.is_closed());
    }
}
