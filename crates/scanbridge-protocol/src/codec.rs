//! Tokio codec for scanner barcode lines.
//!
//! Scanners emit one barcode per line, terminated by CR LF. [`BarcodeCodec`]
//! frames that byte stream for `tokio_util::codec::Framed`:
//!
//! ```text
//! TCP Stream -> Decoder -> Barcode (normalized, empty lines skipped)
//! Barcode -> Encoder -> barcode bytes + CR LF
//! ```
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use scanbridge_protocol::BarcodeCodec;
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> scanbridge_core::Result<()> {
//! let stream = TcpStream::connect("10.0.0.5:2001").await?;
//! let mut lines = Framed::new(stream, BarcodeCodec::new());
//!
//! while let Some(barcode) = lines.next().await {
//!     println!("Scanned: {}", barcode?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Line length limit
//!
//! A peer that never sends a terminator would grow the read buffer without
//! bound. Once more than `max_line_length` bytes are buffered without a CR LF
//! the decoder fails with `Error::LineTooLong`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use scanbridge_core::constants::{LINE_TERMINATOR, MAX_LINE_LENGTH};
use scanbridge_core::{Barcode, Error, Result};

/// CR LF line codec producing normalized barcodes.
#[derive(Debug, Clone)]
pub struct BarcodeCodec {
    /// Buffer offset already searched for a terminator.
    next_index: usize,

    max_line_length: usize,
}

impl BarcodeCodec {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Codec that rejects lines longer than `max_line_length` bytes.
    ///
    /// ```
    /// use scanbridge_protocol::BarcodeCodec;
    ///
    /// let codec = BarcodeCodec::with_max_line_length(256);
    /// assert_eq!(codec.max_line_length(), 256);
    /// ```
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            next_index: 0,
            max_line_length,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    fn find_terminator(&self, src: &BytesMut) -> Option<usize> {
        // Step back one byte so a CR at the end of the previous read still pairs
        // with an LF arriving now.
        let start = self
            .next_index
            .saturating_sub(LINE_TERMINATOR.len() - 1)
            .min(src.len());
        src[start..]
            .windows(LINE_TERMINATOR.len())
            .position(|window| window == LINE_TERMINATOR)
            .map(|offset| start + offset)
    }
}

impl Default for BarcodeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BarcodeCodec {
    type Item = Barcode;
    type Error = Error;

    /// Decode the next non-empty line.
    ///
    /// Lines that are blank after normalization are consumed and skipped.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Barcode>> {
        loop {
            let Some(end) = self.find_terminator(src) else {
                if src.len() > self.max_line_length {
                    let size = src.len();
                    src.clear();
                    self.next_index = 0;
                    return Err(Error::LineTooLong {
                        size,
                        max_size: self.max_line_length,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            self.next_index = 0;
            let line = src.split_to(end);
            src.advance(LINE_TERMINATOR.len());

            if line.len() > self.max_line_length {
                return Err(Error::LineTooLong {
                    size: line.len(),
                    max_size: self.max_line_length,
                });
            }

            match Barcode::normalize(&line) {
                Some(barcode) => return Ok(Some(barcode)),
                None => trace!("Skipping blank line"),
            }
        }
    }

    /// Flush a final unterminated line when the peer closes the stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Barcode>> {
        if let Some(barcode) = self.decode(src)? {
            return Ok(Some(barcode));
        }
        self.next_index = 0;
        let rest = src.split();
        Ok(Barcode::normalize(&rest))
    }
}

impl Encoder<Barcode> for BarcodeCodec {
    type Error = Error;

    fn encode(&mut self, item: Barcode, dst: &mut BytesMut) -> Result<()> {
        let len = item.as_str().len();
        if len > self.max_line_length {
            return Err(Error::LineTooLong {
                size: len,
                max_size: self.max_line_length,
            });
        }
        dst.reserve(len + LINE_TERMINATOR.len());
        dst.extend_from_slice(item.as_str().as_bytes());
        dst.extend_from_slice(LINE_TERMINATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn decode_all(codec: &mut BarcodeCodec, buffer: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(barcode) = codec.decode(buffer).unwrap() {
            out.push(barcode.to_string());
        }
        out
    }

    #[test]
    fn test_codec_default() {
        assert_eq!(BarcodeCodec::default().max_line_length(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_decode_single_line() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(&b"ABC123\r\n"[..]);
        let barcode = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(barcode.as_str(), "ABC123");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_partial_line() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(&b"ABC"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"123\r\n");
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().as_str(), "ABC123");
    }

    #[test]
    fn test_decode_terminator_split_across_reads() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(&b"ABC123\r"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().as_str(), "ABC123");
    }

    #[rstest]
    #[case(b"A\r\nB\r\nC\r\n".as_slice(), vec!["A", "B", "C"])]
    #[case(b"\r\n  \r\nA\r\n".as_slice(), vec!["A"])]
    #[case(b" X1 \r\nY<2>\r\nrest".as_slice(), vec!["X1", "Y&lt;2&gt;"])]
    #[case(b"LF only\n".as_slice(), vec![])]
    fn test_decode_lines(#[case] input: &[u8], #[case] expected: Vec<&str>) {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(input);
        assert_eq!(decode_all(&mut codec, &mut buffer), expected);
    }

    #[test]
    fn test_bare_lf_does_not_end_line() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(&b"ABC123\n"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"\r\n");
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().as_str(), "ABC123");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_line_too_long() {
        let mut codec = BarcodeCodec::with_max_line_length(8);
        let mut buffer = BytesMut::from(&b"0123456789"[..]);
        let err = codec.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, Error::LineTooLong { size: 10, max_size: 8 }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_eof_flushes_partial_line() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::from(&b"A\r\nTAIL"[..]);
        assert_eq!(codec.decode_eof(&mut buffer).unwrap().unwrap().as_str(), "A");
        assert_eq!(codec.decode_eof(&mut buffer).unwrap().unwrap().as_str(), "TAIL");
        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_encode() {
        let mut codec = BarcodeCodec::new();
        let mut buffer = BytesMut::new();
        codec
            .encode(Barcode::normalize(b"XYZ999").unwrap(), &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..], b"XYZ999\r\n");
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_lines(
            codes in proptest::collection::vec("[A-Z0-9]{1,12}", 1..8),
            split in 0usize..64,
        ) {
            let wire: Vec<u8> = codes.iter().flat_map(|c| format!("{c}\r\n").into_bytes()).collect();
            let split = split.min(wire.len());

            let mut codec = BarcodeCodec::new();
            let mut buffer = BytesMut::from(&wire[..split]);
            let mut decoded = decode_all(&mut codec, &mut buffer);
            buffer.extend_from_slice(&wire[split..]);
            decoded.extend(decode_all(&mut codec, &mut buffer));

            prop_assert_eq!(decoded, codes);
        }
    }
}
