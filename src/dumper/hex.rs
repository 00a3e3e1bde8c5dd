//! Raw hex dumper used for protocols without a structured parser.

use std::fmt::Write;

use tracing::{trace, Span};

use super::{Direction, DumpValue, Dumper};

const BYTES_PER_LINE: usize = 16;

pub struct HexDumper {
    span: Span,
}

impl HexDumper {
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl Dumper for HexDumper {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn read_persistent_values(&self, _buf: &[u8]) -> Vec<DumpValue> {
        Vec::new()
    }

    fn read(&self, buf: &[u8]) -> Vec<DumpValue> {
        trace!(parent: &self.span, len = buf.len(), "rendering hex dump");
        vec![DumpValue::new("hex", hex_dump(buf))]
    }

    fn dumps_direction(&self, _direction: Direction) -> bool {
        true
    }
}

/// Renders `buf` in the canonical `hexdump -C` layout:
///
/// ```text
/// 00000000  51 00 00 00 19 53 45 4c  45 43 54 20 2a 20 46 52  |Q....SELECT * FR|
/// ```
///
/// Every line ends with a newline; an empty buffer renders as an empty string.
pub fn hex_dump(buf: &[u8]) -> String {
    let lines = buf.len().div_ceil(BYTES_PER_LINE);
    let mut out = String::with_capacity(lines * 79);

    for (index, chunk) in buf.chunks(BYTES_PER_LINE).enumerate() {
        // Writing into a String cannot fail.
        let _ = write!(out, "{:08x}  ", index * BYTES_PER_LINE);
        for column in 0..BYTES_PER_LINE {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if (0x20..=0x7e).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line() {
        let buf = b"Q\x00\x00\x00\x19SELECT * FROM users;\x00";
        assert_eq!(
            hex_dump(buf),
            "00000000  51 00 00 00 19 53 45 4c  45 43 54 20 2a 20 46 52  |Q....SELECT * FR|\n\
             00000010  4f 4d 20 75 73 65 72 73  3b 00                    |OM users;.|\n"
        );
    }

    #[test]
    fn test_short_line_is_padded() {
        assert_eq!(
            hex_dump(b"abc"),
            "00000000  61 62 63                                          |abc|\n"
        );
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(hex_dump(&[]), "");
        let dumper = HexDumper::new(Span::none());
        assert_eq!(dumper.read(&[]), vec![DumpValue::new("hex", "")]);
    }

    #[test]
    fn test_lines_have_fixed_width() {
        let buf: Vec<u8> = (0..=255).collect();
        let dump = hex_dump(&buf);
        assert_eq!(dump.lines().count(), 16);
        assert!(dump.lines().all(|line| line.len() == 78));
        assert!(dump.lines().last().unwrap().starts_with("000000f0  f0 f1"));
    }

    #[test]
    fn test_hex_dumper_contract() {
        let dumper = HexDumper::new(Span::none());
        let buf = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(dumper.read(&buf), vec![DumpValue::new("hex", hex_dump(&buf))]);
        assert!(dumper.read_persistent_values(&buf).is_empty());
        assert!(dumper.dumps_direction(Direction::RemoteToClient));
        assert!(dumper.dumps_direction(Direction::Unknown));
    }
}
