//! JEDEC fuse map reader
//!
//! A `.jed` file is a text file: a free-form header, then one or more fuse
//! fields. Each field starts with an `L<address>` line followed by lines of
//! `0`/`1` characters and ends with `*`. The programming flows consume the
//! fuse data as fixed-width rows, so this reader hands out rows of a caller
//! chosen bit count and steps from one fuse field into the next on its own.
//!
//! Line breaks (CR and LF) inside the fuse data are ignored. Any other
//! character is an error, since shifting a guessed row into a device is
//! worse than refusing the file.
//!
//! Bits left in a field after a complete row start the next row. Rows never
//! continue across a `*`: if the field ends before that next row is
//! complete, the read fails with [`JedError::ShortRow`].

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::Path;

use crate::bits::BitBuffer;
use crate::error::JedError;

/// Byte source a [`JedReader`] can decode from
pub trait JedSource: BufRead + Seek {}

impl<T: BufRead + Seek> JedSource for T {}

/// Sequential row reader over a JED fuse map
pub struct JedReader {
    src: Box<dyn JedSource>,
    header_skipped: bool,
    row: u32,
}

impl JedReader {
    /// Open a `.jed` file
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }

    /// Read from any seekable buffered source
    pub fn new<S: JedSource + 'static>(src: S) -> Self {
        Self {
            src: Box::new(src),
            header_skipped: false,
            row: 0,
        }
    }

    /// Read from an in-memory copy of a file
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(data.into()))
    }

    /// Number of rows decoded since the last rewind
    pub fn rows_read(&self) -> u32 {
        self.row
    }

    /// Skip the header up to and including the first `L` line
    ///
    /// Reaching the end of the file here is not an error; the next row read
    /// reports it.
    pub fn skip_header(&mut self) -> Result<(), JedError> {
        self.skip_to_fuse_field()?;
        self.header_skipped = true;
        Ok(())
    }

    /// Decode the next row of `bit_count` bits
    pub fn next_row(&mut self, bit_count: u32) -> Result<BitBuffer, JedError> {
        match self.next_row_opt(bit_count)? {
            Some(row) => Ok(row),
            None => Err(JedError::UnexpectedEof {
                row: self.row,
                bit: 0,
                expected: bit_count,
            }),
        }
    }

    /// Decode the next row, or `None` if the file holds no further fuse data
    ///
    /// A file that ends in the middle of a row is still an error.
    pub fn next_row_opt(&mut self, bit_count: u32) -> Result<Option<BitBuffer>, JedError> {
        if !self.header_skipped {
            self.skip_header()?;
        }

        let mut row = BitBuffer::new();
        while row.len() < bit_count as usize {
            let Some(byte) = self.next_byte()? else {
                if row.is_empty() {
                    return Ok(None);
                }
                return Err(JedError::UnexpectedEof {
                    row: self.row,
                    bit: row.len() as u32,
                    expected: bit_count,
                });
            };
            match byte {
                b'0' => row.push(false),
                b'1' => row.push(true),
                b'\r' | b'\n' => {}
                b'*' if row.is_empty() => {
                    log::trace!("jed: end of fuse field before row {}", self.row);
                    if !self.skip_to_fuse_field()? {
                        return Ok(None);
                    }
                }
                b'*' => {
                    return Err(JedError::ShortRow {
                        row: self.row,
                        found: row.len() as u32,
                        expected: bit_count,
                    })
                }
                byte => {
                    return Err(JedError::UnexpectedByte {
                        byte,
                        row: self.row,
                        bit: row.len() as u32,
                    })
                }
            }
        }

        self.row += 1;
        Ok(Some(row))
    }

    /// Go back to the first row
    pub fn rewind(&mut self) -> Result<(), JedError> {
        self.src.seek(SeekFrom::Start(0))?;
        self.row = 0;
        self.skip_header()
    }

    fn next_byte(&mut self) -> Result<Option<u8>, JedError> {
        let buf = self.src.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.src.consume(1);
        Ok(Some(byte))
    }

    /// Consume lines up to and including the next one starting with `L`
    ///
    /// Returns `false` if the file ends first.
    fn skip_to_fuse_field(&mut self) -> Result<bool, JedError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.src.read_until(b'\n', &mut line)? == 0 {
                return Ok(false);
            }
            if line.first() == Some(&b'L') {
                log::trace!("jed: fuse field {}", String::from_utf8_lossy(&line).trim_end());
                return Ok(true);
            }
        }
    }
}

impl std::fmt::Debug for JedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JedReader")
            .field("header_skipped", &self.header_skipped)
            .field("row", &self.row)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\x02NOTE Diamond generated*\r\n\
QP100*\r\n\
QF2000*\r\n\
G0*\r\n\
F0*\r\n\
L000000\r\n\
10000000\r\n\
01000000*\r\n\
L000016\r\n\
00100000\r\n\
00010000\r\n\
*\r\n\
NOTE END CONFIG DATA*\r\n\
E0000000000000000*\r\n\
C1234*\r\n\
\x030000\r\n";

    #[test]
    fn test_rows_span_lines_and_fields() {
        let mut jed = JedReader::from_bytes(SAMPLE);
        assert_eq!(jed.next_row(8).unwrap().to_u32(), 0x01);
        assert_eq!(jed.next_row(8).unwrap().to_u32(), 0x02);
        assert_eq!(jed.next_row(8).unwrap().to_u32(), 0x04);
        assert_eq!(jed.next_row(8).unwrap().to_u32(), 0x08);
        assert_eq!(jed.rows_read(), 4);
        assert!(jed.next_row_opt(8).unwrap().is_none());
    }

    #[test]
    fn test_row_ignores_line_breaks() {
        let mut jed = JedReader::from_bytes("L0\n1\r\n1\n\n0\r1*\n");
        let row = jed.next_row(4).unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row.to_u32(), 0b1011);
    }

    #[test]
    fn test_row_wider_than_line() {
        let mut jed = JedReader::from_bytes(SAMPLE);
        let row = jed.next_row(16).unwrap();
        assert_eq!(row.to_u32(), 0x0201);
    }

    #[test]
    fn test_unexpected_byte_keeps_row_cursor() {
        let mut jed = JedReader::from_bytes("L0\n1111\n11x1\n");
        jed.next_row(4).unwrap();
        match jed.next_row(4) {
            Err(JedError::UnexpectedByte { byte, row, bit }) => {
                assert_eq!(byte, b'x');
                assert_eq!(row, 1);
                assert_eq!(bit, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(jed.rows_read(), 1);
    }

    #[test]
    fn test_short_row() {
        let mut jed = JedReader::from_bytes("L0\n101*\n");
        assert!(matches!(
            jed.next_row(4),
            Err(JedError::ShortRow {
                row: 0,
                found: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn test_leftover_bits_before_field_end() {
        let mut jed = JedReader::from_bytes("L0\n10110*\n");
        assert_eq!(jed.next_row(4).unwrap().to_u32(), 0b1101);
        assert!(matches!(
            jed.next_row_opt(4),
            Err(JedError::ShortRow {
                row: 1,
                found: 1,
                expected: 4
            })
        ));
        assert_eq!(jed.rows_read(), 1);
    }

    #[test]
    fn test_premature_eof() {
        let mut jed = JedReader::from_bytes("L0\n101");
        assert!(matches!(
            jed.next_row(4),
            Err(JedError::UnexpectedEof { row: 0, bit: 3, .. })
        ));

        let mut jed = JedReader::from_bytes("NOTE no fuses*\n");
        assert!(matches!(
            jed.next_row(4),
            Err(JedError::UnexpectedEof { bit: 0, .. })
        ));
    }

    #[test]
    fn test_rewind() {
        let mut jed = JedReader::from_bytes(SAMPLE);
        let first = jed.next_row(8).unwrap();
        jed.next_row(8).unwrap();
        jed.rewind().unwrap();
        assert_eq!(jed.rows_read(), 0);
        assert_eq!(jed.next_row(8).unwrap(), first);
    }

    #[test]
    fn test_header_lines_starting_with_l_only() {
        // "QF" and "NOTE" lines must not be taken for a fuse field
        let mut jed = JedReader::from_bytes("NOTE Lattice*\nQF8*\nL0000\n11110000*\n");
        assert_eq!(jed.next_row(8).unwrap().to_u32(), 0x0F);
    }
}
