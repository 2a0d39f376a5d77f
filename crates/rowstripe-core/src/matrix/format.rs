//! Plain-text matrix files.
//!
//! ```text
//! <rows> <cols>        or        <size>
//! v v v ...
//! v v v ...
//! ```
//!
//! After the header, elements are whitespace-separated integers in row-major
//! order. Line breaks carry no meaning beyond whitespace, so a paired file
//! that puts a row of A and a row of B on each line reads the same way.

use std::io::{BufRead, Write};
use std::str::FromStr;

use thiserror::Error;

/// Errors while reading a matrix file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },
}

/// Declared dimensions from the first line of a matrix file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// `<size>`
    Square(usize),
    /// `<rows> <cols>`
    Rect { rows: usize, cols: usize },
}

impl Header {
    pub fn rows(&self) -> usize {
        match *self {
            Header::Square(size) => size,
            Header::Rect { rows, .. } => rows,
        }
    }

    pub fn cols(&self) -> usize {
        match *self {
            Header::Square(size) => size,
            Header::Rect { cols, .. } => cols,
        }
    }
}

/// Streaming reader over a matrix file: the header first, then any number of
/// elements at a time, so a loader never holds more than one block.
pub struct MatrixReader<R> {
    input: R,
    line: usize,
    buf: String,
    tokens: std::vec::IntoIter<String>,
}

impl<R: BufRead> MatrixReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buf: String::new(),
            tokens: Vec::new().into_iter(),
        }
    }

    /// Line number of the most recently read line (1-based).
    pub fn line(&self) -> usize {
        self.line
    }

    fn next_line(&mut self) -> Result<bool, ParseError> {
        self.buf.clear();
        if self.input.read_line(&mut self.buf)? == 0 {
            return Ok(false);
        }
        self.line += 1;
        self.tokens = self
            .buf
            .split_whitespace()
            .map(str::to_owned)
            .collect::<Vec<_>>()
            .into_iter();
        Ok(true)
    }

    fn next_token(&mut self) -> Result<Option<String>, ParseError> {
        loop {
            if let Some(token) = self.tokens.next() {
                return Ok(Some(token));
            }
            if !self.next_line()? {
                return Ok(None);
            }
        }
    }

    /// Read the header line. Leading blank lines are skipped.
    pub fn read_header(&mut self) -> Result<Header, ParseError> {
        loop {
            if !self.next_line()? {
                return Err(ParseError::FormatError {
                    line: self.line + 1,
                    message: "Missing matrix header".into(),
                });
            }
            if !self.tokens.as_slice().is_empty() {
                break;
            }
        }

        let fields: Vec<String> = self.tokens.by_ref().collect();
        let line = self.line;
        let dim = |text: &str| {
            text.parse::<usize>().map_err(|_| ParseError::FormatError {
                line,
                message: format!("Invalid dimension: {}", text),
            })
        };
        match fields.as_slice() {
            [size] => Ok(Header::Square(dim(size)?)),
            [rows, cols] => Ok(Header::Rect {
                rows: dim(rows)?,
                cols: dim(cols)?,
            }),
            _ => Err(ParseError::FormatError {
                line,
                message: format!("Expected '<rows> <cols>' or '<size>', got '{}'", fields.join(" ")),
            }),
        }
    }

    /// Append exactly `count` elements to `out`.
    pub fn read_into<T: FromStr>(&mut self, count: usize, out: &mut Vec<T>) -> Result<(), ParseError> {
        for read in 0..count {
            let token = self.next_token()?.ok_or_else(|| ParseError::FormatError {
                line: self.line,
                message: format!("Unexpected end of file: expected {} more values", count - read),
            })?;
            let value = token.parse().map_err(|_| ParseError::FormatError {
                line: self.line,
                message: format!("Invalid integer: {}", token),
            })?;
            out.push(value);
        }
        Ok(())
    }
}

/// Write one row per line, each element followed by a space.
pub fn write_rows<'a, W, T, I>(out: &mut W, rows: I) -> std::io::Result<()>
where
    W: Write,
    T: std::fmt::Display + 'a,
    I: IntoIterator<Item = &'a [T]>,
{
    for row in rows {
        for value in row {
            write!(out, "{} ", value)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write the header line of a matrix file.
pub fn write_header<W: Write>(out: &mut W, header: Header) -> std::io::Result<()> {
    match header {
        Header::Square(size) => writeln!(out, "{}", size),
        Header::Rect { rows, cols } => writeln!(out, "{} {}", rows, cols),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_headers() {
        let mut r = MatrixReader::new(Cursor::new("3 4\n"));
        assert_eq!(r.read_header().unwrap(), Header::Rect { rows: 3, cols: 4 });

        let mut r = MatrixReader::new(Cursor::new("\n\n  5\n"));
        let header = r.read_header().unwrap();
        assert_eq!(header, Header::Square(5));
        assert_eq!((header.rows(), header.cols()), (5, 5));
        assert_eq!(r.line(), 3);
    }

    #[test]
    fn test_bad_headers() {
        let err = MatrixReader::new(Cursor::new("")).read_header().unwrap_err();
        assert!(err.to_string().contains("Missing"));

        let err = MatrixReader::new(Cursor::new("1 2 3\n")).read_header().unwrap_err();
        assert!(matches!(err, ParseError::FormatError { line: 1, .. }));

        let err = MatrixReader::new(Cursor::new("-4\n")).read_header().unwrap_err();
        assert!(err.to_string().contains("Invalid dimension"));
    }

    #[test]
    fn test_values_span_lines() {
        let mut r = MatrixReader::new(Cursor::new("2 3\n1 2\n3 4 5\n  6\n"));
        r.read_header().unwrap();
        let mut first = Vec::new();
        r.read_into::<i32>(3, &mut first).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        r.read_into(3, &mut first).unwrap();
        assert_eq!(first, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_short_and_malformed_data() {
        let mut r = MatrixReader::new(Cursor::new("2\n1 2\n3\n"));
        r.read_header().unwrap();
        let mut out: Vec<i32> = Vec::new();
        let err = r.read_into(4, &mut out).unwrap_err();
        assert!(err.to_string().contains("expected 1 more"), "{}", err);

        let mut r = MatrixReader::new(Cursor::new("1 2\n7 x\n"));
        r.read_header().unwrap();
        let err = r.read_into::<i32>(2, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ParseError::FormatError { line: 2, .. }));
    }

    #[test]
    fn test_write_header_and_rows() {
        let mut out = Vec::new();
        write_header(&mut out, Header::Rect { rows: 2, cols: 2 }).unwrap();
        write_rows(&mut out, [&[1, 2][..], &[3, 4][..]]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2 2\n1 2 \n3 4 \n");

        let mut out = Vec::new();
        write_header(&mut out, Header::Square(7)).unwrap();
        assert_eq!(out, b"7\n");
    }
}
