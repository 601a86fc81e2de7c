//! Incremental parser for PAX extended header records.
//!
//! A PAX extended header body is a sequence of records of the form
//! `"<len> <key>=<value>\n"`, where `<len>` is the decimal byte length of the
//! whole record, counting the length digits themselves, the space, the key,
//! the `=`, the value and the trailing newline.
//!
//! See <https://pubs.opengroup.org/onlinepubs/9699919799/utilities/pax.html#tag_20_92_13_03>.

use log::warn;

use crate::error::{ExtractError, Result};

/// Length prefixes longer than this cannot describe a record we could hold.
const MAX_LENGTH_DIGITS: usize = 20;

/// A single PAX extended header key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaxRecord {
    /// Record key, e.g. `path` or `SCHILY.xattr.user.foo`.
    pub key: String,
    /// Record value, without the terminating newline.
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Length,
    Key,
    Value,
}

/// Byte-level state machine decoding PAX records.
///
/// Input may be fed in arbitrary pieces; records spanning two pieces are
/// reassembled. Use a fresh parser per extended header body.
#[derive(Debug)]
pub struct PaxParser {
    state: State,
    length: Vec<u8>,
    record_len: usize,
    key: Vec<u8>,
    value: Vec<u8>,
    /// Bytes of the current record consumed so far.
    consumed: usize,
}

impl Default for PaxParser {
    fn default() -> Self {
        Self {
            state: State::Length,
            length: Vec::new(),
            record_len: 0,
            key: Vec::new(),
            value: Vec::new(),
            consumed: 0,
        }
    }
}

impl PaxParser {
    /// Create a parser positioned at the start of a record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of the extended header body.
    ///
    /// Records are decoded lazily as the returned iterator is driven. After
    /// an error the iterator is exhausted.
    #[must_use = "records are only decoded while the iterator is driven"]
    pub fn feed<'a>(&'a mut self, input: &'a [u8]) -> PaxRecords<'a> {
        PaxRecords {
            parser: self,
            input,
        }
    }

    /// Signal the end of the body.
    ///
    /// Returns false if the body ended partway through a record, whose
    /// content is then discarded.
    pub fn finish(&mut self) -> bool {
        let complete = self.consumed == 0;
        if !complete {
            warn!(
                "PAX extended header ended inside a record ({} bytes consumed)",
                self.consumed
            );
        }
        self.reset();
        complete
    }

    fn reset(&mut self) {
        self.state = State::Length;
        self.length.clear();
        self.record_len = 0;
        self.key.clear();
        self.value.clear();
        self.consumed = 0;
    }

    /// Advance by one byte, returning a record when this byte completes one.
    fn push(&mut self, byte: u8) -> Result<Option<PaxRecord>> {
        self.consumed += 1;
        match self.state {
            State::Length => {
                if byte != b' ' {
                    self.length.push(byte);
                    if self.length.len() > MAX_LENGTH_DIGITS {
                        return Err(self.invalid_length());
                    }
                    return Ok(None);
                }
                self.record_len = std::str::from_utf8(&self.length)
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| self.invalid_length())?;
                if self.record_len <= self.consumed {
                    return Err(ExtractError::MalformedPaxRecord);
                }
                self.state = State::Key;
            }
            State::Key => {
                if self.consumed >= self.record_len {
                    return Err(ExtractError::MalformedPaxRecord);
                }
                if byte == b'=' {
                    self.state = State::Value;
                } else {
                    self.key.push(byte);
                }
            }
            State::Value => {
                if self.consumed < self.record_len {
                    self.value.push(byte);
                    return Ok(None);
                }
                if byte != b'\n' {
                    warn!("PAX record does not end with a newline");
                }
                let record = PaxRecord {
                    key: String::from_utf8_lossy(&self.key).into_owned(),
                    value: String::from_utf8_lossy(&self.value).into_owned(),
                };
                self.reset();
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn invalid_length(&self) -> ExtractError {
        ExtractError::InvalidPaxLength(String::from_utf8_lossy(&self.length).into_owned())
    }
}

/// Iterator over the records completed by one piece of input.
///
/// Returned by [`PaxParser::feed`].
#[derive(Debug)]
pub struct PaxRecords<'a> {
    parser: &'a mut PaxParser,
    input: &'a [u8],
}

impl Iterator for PaxRecords<'_> {
    type Item = Result<PaxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((&byte, rest)) = self.input.split_first() {
            self.input = rest;
            match self.parser.push(byte) {
                Ok(None) => {}
                Ok(Some(record)) => return Some(Ok(record)),
                Err(e) => {
                    self.input = &[];
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn record(key: &str, value: &str) -> PaxRecord {
        PaxRecord {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn parse_all(pieces: &[&[u8]]) -> Result<Vec<PaxRecord>> {
        let mut parser = PaxParser::new();
        let mut records = Vec::new();
        for piece in pieces {
            for r in parser.feed(piece) {
                records.push(r?);
            }
        }
        parser.finish();
        Ok(records)
    }

    #[test]
    fn test_single_record() {
        let records = parse_all(&[b"22 path=long/name.txt\n"]).unwrap();
        assert_eq!(records, vec![record("path", "long/name.txt")]);
    }

    #[test]
    fn test_multiple_records() {
        let records = parse_all(&[b"30 mtime=1749594617.433174371\n12 uid=1000\n"]).unwrap();
        assert_eq!(
            records,
            vec![record("mtime", "1749594617.433174371"), record("uid", "1000")]
        );
    }

    #[test]
    fn test_record_split_across_feeds() {
        let body = b"22 path=long/name.txt\n19 linkpath=target\n";
        for split in 0..body.len() {
            let records = parse_all(&[&body[..split], &body[split..]]).unwrap();
            assert_eq!(
                records,
                vec![record("path", "long/name.txt"), record("linkpath", "target")],
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_value_may_contain_separators() {
        let records = parse_all(&[b"19 comment=a=b c\nd\n"]).unwrap();
        assert_eq!(records, vec![record("comment", "a=b c\nd")]);
    }

    #[test]
    fn test_last_byte_dropped_without_newline() {
        let records = parse_all(&[b"12 path=abcX12 uid=1000\n"]).unwrap();
        assert_eq!(records, vec![record("path", "abc"), record("uid", "1000")]);
    }

    #[test]
    fn test_empty_value() {
        let records = parse_all(&[b"9 gname=\n"]).unwrap();
        assert_eq!(records, vec![record("gname", "")]);
    }

    #[test]
    fn test_length_counts_bytes() {
        // "ü" is two bytes in UTF-8
        let records = parse_all(&["13 path=\u{fc}.t\n".as_bytes()]).unwrap();
        assert_eq!(records, vec![record("path", "\u{fc}.t")]);
    }

    #[test]
    fn test_non_numeric_length() {
        let err = parse_all(&[b"xx path=foo\n"]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPaxLength(ref s) if s == "xx"));
    }

    #[test]
    fn test_empty_length() {
        let err = parse_all(&[b" path=foo\n"]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPaxLength(ref s) if s.is_empty()));
    }

    #[test]
    fn test_runaway_length() {
        let err = parse_all(&[&[b'1'; 64]]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPaxLength(_)));
    }

    #[test]
    fn test_length_too_short() {
        let err = parse_all(&[b"2 path=foo\n"]).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedPaxRecord));

        let err = parse_all(&[b"6 path=foo\n"]).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedPaxRecord));
    }

    #[test]
    fn test_truncated_body() {
        let mut parser = PaxParser::new();
        let records: Vec<_> = parser.feed(b"22 path=long").collect();
        assert!(records.is_empty());
        assert!(!parser.finish());

        // the parser is reusable once finished
        let records: Vec<_> = parser
            .feed(b"12 uid=1000\n")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![record("uid", "1000")]);
        assert!(parser.finish());
    }

    #[test]
    fn test_error_stops_iteration() {
        let mut parser = PaxParser::new();
        let mut records = parser.feed(b"zz a=b\n12 uid=1000\n");
        assert!(matches!(records.next(), Some(Err(_))));
        assert!(records.next().is_none());
    }
}
