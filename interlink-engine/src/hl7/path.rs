//! HL7 field path grammar.
//!
//! `path := SEG ('(' N ')')? ('-' F ('(' N ')')? ('.' C ('.' S)?)?)?`
//!
//! Segment names are 2–3 uppercase letters (digits allowed after the first,
//! e.g. `PV1`); repetition, field, component, and subcomponent indices are
//! 1-based in the written form and stored 0-based for repetitions.

// Layer 1: Standard library imports
use std::fmt;
use std::str::FromStr;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::EngineError;

/// A parsed HL7 field path such as `PID-3(1).1` or `MSH-9.2`.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::hl7::FieldPath;
///
/// let path: FieldPath = "PID-3(2).1.4".parse().unwrap();
/// assert_eq!(path.segment, "PID");
/// assert_eq!(path.field, Some(3));
/// assert_eq!(path.field_rep, 1); // stored 0-based
/// assert_eq!(path.component, Some(1));
/// assert_eq!(path.subcomponent, Some(4));
///
/// // Segment-only paths are valid too.
/// let seg: FieldPath = "OBX(2)".parse().unwrap();
/// assert_eq!(seg.field, None);
/// assert_eq!(seg.segment_rep, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Three-letter segment name, e.g. `MSH`.
    pub segment: String,
    /// Segment repetition, 0-based.
    pub segment_rep: usize,
    /// Field number, 1-based as written; `None` for segment-only paths.
    pub field: Option<usize>,
    /// Field repetition, 0-based.
    pub field_rep: usize,
    /// Component number, 1-based.
    pub component: Option<usize>,
    /// Subcomponent number, 1-based.
    pub subcomponent: Option<usize>,
}

impl FieldPath {
    /// Parse a path string, rejecting malformed input.
    pub fn parse(path: &str) -> Result<Self, EngineError> {
        let mut cursor = Cursor::new(path);

        let segment = cursor.take_segment_name()?;
        let segment_rep = cursor.take_optional_repetition()?;

        if cursor.at_end() {
            return Ok(Self {
                segment,
                segment_rep,
                field: None,
                field_rep: 0,
                component: None,
                subcomponent: None,
            });
        }

        cursor.expect(b'-')?;
        let field = cursor.take_number()?;
        let field_rep = cursor.take_optional_repetition()?;

        let mut component = None;
        let mut subcomponent = None;
        if cursor.consume(b'.') {
            component = Some(cursor.take_number()?);
            if cursor.consume(b'.') {
                subcomponent = Some(cursor.take_number()?);
            }
        }

        if !cursor.at_end() {
            return Err(cursor.invalid());
        }

        Ok(Self {
            segment,
            segment_rep,
            field: Some(field),
            field_rep,
            component,
            subcomponent,
        })
    }

    /// Returns `true` for paths that address a whole segment.
    pub fn is_segment_only(&self) -> bool {
        self.field.is_none()
    }
}

impl FromStr for FieldPath {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segment)?;
        if self.segment_rep > 0 {
            write!(f, "({})", self.segment_rep + 1)?;
        }
        if let Some(field) = self.field {
            write!(f, "-{field}")?;
            if self.field_rep > 0 {
                write!(f, "({})", self.field_rep + 1)?;
            }
            if let Some(component) = self.component {
                write!(f, ".{component}")?;
                if let Some(subcomponent) = self.subcomponent {
                    write!(f, ".{subcomponent}")?;
                }
            }
        }
        Ok(())
    }
}

/// Byte cursor over the path text.
struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn invalid(&self) -> EngineError {
        EngineError::Validation {
            reason: format!("invalid HL7 path: '{}'", self.text),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn consume(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), EngineError> {
        if self.consume(byte) {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn take_segment_name(&mut self) -> Result<String, EngineError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            let is_head = self.pos == start && b.is_ascii_uppercase();
            let is_tail = self.pos > start && (b.is_ascii_uppercase() || b.is_ascii_digit());
            if is_head || is_tail {
                self.pos += 1;
            } else {
                break;
            }
        }
        let len = self.pos - start;
        if !(2..=3).contains(&len) {
            return Err(self.invalid());
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn take_number(&mut self) -> Result<usize, EngineError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.invalid());
        }
        self.text[start..self.pos]
            .parse::<usize>()
            .map_err(|_| self.invalid())
            .and_then(|n| if n == 0 { Err(self.invalid()) } else { Ok(n) })
    }

    /// Parse an optional `(N)` repetition, returning the 0-based index.
    fn take_optional_repetition(&mut self) -> Result<usize, EngineError> {
        if !self.consume(b'(') {
            return Ok(0);
        }
        let n = self.take_number()?;
        self.expect(b')')?;
        Ok(n - 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_field() {
        let path = FieldPath::parse("MSH-9").unwrap();
        assert_eq!(path.segment, "MSH");
        assert_eq!(path.field, Some(9));
        assert_eq!(path.component, None);
    }

    #[test]
    fn test_component_and_subcomponent() {
        let path = FieldPath::parse("MSH-9.1.2").unwrap();
        assert_eq!(path.component, Some(1));
        assert_eq!(path.subcomponent, Some(2));
    }

    #[test]
    fn test_repetitions_are_one_based_in_text() {
        let path = FieldPath::parse("PID-3(1).1").unwrap();
        assert_eq!(path.field_rep, 0);

        let path = FieldPath::parse("OBX(2)-5").unwrap();
        assert_eq!(path.segment_rep, 1);
        assert_eq!(path.field, Some(5));
    }

    #[test]
    fn test_segment_only() {
        let path = FieldPath::parse("MSH").unwrap();
        assert!(path.is_segment_only());

        let path = FieldPath::parse("OBX(3)").unwrap();
        assert!(path.is_segment_only());
        assert_eq!(path.segment_rep, 2);
    }

    #[test]
    fn test_segment_with_digit() {
        let path = FieldPath::parse("PV1-2").unwrap();
        assert_eq!(path.segment, "PV1");
    }

    #[test]
    fn test_invalid_paths() {
        for bad in [
            "", "M", "msh-9", "MSH-", "MSH-0", "MSH-9.", "MSH-9.0", "MSH(0)-1", "MSH-9x",
            "TOOLONG-1", "MSH--9",
        ] {
            assert!(FieldPath::parse(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["MSH-9", "MSH-9.1.2", "PID-3(2).1", "OBX(2)", "PV1-2(3).4"] {
            let path = FieldPath::parse(text).unwrap();
            assert_eq!(path.to_string(), text);
        }
    }
}
