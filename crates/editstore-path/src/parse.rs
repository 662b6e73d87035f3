//! Parser for the canonical path string form.

use crate::{Path, PathError, PathStep, KEY_FIELD};

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

/// Parse a path string such as `a.b[3].c[_key=="k1"]`.
///
/// Numeric and keyed bracket steps are syntactically distinct; anything else
/// inside brackets is malformed. The empty string is malformed.
pub fn parse(input: &str) -> Result<Path, PathError> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    parser.parse_path()
}

impl<'a> Parser<'a> {
    fn parse_path(&mut self) -> Result<Path, PathError> {
        let mut steps = vec![self.parse_field()?];
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'.' => {
                    self.pos += 1;
                    steps.push(self.parse_field()?);
                }
                b'[' => steps.push(self.parse_bracket()?),
                _ => return Err(self.malformed("expected '.' or '['")),
            }
        }
        Ok(Path::new(steps))
    }

    fn parse_field(&mut self) -> Result<PathStep, PathError> {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.malformed("expected field name"));
        }
        if self.bytes[start].is_ascii_digit() {
            return Err(self.malformed("field name must not start with a digit"));
        }
        Ok(PathStep::Field(self.input[start..self.pos].to_owned()))
    }

    fn parse_bracket(&mut self) -> Result<PathStep, PathError> {
        self.pos += 1; // consume '['
        if self.rest().starts_with(KEY_FIELD) {
            return self.parse_keyed();
        }
        let start = self.pos;
        if self.rest().starts_with('-') {
            self.pos += 1;
        }
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos == start || (self.pos == start + 1 && self.bytes[start] == b'-') {
            return Err(self.malformed("expected array index or keyed selector"));
        }
        let index: i64 = self.input[start..self.pos]
            .parse()
            .map_err(|_| self.malformed("index out of range"))?;
        self.expect(b']')?;
        Ok(PathStep::Index(index))
    }

    fn parse_keyed(&mut self) -> Result<PathStep, PathError> {
        self.pos += KEY_FIELD.len();
        if !self.rest().starts_with("==\"") {
            return Err(self.malformed("expected `==\"` after key field"));
        }
        self.pos += 3;
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'"' {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(self.malformed("unterminated key string"));
        }
        let key = self.input[start..self.pos].to_owned();
        self.pos += 1; // closing quote
        self.expect(b']')?;
        Ok(PathStep::Key(key))
    }

    fn expect(&mut self, b: u8) -> Result<(), PathError> {
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.malformed("expected ']'"))
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn malformed(&self, reason: &'static str) -> PathError {
        PathError::Malformed {
            input: self.input.to_owned(),
            offset: self.pos,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_field() {
        assert_eq!(
            parse("title").unwrap(),
            Path::new(vec![PathStep::Field("title".into())])
        );
    }

    #[test]
    fn parse_dotted_fields() {
        assert_eq!(
            parse("a.b.c").unwrap(),
            Path::new(vec![
                PathStep::Field("a".into()),
                PathStep::Field("b".into()),
                PathStep::Field("c".into()),
            ])
        );
    }

    #[test]
    fn parse_index_steps() {
        assert_eq!(
            parse("arr[3]").unwrap(),
            Path::new(vec![PathStep::Field("arr".into()), PathStep::Index(3)])
        );
        assert_eq!(
            parse("arr[-1]").unwrap(),
            Path::new(vec![PathStep::Field("arr".into()), PathStep::Index(-1)])
        );
    }

    #[test]
    fn parse_keyed_selector() {
        assert_eq!(
            parse("items[_key==\"abc\"].title").unwrap(),
            Path::new(vec![
                PathStep::Field("items".into()),
                PathStep::Key("abc".into()),
                PathStep::Field("title".into()),
            ])
        );
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(parse(""), Err(PathError::Malformed { .. })));
    }

    #[test]
    fn parse_rejects_trailing_dot() {
        assert!(parse("a.").is_err());
    }

    #[test]
    fn parse_rejects_unclosed_bracket() {
        assert!(parse("a[1").is_err());
        assert!(parse("a[_key==\"x\"").is_err());
    }

    #[test]
    fn parse_rejects_bare_dash() {
        assert!(parse("a[-]").is_err());
    }

    #[test]
    fn parse_rejects_leading_digit_field() {
        assert!(parse("1abc").is_err());
    }

    #[test]
    fn round_trip_all_step_kinds() {
        let cases = [
            "a",
            "a.b",
            "a[0]",
            "a[-2]",
            "a[_key==\"k1\"]",
            "a.b[3].c[_key==\"zz9\"].d",
        ];
        for case in cases {
            let path = parse(case).unwrap();
            assert_eq!(path.to_string(), case);
            assert_eq!(parse(&path.to_string()).unwrap(), path);
        }
    }
}
