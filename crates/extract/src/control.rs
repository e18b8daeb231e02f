//! Debian control paragraphs.
//!
//! A paragraph is a sequence of `Field: value` lines where a value may
//! continue onto following lines that start with a space or tab. Field order
//! and continuation lines are kept exactly as found, so a parsed paragraph
//! serializes back to the same text (minus comments and surrounding blank
//! lines).

use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An ordered set of control fields.
///
/// Field names are matched case-insensitively, as `dpkg` does, but keep the
/// spelling they were parsed or inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ControlFields {
    fields: Vec<(String, String)>,
}

impl ControlFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse exactly one paragraph.
    ///
    /// Blank lines before and after the paragraph are allowed; a second
    /// paragraph is an error. Lines starting with `#` are comments.
    ///
    /// ```
    /// use aptblob_extract::ControlFields;
    ///
    /// let fields = ControlFields::parse("Package: foo\nDescription: short\n long\n").unwrap();
    /// assert_eq!(fields.get("package"), Some("foo"));
    /// assert_eq!(fields.get("Description"), Some("short\n long"));
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = Self::new();
        let mut ended = false;
        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            if line.starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                ended = !fields.is_empty();
                continue;
            }
            if ended {
                exn::bail!(malformed(number, "more than one paragraph"));
            }
            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = fields.fields.last_mut() else {
                    exn::bail!(malformed(number, "continuation line before the first field"));
                };
                value.push('\n');
                value.push_str(line.trim_end());
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                exn::bail!(malformed(number, "expected `Field: value`"));
            };
            if !is_field_name(name) {
                exn::bail!(malformed(number, format!("invalid field name `{name}`")));
            }
            if fields.contains(name) {
                exn::bail!(malformed(number, format!("duplicate field `{name}`")));
            }
            fields.fields.push((name.to_string(), value.trim().to_string()));
        }
        Ok(fields)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a field, or replace the value of an existing one in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| field.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let position = self.fields.iter().position(|(field, _)| field.eq_ignore_ascii_case(name))?;
        Some(self.fields.remove(position).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Display for ControlFields {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (name, value) in &self.fields {
            // A value that opens with a continuation line has nothing after
            // the colon.
            if value.is_empty() || value.starts_with('\n') {
                writeln!(f, "{name}:{value}")?;
            } else {
                writeln!(f, "{name}: {value}")?;
            }
        }
        Ok(())
    }
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

fn malformed(line: usize, reason: impl Into<String>) -> ErrorKind {
    ErrorKind::MalformedControl { line, reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CONTROL: &str = "\
Package: foo
Version: 1.0
Architecture: amd64
Maintainer: Jane Doe <jane@example.com>
Depends: libc6 (>= 2.34),
 libssl3
Description: an example package
 It does very little.
 .
 Really.
";

    #[test]
    fn test_parse_preserves_order_and_continuations() {
        let fields = ControlFields::parse(CONTROL).unwrap();
        let names: Vec<_> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["Package", "Version", "Architecture", "Maintainer", "Depends", "Description"]);
        assert_eq!(fields.get("Depends"), Some("libc6 (>= 2.34),\n libssl3"));
        assert_eq!(fields.get("description"), Some("an example package\n It does very little.\n .\n Really."));
    }

    #[test]
    fn test_serialize_reproduces_input() {
        let fields = ControlFields::parse(CONTROL).unwrap();
        assert_eq!(fields.to_string(), CONTROL);
    }

    #[test]
    fn test_value_starting_on_continuation_line() {
        let text = "Package: foo\nConffiles:\n /etc/foo.conf 0123\n";
        let fields = ControlFields::parse(text).unwrap();
        assert_eq!(fields.get("Conffiles"), Some("\n /etc/foo.conf 0123"));
        assert_eq!(fields.to_string(), text);
    }

    #[test]
    fn test_comments_and_surrounding_blank_lines() {
        let fields = ControlFields::parse("\n# generated\nPackage: foo\n# inline comment\nVersion: 1\n\n\n").unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.to_string(), "Package: foo\nVersion: 1\n");
    }

    #[test]
    fn test_crlf_line_endings() {
        let fields = ControlFields::parse("Package: foo\r\nVersion: 1.0\r\n").unwrap();
        assert_eq!(fields.get("Version"), Some("1.0"));
    }

    #[rstest]
    #[case("Package: foo\n\nPackage: bar\n", 3)]
    #[case(" leading continuation\n", 1)]
    #[case("Package foo\n", 1)]
    #[case("Package: foo\n: empty name\n", 2)]
    #[case("Package: foo\npackage: bar\n", 2)]
    #[case("Package: foo\nBad Name: x\n", 2)]
    fn test_malformed(#[case] text: &str, #[case] expected_line: usize) {
        let err = ControlFields::parse(text).unwrap_err();
        match &*err {
            ErrorKind::MalformedControl { line, .. } => assert_eq!(*line, expected_line),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let mut fields = ControlFields::parse("Package: foo\nSize: 12\nVersion: 1\n").unwrap();
        assert_eq!(fields.remove("size"), Some("12".to_string()));
        assert_eq!(fields.remove("size"), None);
        fields.insert("version", "2");
        fields.insert("Section", "utils");
        assert_eq!(fields.to_string(), "Package: foo\nVersion: 2\nSection: utils\n");
    }
}
