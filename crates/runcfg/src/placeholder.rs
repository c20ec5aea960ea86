//! Tokenizes `${...}` placeholder forms inside a template field string.
//!
//! ```text
//! placeholder := "${" modifier? name "}"
//! modifier    := "?" | "@"
//! name        := [A-Za-z_][A-Za-z0-9_]*
//! ```
//!
//! Escape sequences (`\$` → `$`, `\\` → `\`) are unescaped by a later pass
//! (see [`crate::template_expand`]), but this parser still has to know
//! about them well enough not to misread an escaped `\${` as a real
//! placeholder: `\$` and `\\` are skipped as a unit before placeholder
//! detection runs on the rest of the text.

use crate::error::Error;
use crate::ident::is_valid_identifier;

/// The three placeholder shapes a template field may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `${name}` — required.
    Required,
    /// `${?name}` — optional.
    Optional,
    /// `${@name}` — array.
    Array,
}

/// A single `${...}` occurrence found in a template string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    pub name: String,
    /// Byte offset of the leading `$`.
    pub start: usize,
    /// Byte offset one past the closing `}`.
    pub end: usize,
}

impl Placeholder {
    /// `true` if this placeholder is the entirety of `text` (used to
    /// detect "pure array" / "pure optional" expansion contexts).
    pub fn spans_whole(&self, text: &str) -> bool {
        self.start == 0 && self.end == text.len()
    }
}

/// Parses every `${...}` occurrence in `text`, in input order.
///
/// `context` is used only to build error messages (e.g. `"template
/// backup, field args[0]"`).
pub fn parse_placeholders(text: &str, context: &str) -> Result<Vec<Placeholder>, Error> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && matches!(bytes.get(i + 1), Some(&b'$') | Some(&b'\\')) {
            i += 2;
            continue;
        }

        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let body_start = i + 2;
            let Some(rel_close) = text[body_start..].find('}') else {
                return Err(Error::UnclosedPlaceholder {
                    context: context.to_string(),
                    text: text.to_string(),
                });
            };
            let body_end = body_start + rel_close;
            let body = &text[body_start..body_end];

            if body.is_empty() {
                return Err(Error::EmptyPlaceholder {
                    context: context.to_string(),
                    text: text.to_string(),
                });
            }

            let (kind, name) = match body.as_bytes()[0] {
                b'?' => (PlaceholderKind::Optional, &body[1..]),
                b'@' => (PlaceholderKind::Array, &body[1..]),
                _ => (PlaceholderKind::Required, body),
            };

            if name.is_empty() {
                return Err(Error::EmptyPlaceholderName {
                    context: context.to_string(),
                    text: text.to_string(),
                });
            }
            if !is_valid_identifier(name) {
                return Err(Error::InvalidPlaceholderName {
                    context: context.to_string(),
                    name: name.to_string(),
                });
            }

            out.push(Placeholder {
                kind,
                name: name.to_string(),
                start: i,
                end: body_end + 1,
            });

            i = body_end + 1;
        } else {
            i += 1;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_optional_and_array() {
        let text = "${path} ${?password} ${@flags}";
        let placeholders = parse_placeholders(text, "ctx").unwrap();
        assert_eq!(placeholders.len(), 3);
        assert_eq!(placeholders[0].kind, PlaceholderKind::Required);
        assert_eq!(placeholders[0].name, "path");
        assert_eq!(placeholders[1].kind, PlaceholderKind::Optional);
        assert_eq!(placeholders[1].name, "password");
        assert_eq!(placeholders[2].kind, PlaceholderKind::Array);
        assert_eq!(placeholders[2].name, "flags");
    }

    #[test]
    fn pure_array_spans_whole_string() {
        let text = "${@flags}";
        let placeholders = parse_placeholders(text, "ctx").unwrap();
        assert!(placeholders[0].spans_whole(text));
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        let err = parse_placeholders("${path", "ctx").unwrap_err();
        assert!(matches!(err, Error::UnclosedPlaceholder { .. }));
    }

    #[test]
    fn empty_placeholder_is_an_error() {
        let err = parse_placeholders("${}", "ctx").unwrap_err();
        assert!(matches!(err, Error::EmptyPlaceholder { .. }));
    }

    #[test]
    fn empty_placeholder_name_after_modifier_is_an_error() {
        let err = parse_placeholders("${?}", "ctx").unwrap_err();
        assert!(matches!(err, Error::EmptyPlaceholderName { .. }));
    }

    #[test]
    fn invalid_placeholder_name_is_an_error() {
        let err = parse_placeholders("${9bad}", "ctx").unwrap_err();
        assert!(matches!(err, Error::InvalidPlaceholderName { .. }));
    }

    #[test]
    fn no_placeholders_returns_empty() {
        assert_eq!(parse_placeholders("plain text", "ctx").unwrap(), vec![]);
    }

    #[test]
    fn escaped_dollar_brace_is_not_a_placeholder() {
        let placeholders = parse_placeholders("\\${literal}-${name}", "ctx").unwrap();
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].name, "name");
    }

    #[test]
    fn escaped_backslash_does_not_suppress_the_next_placeholder() {
        let placeholders = parse_placeholders("\\\\${name}", "ctx").unwrap();
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].name, "name");
    }
}
