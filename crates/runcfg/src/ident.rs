//! Identifier grammar shared by variable names, parameter names, group
//! names, and template names: `[A-Za-z_][A-Za-z0-9_]*`.

/// Returns `true` if `s` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns `true` if the identifier starts with the reserved `__` prefix.
pub fn has_reserved_prefix(s: &str) -> bool {
    s.starts_with("__")
}
