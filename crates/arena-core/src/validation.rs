//! Filename validation rules (spec §6). Security-sensitive: enforced
//! exactly, not inferred from examples.

use crate::errors::{ArenaError, ArenaResult};

const MAX_PATH_COMPONENTS: usize = 10;
const MAX_COMPONENT_LEN: usize = 255;

/// Validate one path component.
///
/// - length 1..=255
/// - allowed chars: letters, digits, `_`, `-`, `.`, and (non-strict only)
///   space
/// - must contain at least one of `[A-Za-z0-9_-]`
pub fn validate_component(component: &str, strict: bool) -> ArenaResult<()> {
    let len = component.chars().count();
    if len == 0 || len > MAX_COMPONENT_LEN {
        return Err(ArenaError::InvalidInput(format!(
            "path component '{component}' must be 1..255 characters"
        )));
    }

    let mut has_required_char = false;
    for ch in component.chars() {
        let allowed = ch.is_ascii_alphanumeric()
            || matches!(ch, '_' | '-' | '.')
            || (!strict && ch == ' ');
        if !allowed {
            return Err(ArenaError::InvalidInput(format!(
                "path component '{component}' contains disallowed character '{ch}'"
            )));
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-') {
            has_required_char = true;
        }
    }

    if !has_required_char {
        return Err(ArenaError::InvalidInput(format!(
            "path component '{component}' must contain at least one letter, digit, '_' or '-'"
        )));
    }

    Ok(())
}

/// Validate a `/`-joined path: at most 10 components, each passing
/// `validate_component`.
pub fn validate_path(path: &str, strict: bool) -> ArenaResult<()> {
    let components: Vec<&str> = path.split('/').collect();
    if components.len() > MAX_PATH_COMPONENTS {
        return Err(ArenaError::InvalidInput(format!(
            "path '{path}' has more than {MAX_PATH_COMPONENTS} components"
        )));
    }
    for component in components {
        validate_component(component, strict)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_component, validate_path};

    #[test]
    fn accepts_alphanumeric_and_dash_dot_underscore() {
        assert!(validate_component("main_file-v2.py", true).is_ok());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(validate_component("", true).is_err());
    }

    #[test]
    fn rejects_over_255_chars() {
        let long = "a".repeat(256);
        assert!(validate_component(&long, false).is_err());
    }

    #[test]
    fn strict_mode_rejects_space() {
        assert!(validate_component("my file.py", true).is_err());
    }

    #[test]
    fn non_strict_mode_allows_space() {
        assert!(validate_component("my file.py", false).is_ok());
    }

    #[test]
    fn rejects_component_with_only_dots() {
        assert!(validate_component("...", false).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_component("file$.py", false).is_err());
    }

    #[test]
    fn path_rejects_more_than_ten_components() {
        let path = (0..11)
            .map(|i| format!("d{i}"))
            .collect::<Vec<_>>()
            .join("/");
        assert!(validate_path(&path, false).is_err());
    }

    #[test]
    fn path_accepts_ten_components() {
        let path = (0..10)
            .map(|i| format!("d{i}"))
            .collect::<Vec<_>>()
            .join("/");
        assert!(validate_path(&path, false).is_ok());
    }
}
