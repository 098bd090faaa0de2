//! Splits overlay-relative paths into validated components.
//!
//! "." (or the empty string) denotes the overlay root. Components never
//! contain "/"; an empty component (leading/trailing/doubled slash) is
//! rejected so traversal can never escape the root.

/// A path split into non-empty, "/"-free components. Empty (root) has no
/// components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Components(Vec<String>);

impl Components {
    /// Parse a user-supplied path. Rejects empty components; "." and ""
    /// both parse to the root (no components).
    pub fn parse(path: &str) -> Result<Self, String> {
        if path.is_empty() || path == "." {
            return Ok(Self(Vec::new()));
        }

        let mut parts = Vec::new();
        for part in path.split('/') {
            if part.is_empty() {
                return Err(path.to_string());
            }
            parts.push(part.to_string());
        }
        Ok(Self(parts))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The final component's name, or "" for the root (matching the
    /// convention of reporting the root's filename as "").
    pub fn basename(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// All but the last component.
    pub fn parent(&self) -> &[String] {
        if self.0.is_empty() {
            &[]
        } else {
            &self.0[..self.0.len() - 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_from_empty_string() {
        assert!(Components::parse("").unwrap().is_root());
    }

    #[test]
    fn root_from_dot() {
        assert!(Components::parse(".").unwrap().is_root());
    }

    #[test]
    fn single_component() {
        let c = Components::parse("foo").unwrap();
        assert_eq!(c.as_slice(), &["foo".to_string()]);
        assert_eq!(c.basename(), "foo");
        assert!(c.parent().is_empty());
    }

    #[test]
    fn nested_components() {
        let c = Components::parse("foo/bar/baz").unwrap();
        assert_eq!(
            c.as_slice(),
            &["foo".to_string(), "bar".to_string(), "baz".to_string()]
        );
        assert_eq!(c.basename(), "baz");
        assert_eq!(c.parent(), &["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn rejects_empty_component_leading_slash() {
        assert!(Components::parse("/foo").is_err());
    }

    #[test]
    fn rejects_empty_component_trailing_slash() {
        assert!(Components::parse("foo/").is_err());
    }

    #[test]
    fn rejects_doubled_slash() {
        assert!(Components::parse("foo//bar").is_err());
    }

    #[test]
    fn root_basename_is_empty() {
        assert_eq!(Components::parse(".").unwrap().basename(), "");
    }
}
