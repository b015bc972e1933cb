//! Interface versions.

use std::fmt;

/// A `major.minor` interface version.
///
/// Ordering compares `major` first, then `minor`. A component of `-1` marks
/// an absent version; such a version is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
}

impl Version {
    /// The placeholder used when no version was supplied.
    pub const INVALID: Version = Version { major: -1, minor: -1 };

    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    pub fn is_valid(&self) -> bool {
        self.major >= 0 && self.minor >= 0
    }

    /// Parses a version string of the exact form `<digits>.<digits>`.
    ///
    /// Returns `None` for anything else, including surrounding whitespace,
    /// signs, a missing component, or a component that overflows `i32`.
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.split_once('.')?;
        Some(Self {
            major: parse_component(major)?,
            minor: parse_component(minor)?,
        })
    }
}

fn parse_component(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl Default for Version {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_accepts_digits_only() {
        assert_eq!(Version::parse("1.2"), Some(Version::new(1, 2)));
        assert_eq!(Version::parse("10.0"), Some(Version::new(10, 0)));
        assert_eq!(Version::parse("01.02"), Some(Version::new(1, 2)));
    }

    #[test]
    fn parse_rejects_malformed() {
        for input in ["", "1", "1.", ".1", "1.2.3", "a.b", " 1.2", "1.2 ", "-1.2", "+1.0", "99999999999.0"] {
            assert_eq!(Version::parse(input), None, "input {:?}", input);
        }
    }

    #[test]
    fn default_is_invalid() {
        assert!(!Version::default().is_valid());
        assert!(Version::new(0, 0).is_valid());
        assert!(!Version::new(1, -1).is_valid());
    }

    proptest! {
        #[test]
        fn display_parse_roundtrip(major in 0i32..100_000, minor in 0i32..100_000) {
            let v = Version::new(major, minor);
            prop_assert_eq!(Version::parse(&v.to_string()), Some(v));
        }

        #[test]
        fn ordering_is_major_then_minor(a in (0i32..50, 0i32..50), b in (0i32..50, 0i32..50)) {
            let va = Version::new(a.0, a.1);
            let vb = Version::new(b.0, b.1);
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }
    }
}
