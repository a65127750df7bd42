//! Dotted version strings used by the bundle format

use std::cmp::Ordering;
use std::fmt;

/// Lowest engine version a bundle may target
pub const MIN_SUPPORTED_VERSION: &str = "1.0";
/// Engine version of this build
pub const CURRENT_ENGINE_VERSION: &str = "3.2";
/// Bundles at or above this version carry a `HeaderExtInfo` block
pub const FEATURE_HEADER_EXT_INFO_VERSION: &str = "1.6";
/// Bundles targeting this SDK or later carry a template-info value
pub const FEATURE_TEMPLATE_INFO_VERSION: &str = "2.0";

/// Legacy (lepus) bundle version window
pub const LEPUS_VERSION: &str = "2.0.0";
pub const MIN_SUPPORTED_LEPUS_VERSION: &str = "0.1.0";
/// Legacy bundles above this version can run component scripts
pub const NEED_CONSOLE_LEPUS_VERSION: &str = "0.2.0";

/// A dotted numeric version such as `1.6` or `2.0.1`
#[derive(Debug, Clone, Default)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Parse a version string. Non-numeric components stop parsing.
    pub fn parse(text: &str) -> Self {
        let parts = text
            .trim()
            .split('.')
            .map_while(|p| p.trim().parse::<u32>().ok())
            .collect();
        Self { parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn part(&self, index: usize) -> u32 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    /// Check `min <= self <= max`
    pub fn within(&self, min: &Version, max: &Version) -> bool {
        self >= min && self <= max
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.part(i).cmp(&other.part(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

impl From<&str> for Version {
    fn from(text: &str) -> Self {
        Version::parse(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(Version::parse("1.6") > Version::parse("1.5.9"));
        assert_eq!(Version::parse("2.0"), Version::parse("2.0.0"));
        assert!(Version::parse("10.0") > Version::parse("9.9"));
    }

    #[test]
    fn test_version_within() {
        let min = Version::parse(MIN_SUPPORTED_VERSION);
        let max = Version::parse(CURRENT_ENGINE_VERSION);
        assert!(Version::parse("2.1").within(&min, &max));
        assert!(!Version::parse("0.9").within(&min, &max));
        assert!(!Version::parse("3.3").within(&min, &max));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::parse("1.6.2").to_string(), "1.6.2");
        assert!(Version::parse("abc").is_empty());
    }
}
