//! Host version comparison.
//!
//! Versions are dotted numeric strings (`1`, `1.2`, `1.2.3`, ...). Missing
//! trailing components compare as zero, so `1.0` and `1.0.0` are equal.
//! Anything after a `-` or `+` (pre-release or build metadata) is ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed dotted version.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    /// Parse a version string, returning `None` if it is not dotted numeric.
    pub fn parse(s: &str) -> Option<Self> {
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        if core.is_empty() {
            return None;
        }

        let parts = core
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        Some(Self { parts })
    }

    /// Check whether this version lies within the optional inclusive bounds.
    pub fn within(&self, min: Option<&Version>, max: Option<&Version>) -> bool {
        if let Some(min) = min {
            if self < min {
                return false;
            }
        }
        if let Some(max) = max {
            if self > max {
                return false;
            }
        }
        true
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s).ok_or_else(|| format!("'{}' is not a valid version", s))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        f.write_str(&rendered.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(Version::parse("1.0").unwrap(), Version::parse("1.0.0").unwrap());
        assert!(Version::parse("1.2").unwrap() < Version::parse("1.10").unwrap());
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(Version::parse("2.0.0").unwrap() < Version::parse("10.0.0").unwrap());
    }

    #[test]
    fn test_suffix_ignored() {
        assert_eq!(
            Version::parse("1.4.0-beta.2").unwrap(),
            Version::parse("1.4.0+build7").unwrap()
        );
    }

    #[test]
    fn test_invalid_versions() {
        assert!(Version::parse("").is_none());
        assert!(Version::parse("one.two").is_none());
        assert!(Version::parse("1..2").is_none());
        assert!("x".parse::<Version>().is_err());
    }

    #[test]
    fn test_within_bounds() {
        let host = Version::parse("1.5").unwrap();
        let min = Version::parse("1.0.0").unwrap();
        let max = Version::parse("2.0.0").unwrap();
        assert!(host.within(Some(&min), Some(&max)));
        assert!(host.within(None, None));
        assert!(!host.within(Some(&max), None));
        assert!(!host.within(None, Some(&min)));
        // Bounds are inclusive
        assert!(min.within(Some(&min), Some(&min)));
    }
}
