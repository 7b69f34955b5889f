// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Semantic versions and version ranges used to select services.
//!
//! A [`Version`] has the form `major.minor.micro[.qualifier]`; omitted numeric
//! parts default to `0`. A [`VersionRange`] uses interval notation, e.g.
//! `[1,2)` or `(1.0,2.0]`; a bare version `v` means `[v, ∞)`.

use crate::error::{FrameworkError, Result};
use crate::filter::Filter;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A semantic version `major.minor.micro[.qualifier]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Micro (patch) component.
    pub micro: u32,
    /// Optional qualifier; empty when absent.
    pub qualifier: String,
}

impl Version {
    /// Creates a version without qualifier.
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Returns a copy of this version with the given qualifier.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Parses `major[.minor[.micro[.qualifier]]]`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FrameworkError::illegal_argument("empty version string"));
        }
        let mut parts = text.splitn(4, '.');
        let mut numeric = [0u32; 3];
        for (index, slot) in numeric.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    *slot = part.parse::<u32>().map_err(|_| {
                        FrameworkError::illegal_argument(format!(
                            "invalid version '{text}': component {index} '{part}' is not a number"
                        ))
                    })?;
                }
                None => break,
            }
        }
        let qualifier = parts.next().unwrap_or_default().to_string();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(FrameworkError::illegal_argument(format!(
                "invalid version '{text}': bad qualifier '{qualifier}'"
            )));
        }
        Ok(Self {
            major: numeric[0],
            minor: numeric[1],
            micro: numeric[2],
            qualifier,
        })
    }

    /// Returns `true` when both versions share the same major component.
    pub fn is_compatible_with(&self, provided: &Version) -> bool {
        self.major == provided.major && self <= provided
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

/// An interval of versions, with optional bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    low: Option<Version>,
    low_inclusive: bool,
    high: Option<Version>,
    high_inclusive: bool,
}

impl VersionRange {
    /// A range matching every version.
    pub fn any() -> Self {
        Self {
            low: None,
            low_inclusive: true,
            high: None,
            high_inclusive: true,
        }
    }

    /// `[low, ∞)`.
    pub fn at_least(low: Version) -> Self {
        Self {
            low: Some(low),
            low_inclusive: true,
            high: None,
            high_inclusive: true,
        }
    }

    /// Creates an explicit interval.
    pub fn new(low: Version, low_inclusive: bool, high: Version, high_inclusive: bool) -> Self {
        Self {
            low: Some(low),
            low_inclusive,
            high: Some(high),
            high_inclusive,
        }
    }

    /// Parses interval notation (`[1,2)`) or a bare version (`1.2`).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let bad = |why: &str| {
            FrameworkError::illegal_argument(format!("invalid version range '{text}': {why}"))
        };
        let Some(first) = text.chars().next() else {
            return Err(bad("empty"));
        };
        if first != '[' && first != '(' {
            return Ok(Self::at_least(Version::parse(text)?));
        }
        let last = text.chars().last().ok_or_else(|| bad("empty"))?;
        if last != ']' && last != ')' {
            return Err(bad("missing closing bracket"));
        }
        let inner = &text[1..text.len() - 1];
        let (low, high) = inner.split_once(',').ok_or_else(|| bad("missing ','"))?;
        let low = low.trim();
        let high = high.trim();
        let low = if low.is_empty() {
            None
        } else {
            Some(Version::parse(low)?)
        };
        let high = if high.is_empty() {
            None
        } else {
            Some(Version::parse(high)?)
        };
        if let (Some(l), Some(h)) = (&low, &high) {
            if l > h {
                return Err(bad("low bound above high bound"));
            }
        }
        Ok(Self {
            low,
            low_inclusive: first == '[',
            high,
            high_inclusive: last == ']',
        })
    }

    /// Returns `true` when `version` lies inside the range.
    pub fn contains(&self, version: &Version) -> bool {
        let above_low = match &self.low {
            None => true,
            Some(low) if self.low_inclusive => version >= low,
            Some(low) => version > low,
        };
        let below_high = match &self.high {
            None => true,
            Some(high) if self.high_inclusive => version <= high,
            Some(high) => version < high,
        };
        above_low && below_high
    }

    /// Renders the range as an LDAP filter over `attribute`.
    ///
    /// Returns `None` for an unbounded range.
    pub fn to_filter_string(&self, attribute: &str) -> Option<String> {
        let low = self.low.as_ref().map(|v| {
            let op = if self.low_inclusive { ">=" } else { ">" };
            format!("({attribute}{op}{v})")
        });
        let high = self.high.as_ref().map(|v| {
            let op = if self.high_inclusive { "<=" } else { "<" };
            format!("({attribute}{op}{v})")
        });
        match (low, high) {
            (None, None) => None,
            (Some(one), None) | (None, Some(one)) => Some(one),
            (Some(l), Some(h)) => Some(format!("(&{l}{h})")),
        }
    }

    /// Parsed form of [`to_filter_string`](Self::to_filter_string).
    pub fn to_filter(&self, attribute: &str) -> Option<Filter> {
        self.to_filter_string(attribute)
            .and_then(|text| Filter::parse(&text).ok())
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high.is_none() && self.low_inclusive {
            if let Some(low) = &self.low {
                return write!(f, "{low}");
            }
        }
        let open = if self.low_inclusive { '[' } else { '(' };
        let close = if self.high_inclusive { ']' } else { ')' };
        let low = self.low.as_ref().map(ToString::to_string).unwrap_or_default();
        let high = self.high.as_ref().map(ToString::to_string).unwrap_or_default();
        write!(f, "{open}{low},{high}{close}")
    }
}

impl FromStr for VersionRange {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        VersionRange::parse(s)
    }
}
