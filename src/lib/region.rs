//! Parsing of `name[:start[-end]]` region strings into 0-based half-open coordinates.
use std::fmt;

use crate::{
    errors::{Result, SeqFetchError},
    handle::IndexHandle,
};

/// How the numbers in a region string are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateSystem {
    /// `start` inclusive, `end` exclusive, counting from zero (BED style).
    #[default]
    ZeroBasedHalfOpen,
    /// `start` and `end` both inclusive, counting from one (samtools style).
    OneBasedClosed,
}

/// A region of a named record in 0-based half-open coordinates. An `end` of `None` runs to
/// the end of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub begin: i64,
    pub end: Option<i64>,
}

impl Region {
    /// A region covering the whole of `name`.
    pub fn whole<S: Into<String>>(name: S) -> Region {
        Region { name: name.into(), begin: 0, end: None }
    }

    /// Parses `name`, `name:pos`, `name:start-end` or `name:start-`. Commas in numbers are
    /// ignored. A single position selects one base.
    pub fn parse(text: &str, coordinates: CoordinateSystem) -> Result<Region> {
        let invalid = || SeqFetchError::InvalidRegion(text.to_string());

        let (name, range) = match text.rfind(':') {
            Some(colon) => (&text[..colon], Some(&text[colon + 1..])),
            None => (text, None),
        };
        if name.is_empty() {
            return Err(invalid());
        }
        let range = match range {
            None => return Ok(Region::whole(name)),
            Some(range) => range,
        };

        let parse_position = |s: &str| -> Result<i64> {
            let digits: String = s.chars().filter(|&c| c != ',').collect();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            digits.parse::<i64>().map_err(|_| invalid())
        };

        let (start, end) = match range.split_once('-') {
            None => {
                let pos = parse_position(range)?;
                (pos, Some(pos))
            }
            Some((start, "")) => (parse_position(start)?, None),
            Some((start, end)) => (parse_position(start)?, Some(parse_position(end)?)),
        };

        let (begin, end) = match coordinates {
            CoordinateSystem::ZeroBasedHalfOpen => {
                // a lone position is one base: [pos, pos + 1)
                let end = match (range.contains('-'), end) {
                    (false, Some(pos)) => Some(pos + 1),
                    (_, end) => end,
                };
                (start, end)
            }
            CoordinateSystem::OneBasedClosed => {
                if start == 0 {
                    return Err(invalid());
                }
                (start - 1, end)
            }
        };
        if let Some(end) = end {
            if end < begin {
                return Err(invalid());
            }
        }
        Ok(Region { name: name.to_string(), begin, end })
    }

    /// Like [`Region::parse`], but a string that is itself a record name in `index` (names may
    /// contain `:`) selects that whole record.
    pub fn resolve(
        text: &str,
        coordinates: CoordinateSystem,
        index: &IndexHandle,
    ) -> Result<Region> {
        if index.contains(text) {
            return Ok(Region::whole(text));
        }
        Region::parse(text, coordinates)
    }
}

impl fmt::Display for Region {
    /// Formats the region in 0-based half-open coordinates.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            None if self.begin == 0 => write!(f, "{}", self.name),
            None => write!(f, "{}:{}-", self.name, self.begin),
            Some(end) => write!(f, "{}:{}-{}", self.name, self.begin, end),
        }
    }
}
