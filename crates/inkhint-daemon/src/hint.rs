//! Rendering hints
//!
//! A hint tells the driver how to convert pixels inside a region: the
//! grayscale bit depth, whether to threshold or dither, and whether the
//! region should be redrawn after a fast update.
//!
//! Text form is `BITDEPTH[|CONVERT][|REDRAW]`, e.g. `Y4`, `Y2|D`, `Y1|T|R`.
//! The driver takes the same information packed into one byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HintParseError {
    #[error("malformed hint '{input}': {reason}")]
    Malformed { input: String, reason: String },
}

impl HintParseError {
    fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    Y1,
    Y2,
    Y4,
}

impl BitDepth {
    fn raw(self) -> u8 {
        match self {
            Self::Y1 => 0,
            Self::Y2 => 1,
            Self::Y4 => 2,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Y1 => "Y1",
            Self::Y2 => "Y2",
            Self::Y4 => "Y4",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Convert {
    #[default]
    Threshold,
    Dither,
}

impl Convert {
    fn token(self) -> &'static str {
        match self {
            Self::Threshold => "T",
            Self::Dither => "D",
        }
    }
}

const BIT_DEPTH_SHIFT: u8 = 4;
const BIT_DEPTH_MASK: u8 = 0b11 << BIT_DEPTH_SHIFT;
const CONVERT_BIT: u8 = 1 << 6;
const REDRAW_BIT: u8 = 1 << 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HintSpec {
    pub bit_depth: BitDepth,
    pub convert: Convert,
    pub redraw: bool,
}

impl HintSpec {
    pub const fn new(bit_depth: BitDepth, convert: Convert, redraw: bool) -> Self {
        Self {
            bit_depth,
            convert,
            redraw,
        }
    }

    /// Byte accepted by the driver's hint ioctls and `default_hint` parameter
    pub fn to_raw(&self) -> u8 {
        let mut raw = self.bit_depth.raw() << BIT_DEPTH_SHIFT;
        if self.convert == Convert::Dither {
            raw |= CONVERT_BIT;
        }
        if self.redraw {
            raw |= REDRAW_BIT;
        }
        raw
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        if raw & !(BIT_DEPTH_MASK | CONVERT_BIT | REDRAW_BIT) != 0 {
            return None;
        }
        let bit_depth = match (raw & BIT_DEPTH_MASK) >> BIT_DEPTH_SHIFT {
            0 => BitDepth::Y1,
            1 => BitDepth::Y2,
            2 => BitDepth::Y4,
            _ => return None,
        };
        let convert = if raw & CONVERT_BIT != 0 {
            Convert::Dither
        } else {
            Convert::Threshold
        };
        Some(Self::new(bit_depth, convert, raw & REDRAW_BIT != 0))
    }
}

impl FromStr for HintSpec {
    type Err = HintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(HintParseError::malformed(s, "empty hint"));
        }

        let mut tokens = s.split('|');

        let bit_depth = match tokens.next() {
            Some("Y4") => BitDepth::Y4,
            Some("Y2") => BitDepth::Y2,
            Some("Y1") => BitDepth::Y1,
            Some(t) => {
                return Err(HintParseError::malformed(
                    s,
                    format!("expected bit depth Y1, Y2 or Y4, found '{}'", t),
                ))
            }
            None => return Err(HintParseError::malformed(s, "missing bit depth")),
        };

        let mut hint = HintSpec::new(bit_depth, Convert::Threshold, false);
        let mut seen_convert = false;
        let mut seen_redraw = false;

        for token in tokens {
            match token {
                "T" | "D" if !seen_convert && !seen_redraw => {
                    seen_convert = true;
                    hint.convert = if token == "D" {
                        Convert::Dither
                    } else {
                        Convert::Threshold
                    };
                }
                "R" | "r" if !seen_redraw => {
                    seen_redraw = true;
                    hint.redraw = token == "R";
                }
                "" => return Err(HintParseError::malformed(s, "empty field")),
                t => {
                    return Err(HintParseError::malformed(
                        s,
                        format!("unexpected field '{}'", t),
                    ))
                }
            }
        }

        Ok(hint)
    }
}

/// Canonical form, omitting trailing fields left at their default
impl fmt::Display for HintSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bit_depth.token())?;
        if self.redraw {
            write!(f, "|{}|R", self.convert.token())
        } else if self.convert != Convert::default() {
            write!(f, "|{}", self.convert.token())
        } else {
            Ok(())
        }
    }
}

impl Serialize for HintSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HintSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Empty text clears a window's hint
pub fn parse_optional_hint(s: &str) -> Result<Option<HintSpec>, HintParseError> {
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

/// Serde adapter for `Option<HintSpec>` using `""` for `None`
pub mod optional {
    use super::*;

    pub fn serialize<S: Serializer>(hint: &Option<HintSpec>, serializer: S) -> Result<S::Ok, S::Error> {
        match hint {
            Some(h) => serializer.collect_str(h),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<HintSpec>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => parse_optional_hint(&s).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_hints() -> Vec<HintSpec> {
        let mut hints = Vec::new();
        for bit_depth in [BitDepth::Y1, BitDepth::Y2, BitDepth::Y4] {
            for convert in [Convert::Threshold, Convert::Dither] {
                for redraw in [false, true] {
                    hints.push(HintSpec::new(bit_depth, convert, redraw));
                }
            }
        }
        hints
    }

    #[test]
    fn test_parse_examples() {
        assert_eq!(
            "Y4".parse::<HintSpec>().unwrap(),
            HintSpec::new(BitDepth::Y4, Convert::Threshold, false)
        );
        assert_eq!(
            "Y2|D".parse::<HintSpec>().unwrap(),
            HintSpec::new(BitDepth::Y2, Convert::Dither, false)
        );
        assert_eq!(
            "Y1|T|R".parse::<HintSpec>().unwrap(),
            HintSpec::new(BitDepth::Y1, Convert::Threshold, true)
        );
        assert_eq!(
            "Y4|r".parse::<HintSpec>().unwrap(),
            HintSpec::new(BitDepth::Y4, Convert::Threshold, false)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "", "Y3", "y4", "T", "D|Y4", "Y4|R|D", "Y4|D|D", "Y4|R|R", "Y4|", "Y4||R",
            "Y4|X", "|Y4", "Y4 |D",
        ] {
            assert!(
                matches!(bad.parse::<HintSpec>(), Err(HintParseError::Malformed { .. })),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_format_drops_trailing_defaults() {
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Threshold, false).to_string(), "Y4");
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Dither, false).to_string(), "Y4|D");
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Dither, true).to_string(), "Y4|D|R");
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Threshold, true).to_string(), "Y4|T|R");
    }

    #[test]
    fn test_round_trip_and_idempotent_format() {
        for hint in all_hints() {
            let text = hint.to_string();
            let reparsed: HintSpec = text.parse().unwrap();
            assert_eq!(reparsed, hint);
            assert_eq!(reparsed.to_string(), text);
        }
        assert_eq!("Y1|T".parse::<HintSpec>().unwrap().to_string(), "Y1");
        assert_eq!("Y2|D|r".parse::<HintSpec>().unwrap().to_string(), "Y2|D");
    }

    #[test]
    fn test_raw_layout() {
        assert_eq!(HintSpec::new(BitDepth::Y1, Convert::Threshold, false).to_raw(), 0x00);
        assert_eq!(HintSpec::new(BitDepth::Y2, Convert::Threshold, false).to_raw(), 0x10);
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Threshold, false).to_raw(), 0x20);
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Dither, false).to_raw(), 0x60);
        assert_eq!(HintSpec::new(BitDepth::Y4, Convert::Dither, true).to_raw(), 0xe0);

        for hint in all_hints() {
            assert_eq!(HintSpec::from_raw(hint.to_raw()), Some(hint));
        }
        assert_eq!(HintSpec::from_raw(0x30), None);
        assert_eq!(HintSpec::from_raw(0x01), None);
    }

    #[test]
    fn test_optional_hint() {
        assert_eq!(parse_optional_hint("").unwrap(), None);
        assert_eq!(
            parse_optional_hint("Y2").unwrap(),
            Some(HintSpec::new(BitDepth::Y2, Convert::Threshold, false))
        );
        assert!(parse_optional_hint("Z9").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let hint = HintSpec::new(BitDepth::Y1, Convert::Dither, false);
        assert_eq!(serde_json::to_string(&hint).unwrap(), "\"Y1|D\"");
        let back: HintSpec = serde_json::from_str("\"Y1|D\"").unwrap();
        assert_eq!(back, hint);
        assert!(serde_json::from_str::<HintSpec>("\"Y5\"").is_err());
    }
}
