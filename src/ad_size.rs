use crate::errors::{ContractError, ContractResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of one ad dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    Pixels,
    /// Percentage of the screen width
    ScreenWidth,
    /// Percentage of the screen height
    ScreenHeight,
}

impl SizeUnit {
    fn suffix(self) -> &'static str {
        match self {
            SizeUnit::Pixels => "px",
            SizeUnit::ScreenWidth => "sw",
            SizeUnit::ScreenHeight => "sh",
        }
    }
}

/// One ad dimension such as `"300px"`, `"300"`, `"100sw"` or `"50sh"`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdLength {
    pub value: f64,
    pub unit: SizeUnit,
}

impl AdLength {
    pub fn parse(input: &str) -> ContractResult<Self> {
        let trimmed = input.trim();
        let (number, unit) = if let Some(n) = trimmed.strip_suffix("px") {
            (n, SizeUnit::Pixels)
        } else if let Some(n) = trimmed.strip_suffix("sw") {
            (n, SizeUnit::ScreenWidth)
        } else if let Some(n) = trimmed.strip_suffix("sh") {
            (n, SizeUnit::ScreenHeight)
        } else {
            (trimmed, SizeUnit::Pixels)
        };
        let value: f64 = number.trim().parse().map_err(|_| ContractError::InvalidSize(input.to_string()))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(ContractError::InvalidSize(input.to_string()));
        }
        Ok(AdLength { value, unit })
    }

    pub fn pixels(value: f64) -> Self {
        AdLength { value, unit: SizeUnit::Pixels }
    }

    /// Resolve to whole device pixels against the given screen
    pub fn resolve(&self, screen: ScreenSize) -> u32 {
        let px = match self.unit {
            SizeUnit::Pixels => self.value,
            SizeUnit::ScreenWidth => self.value * screen.width as f64 / 100.0,
            SizeUnit::ScreenHeight => self.value * screen.height as f64 / 100.0,
        };
        px.round().max(0.0) as u32
    }
}

impl TryFrom<String> for AdLength {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AdLength::parse(&value)
    }
}

impl From<AdLength> for String {
    fn from(length: AdLength) -> Self {
        length.to_string()
    }
}

impl fmt::Display for AdLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Width and height of an ad
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdSize {
    pub width: AdLength,
    pub height: AdLength,
}

impl AdSize {
    pub fn resolve(&self, screen: ScreenSize) -> (u32, u32) {
        (self.width.resolve(screen), self.height.resolve(screen))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

// Braces get percent-encoded when a macro sits in a url path
const WIDTH_MACROS: [&str; 4] = ["${AD_WIDTH}", "{%AD_WIDTH%}", "$%7BAD_WIDTH%7D", "%7B%AD_WIDTH%%7D"];
const HEIGHT_MACROS: [&str; 4] = ["${AD_HEIGHT}", "{%AD_HEIGHT%}", "$%7BAD_HEIGHT%7D", "%7B%AD_HEIGHT%%7D"];

/// Substitute the size macros of a render url with resolved pixel values
pub fn substitute_size_macros(url: &str, width_px: u32, height_px: u32) -> String {
    let mut out = url.to_string();
    for m in WIDTH_MACROS {
        out = out.replace(m, &width_px.to_string());
    }
    for m in HEIGHT_MACROS {
        out = out.replace(m, &height_px.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: ScreenSize = ScreenSize { width: 1000, height: 800 };

    #[test]
    fn test_parse_units() {
        assert_eq!(AdLength::parse("300px").unwrap(), AdLength::pixels(300.0));
        assert_eq!(AdLength::parse("300").unwrap(), AdLength::pixels(300.0));
        assert_eq!(AdLength::parse("100sw").unwrap().unit, SizeUnit::ScreenWidth);
        assert_eq!(AdLength::parse("50sh").unwrap().unit, SizeUnit::ScreenHeight);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["", "px", "-5px", "0", "abc", "12em", "NaNpx"] {
            assert!(AdLength::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_resolve_screen_relative() {
        let size = AdSize { width: AdLength::parse("100sw").unwrap(), height: AdLength::parse("50sh").unwrap() };
        assert_eq!(size.resolve(SCREEN), (1000, 400));
        assert_eq!(AdLength::parse("12.6px").unwrap().resolve(SCREEN), 13);
    }

    #[test]
    fn test_substitute_size_macros() {
        let url = "https://ad.test/render?w=${AD_WIDTH}&h={%AD_HEIGHT%}";
        assert_eq!(substitute_size_macros(url, 300, 250), "https://ad.test/render?w=300&h=250");
        let path = "https://ad.test/$%7BAD_WIDTH%7D/render";
        assert_eq!(substitute_size_macros(path, 300, 250), "https://ad.test/300/render");
    }

    #[test]
    fn test_display_keeps_unit() {
        assert_eq!(AdLength::parse("100sw").unwrap().to_string(), "100sw");
        assert_eq!(AdLength::parse("300").unwrap().to_string(), "300px");
    }
}
