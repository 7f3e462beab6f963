/// Port range parsing
///
/// Accepts "low-high" with both bounds in 1-65535 and low <= high. Spans wider
/// than 1000 ports are silently truncated so that at most 1001 ports are probed.

use crate::error::InputError;
use std::ops::RangeInclusive;

/// Largest allowed distance between the first and last scanned port
pub const MAX_SPAN: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    low: u16,
    high: u16,
}

impl PortRange {
    pub fn parse(input: &str) -> Result<Self, InputError> {
        let parts: Vec<&str> = input.split('-').collect();
        if parts.len() != 2 {
            return Err(InputError::MalformedRange(input.to_string()));
        }

        let low: i64 = parts[0]
            .trim()
            .parse()
            .map_err(|_| InputError::MalformedRange(input.to_string()))?;
        let high: i64 = parts[1]
            .trim()
            .parse()
            .map_err(|_| InputError::MalformedRange(input.to_string()))?;

        let in_bounds = |p: i64| (1..=65535).contains(&p);
        if !in_bounds(low) || !in_bounds(high) {
            return Err(InputError::PortOutOfBounds { low, high });
        }

        // Both values fit in u16 after the bounds check
        let (low, high) = (low as u16, high as u16);
        if low > high {
            return Err(InputError::InvertedRange { low, high });
        }

        let high = if high - low > MAX_SPAN { low + MAX_SPAN } else { high };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }

    /// Number of ports that will be probed
    pub fn len(&self) -> usize {
        (self.high - self.low) as usize + 1
    }

    /// Always false; a parsed range holds at least one port
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.low..=self.high
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}
