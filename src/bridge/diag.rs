//! Diagnostic verbosity mask.
//!
//! The mask gates the per-operation traces the bridge emits through `tracing`.
//! It is process-wide and may be read or written at any time, including before
//! the guest runtime is started and after it is stopped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};

/// Bitmask selecting which diagnostic categories are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagFlags(u32);

impl DiagFlags {
    pub const OFF: Self = Self(0);
    /// Type descriptor lookups.
    pub const TYPE: Self = Self(0x01);
    /// Call dispatch.
    pub const CALL: Self = Self(0x02);
    /// Lifecycle, evaluation and imports.
    pub const EXEC: Self = Self(0x04);
    /// Reference counting.
    pub const MEM: Self = Self(0x08);
    /// Exception translation.
    pub const ERR: Self = Self(0x10);
    pub const ALL: Self = Self(0xff);

    const NAMED: [(&'static str, DiagFlags); 7] = [
        ("off", Self::OFF),
        ("type", Self::TYPE),
        ("call", Self::CALL),
        ("exec", Self::EXEC),
        ("mem", Self::MEM),
        ("err", Self::ERR),
        ("all", Self::ALL),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if any category of `other` is enabled in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Parse a mask from a decimal number, a `0x` hex number, or flag names
    /// separated by `|` or `,` (e.g. `"exec|mem"`).
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty diagnostic flag specification".to_string());
        }

        if let Some(hex) = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            return u32::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|e| format!("Invalid hex diagnostic flags '{}': {}", text, e));
        }

        if text.chars().all(|c| c.is_ascii_digit()) {
            return text
                .parse::<u32>()
                .map(Self)
                .map_err(|e| format!("Invalid diagnostic flags '{}': {}", text, e));
        }

        let mut flags = Self::OFF;
        for part in text.split(['|', ',']) {
            let name = part.trim().to_ascii_lowercase();
            let flag = Self::NAMED
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, flag)| *flag)
                .ok_or_else(|| format!("Unknown diagnostic flag '{}'", part.trim()))?;
            flags |= flag;
        }
        Ok(flags)
    }
}

impl BitOr for DiagFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DiagFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DiagFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

static FLAGS: AtomicU32 = AtomicU32::new(0);

/// Current diagnostic mask.
pub fn diag_flags() -> DiagFlags {
    DiagFlags(FLAGS.load(Ordering::Relaxed))
}

/// Replace the diagnostic mask.
pub fn set_diag_flags(flags: DiagFlags) {
    FLAGS.store(flags.0, Ordering::Relaxed);
}

pub(crate) fn enabled(flag: DiagFlags) -> bool {
    diag_flags().intersects(flag)
}

/// Emit a `debug` trace when the given diagnostic category is enabled.
macro_rules! diag {
    ($flag:ident, $($arg:tt)+) => {
        if $crate::bridge::diag::enabled($crate::bridge::diag::DiagFlags::$flag) {
            ::tracing::debug!(target: "pybridge", category = stringify!($flag), $($arg)+);
        }
    };
}

pub(crate) use diag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        assert_eq!(DiagFlags::parse("0").unwrap(), DiagFlags::OFF);
        assert_eq!(DiagFlags::parse("12").unwrap(), DiagFlags::EXEC | DiagFlags::MEM);
        assert_eq!(DiagFlags::parse("0xff").unwrap(), DiagFlags::ALL);
        assert_eq!(DiagFlags::parse(" 0X10 ").unwrap(), DiagFlags::ERR);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            DiagFlags::parse("exec|mem").unwrap(),
            DiagFlags::EXEC | DiagFlags::MEM
        );
        assert_eq!(
            DiagFlags::parse("Type, call").unwrap(),
            DiagFlags::TYPE | DiagFlags::CALL
        );
        assert_eq!(DiagFlags::parse("all").unwrap(), DiagFlags::ALL);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DiagFlags::parse("").is_err());
        assert!(DiagFlags::parse("0xzz").is_err());
        let err = DiagFlags::parse("exec|verbose").unwrap_err();
        assert!(err.contains("verbose"));
    }

    #[test]
    fn test_intersects() {
        let flags = DiagFlags::EXEC | DiagFlags::ERR;
        assert!(flags.intersects(DiagFlags::EXEC));
        assert!(!flags.intersects(DiagFlags::MEM));
        assert!(DiagFlags::ALL.intersects(DiagFlags::TYPE));
        assert!(!DiagFlags::OFF.intersects(DiagFlags::ALL));
    }

    #[test]
    fn test_display() {
        assert_eq!(DiagFlags::ERR.to_string(), "0x10");
        assert_eq!(DiagFlags::from_bits(0x1f).bits(), 0x1f);
    }
}
