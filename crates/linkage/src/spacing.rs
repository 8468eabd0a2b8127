//! Fixed-point voxel spacing.
//!
//! Spacing values are stored as integer picometres (1e-12 mm) so tolerance
//! checks are exact. `0.0101 - 0.0100` is exactly `0.0001`, never
//! `0.00009999999999999940`. Parsing goes string-to-integer without passing
//! through `f64`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

/// Fractional digits carried below one millimetre.
const SCALE_DIGITS: i64 = 12;
const UNITS_PER_MM: u64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millimeters(i64);

impl Millimeters {
    pub const ZERO: Millimeters = Millimeters(0);

    pub fn from_picometres(units: i64) -> Self {
        Self(units)
    }

    pub fn picometres(self) -> i64 {
        self.0
    }

    /// Parse the first numeric token in `input`.
    ///
    /// Accepts `"0.0413"`, `"0.0413 mm"`, `"-1.5"`, `"1e-4"`, `".5"`.
    /// Digits beyond 1e-12 mm are rounded half away from zero. Returns
    /// `None` when no number is present or the value overflows.
    pub fn parse(input: &str) -> Option<Self> {
        let caps = number_pattern().captures(input)?;
        let negative = caps.name("sign").map(|m| m.as_str() == "-").unwrap_or(false);
        let int_part = caps.name("int").map(|m| m.as_str()).unwrap_or("");
        let frac_part = caps
            .name("frac")
            .or_else(|| caps.name("frac2"))
            .map(|m| m.as_str())
            .unwrap_or("");
        let exponent: i64 = match caps.name("exp") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };

        let digits: String = format!("{int_part}{frac_part}")
            .trim_start_matches('0')
            .to_string();
        if digits.is_empty() {
            return Some(Self::ZERO);
        }

        // value = digits * 10^(exponent - frac_len); scaled by 10^SCALE_DIGITS
        let shift = exponent
            .checked_sub(frac_part.len() as i64)?
            .checked_add(SCALE_DIGITS)?;

        let magnitude: i128 = if shift >= 0 {
            if digits.len() as i64 + shift > 19 {
                return None;
            }
            let base: i128 = digits.parse().ok()?;
            base.checked_mul(10i128.checked_pow(shift as u32)?)?
        } else {
            let drop = shift.unsigned_abs();
            let keep = digits.len() as i64 - drop as i64;
            if keep < 0 {
                0
            } else {
                let keep = keep as usize;
                if keep > 19 {
                    return None;
                }
                let kept: i128 = if keep == 0 { 0 } else { digits[..keep].parse().ok()? };
                let round_up = digits.as_bytes()[keep] >= b'5';
                kept + i128::from(round_up)
            }
        };

        let signed = if negative { -magnitude } else { magnitude };
        i64::try_from(signed).ok().map(Self)
    }

    /// Convert a JSON/TOML float. Goes through the shortest decimal
    /// representation so `0.0001` stays exactly `0.0001`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::parse(&format!("{value}"))
    }

    pub fn abs_diff(self, other: Millimeters) -> u64 {
        self.0.abs_diff(other.0)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Component agreement, inclusive of the tolerance boundary.
    pub fn within(self, other: Millimeters, tolerance: Millimeters) -> bool {
        self.abs_diff(other) <= tolerance.0.unsigned_abs()
    }
}

impl fmt::Display for Millimeters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / UNITS_PER_MM;
        let frac = magnitude % UNITS_PER_MM;
        if self.0 < 0 {
            write!(f, "-")?;
        }
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let frac = format!("{:012}", frac);
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl Serialize for Millimeters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?P<sign>[-+])?(?:(?P<int>\d+)(?:\.(?P<frac>\d*))?|\.(?P<frac2>\d+))(?:[eE](?P<exp>[-+]?\d+))?",
        )
        .expect("static number pattern")
    })
}

// ---------------------------------------------------------------------------
// Voxel triple
// ---------------------------------------------------------------------------

/// A voxel spacing triple in millimetres, any component of which may be absent.
///
/// A component parsed from a non-blank cell that holds no positive number
/// is absent but flagged invalid, so it can never be silently filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VoxelSpacing {
    pub x: Option<Millimeters>,
    pub y: Option<Millimeters>,
    pub z: Option<Millimeters>,
    #[serde(skip)]
    invalid: [bool; 3],
}

impl VoxelSpacing {
    pub fn new(x: Option<Millimeters>, y: Option<Millimeters>, z: Option<Millimeters>) -> Self {
        // Zero or negative spacing is not a measurement.
        let keep = |v: Option<Millimeters>| v.filter(|m| m.is_positive());
        Self { x: keep(x), y: keep(y), z: keep(z), invalid: [false; 3] }
    }

    /// Parse three raw strings, e.g. cells from the local table.
    ///
    /// Blank cells are absent. Anything else must hold a positive number or
    /// the component is marked invalid.
    pub fn parse(x: &str, y: &str, z: &str) -> Self {
        let cell = |raw: &str| {
            if raw.trim().is_empty() {
                return (None, false);
            }
            let value = Millimeters::parse(raw).filter(|m| m.is_positive());
            (value, value.is_none())
        };
        let ((x, ix), (y, iy), (z, iz)) = (cell(x), cell(y), cell(z));
        Self { x, y, z, invalid: [ix, iy, iz] }
    }

    /// Components whose source cell was non-blank but unusable.
    pub fn invalid_components(&self) -> [bool; 3] {
        self.invalid
    }

    pub fn has_invalid(&self) -> bool {
        self.invalid.iter().any(|&i| i)
    }

    pub fn components(&self) -> [Option<Millimeters>; 3] {
        [self.x, self.y, self.z]
    }

    pub fn present_count(&self) -> usize {
        self.components().iter().filter(|c| c.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.present_count() == 3
    }

    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }

    /// Fill absent components from `other`, keeping present ones.
    pub fn fill_from(&self, other: &VoxelSpacing) -> VoxelSpacing {
        VoxelSpacing {
            x: self.x.or(other.x),
            y: self.y.or(other.y),
            z: self.z.or(other.z),
            invalid: self.invalid,
        }
    }
}
