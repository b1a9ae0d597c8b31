// Partition boundary expressions: `2048`, `500m`, `4gb`, `50%`, `63s`, `12c`.

use std::str::FromStr;

use crate::{CoordinateSystem, DiskError, Geometry, Result};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Whatever the table currently uses.
    Native,
    Megabytes,
    Gigabytes,
    Percent,
    Sectors,
    Cylinders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitExpr {
    pub value: u64,
    pub unit: Unit,
}

impl FromStr for UnitExpr {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
        let split = compact
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(compact.len());
        let (digits, suffix) = compact.split_at(split);
        if digits.is_empty() {
            return Err(DiskError::invalid(format!("'{}' does not start with a number", s)));
        }
        let value = digits
            .parse::<u64>()
            .map_err(|_| DiskError::invalid(format!("'{}' is out of range", s)))?;

        let unit = match suffix {
            "" => Unit::Native,
            "m" | "mb" => Unit::Megabytes,
            "g" | "gb" => Unit::Gigabytes,
            "%" => Unit::Percent,
            "s" => Unit::Sectors,
            "c" => Unit::Cylinders,
            other => return Err(DiskError::invalid(format!("unknown unit '{}' in '{}'", other, s))),
        };

        if unit == Unit::Percent && value > 100 {
            return Err(DiskError::invalid(format!("'{}' exceeds 100%", s)));
        }

        Ok(UnitExpr { value, unit })
    }
}

fn div_round(numerator: u64, denominator: u64) -> u64 {
    numerator / denominator + u64::from(numerator % denominator >= denominator - denominator / 2)
}

impl UnitExpr {
    /// Converts to native units of `system`. Byte and percentage expressions
    /// name a boundary, so as an end they resolve to the last unit before it.
    pub fn to_native(&self, geometry: &Geometry, system: CoordinateSystem, boundary: Boundary) -> Result<u64> {
        let unit_bytes = geometry.unit_bytes(system);
        if unit_bytes == 0 || geometry.bytes_per_sector == 0 || geometry.bytes_per_cylinder == 0 {
            return Err(DiskError::invalid("geometry has not been detected"));
        }

        let value = self.value;
        let scaled = |factor: u64| {
            value
                .checked_mul(factor)
                .ok_or_else(|| DiskError::invalid(format!("{:?} {} overflows", self.unit, value)))
        };
        let (native, is_boundary) = match (self.unit, system) {
            (Unit::Native, _) => (value, false),
            (Unit::Megabytes, _) => (div_round(scaled(MIB)?, unit_bytes), true),
            (Unit::Gigabytes, _) => (div_round(scaled(GIB)?, unit_bytes), true),
            (Unit::Percent, _) => (div_round(scaled(geometry.total_units(system))?, 100), true),
            (Unit::Sectors, CoordinateSystem::Sectors) => (value, false),
            (Unit::Sectors, CoordinateSystem::Cylinders) => {
                (div_round(scaled(geometry.bytes_per_sector)?, geometry.bytes_per_cylinder), false)
            }
            (Unit::Cylinders, CoordinateSystem::Cylinders) => (value, false),
            (Unit::Cylinders, CoordinateSystem::Sectors) => {
                (div_round(scaled(geometry.bytes_per_cylinder)?, geometry.bytes_per_sector), false)
            }
        };

        if is_boundary && boundary == Boundary::End {
            Ok(native.saturating_sub(1))
        } else {
            Ok(native)
        }
    }
}
