//! TollEngine - Toll Computation
//!
//! ## Responsibilities
//!
//! - Rate table keyed by vehicle class
//! - Peak-hour pricing
//! - Deterministic, no I/O

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

/// Peak-hour price multiplier
const PEAK_MULTIPLIER: f64 = 1.5;

/// Vehicle classification used by the rate table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Motorcycle,
    Car,
    Suv,
    Truck,
    Bus,
}

impl VehicleClass {
    /// Parse a class label from the account store.
    ///
    /// Unknown or missing labels fall back to the car rate.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "motorcycle" => VehicleClass::Motorcycle,
            "car" => VehicleClass::Car,
            "suv" => VehicleClass::Suv,
            "truck" => VehicleClass::Truck,
            "bus" => VehicleClass::Bus,
            _ => VehicleClass::Car,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Car => "car",
            VehicleClass::Suv => "suv",
            VehicleClass::Truck => "truck",
            VehicleClass::Bus => "bus",
        }
    }

    /// Base toll rate for this class
    fn base_rate(&self) -> f64 {
        match self {
            VehicleClass::Motorcycle => 2.50,
            VehicleClass::Car => 5.00,
            VehicleClass::Suv => 6.50,
            VehicleClass::Truck => 10.00,
            VehicleClass::Bus => 8.00,
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the local hour falls in a peak window.
///
/// Peak windows are [7,9] and [17,19], boundaries inclusive.
fn is_peak_hour(hour: u32) -> bool {
    (7..=9).contains(&hour) || (17..=19).contains(&hour)
}

/// Round half-up to 2 decimal places
fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Compute the toll amount for a vehicle class at a passage time.
pub fn compute_toll(class: VehicleClass, at: DateTime<Local>) -> f64 {
    let multiplier = if is_peak_hour(at.hour()) {
        PEAK_MULTIPLIER
    } else {
        1.0
    };
    round_amount(class.base_rate() * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_car_off_peak() {
        assert_eq!(compute_toll(VehicleClass::Car, at_hour(12)), 5.00);
    }

    #[test]
    fn test_peak_boundaries_inclusive() {
        for hour in [7, 9, 17, 19] {
            assert_eq!(compute_toll(VehicleClass::Car, at_hour(hour)), 7.50);
        }
        for hour in [6, 10, 16, 20] {
            assert_eq!(compute_toll(VehicleClass::Car, at_hour(hour)), 5.00);
        }
    }

    #[test]
    fn test_deterministic() {
        let ts = at_hour(8);
        assert_eq!(
            compute_toll(VehicleClass::Truck, ts),
            compute_toll(VehicleClass::Truck, ts)
        );
    }

    #[test]
    fn test_all_classes_off_peak() {
        assert_eq!(compute_toll(VehicleClass::Motorcycle, at_hour(3)), 2.50);
        assert_eq!(compute_toll(VehicleClass::Suv, at_hour(3)), 6.50);
        assert_eq!(compute_toll(VehicleClass::Truck, at_hour(3)), 10.00);
        assert_eq!(compute_toll(VehicleClass::Bus, at_hour(3)), 8.00);
    }

    #[test]
    fn test_peak_rounding_half_up() {
        // motorcycle 2.50 * 1.5 = 3.75, exact at 2dp
        assert_eq!(compute_toll(VehicleClass::Motorcycle, at_hour(18)), 3.75);
        assert_eq!(compute_toll(VehicleClass::Suv, at_hour(18)), 9.75);
    }

    #[test]
    fn test_unknown_class_defaults_to_car() {
        assert_eq!(VehicleClass::parse("hovercraft"), VehicleClass::Car);
        assert_eq!(VehicleClass::parse(""), VehicleClass::Car);
        assert_eq!(VehicleClass::parse("TRUCK"), VehicleClass::Truck);
    }
}
