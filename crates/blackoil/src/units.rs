//! SI unit conversion factors. Every quantity inside the crate is in SI units.

pub const METER: f64 = 1.0;
pub const SECOND: f64 = 1.0;
pub const MINUTE: f64 = 60.0 * SECOND;
pub const HOUR: f64 = 60.0 * MINUTE;
pub const DAY: f64 = 24.0 * HOUR;
pub const YEAR: f64 = 365.0 * DAY;

pub const PASCAL: f64 = 1.0;
pub const BARSA: f64 = 1.0e5 * PASCAL;
pub const ATM: f64 = 101_325.0 * PASCAL;

pub const POISE: f64 = 0.1;
pub const CENTI_POISE: f64 = 0.01 * POISE;

pub const DARCY: f64 = 9.869_233e-13;
pub const MILLI_DARCY: f64 = 1.0e-3 * DARCY;

/// Standard gravity, m/s².
pub const GRAVITY: f64 = 9.806_65;
