//! Sensor data processing layer.

pub mod preprocessing;
