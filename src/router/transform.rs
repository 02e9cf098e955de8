//! Axis value transforms
//!
//! Both transforms deserialize from the compact array form used in the
//! configuration file: `remap = [in_min, in_max, out_min, out_max]` and
//! `deadzone = [start, end, value]`.

use serde::{Deserialize, Serialize};

/// Clamped piecewise-linear rescale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Remap {
    pub input_min: f64,
    pub input_max: f64,
    pub output_min: f64,
    pub output_max: f64,
}

impl Remap {
    pub fn new(input_min: f64, input_max: f64, output_min: f64, output_max: f64) -> Self {
        Self {
            input_min,
            input_max,
            output_min,
            output_max,
        }
    }

    /// At or below `input_min` gives `output_min`, at or above `input_max`
    /// gives `output_max`, linear in between
    pub fn apply(&self, value: f64) -> f64 {
        if value <= self.input_min {
            return self.output_min;
        }
        if value >= self.input_max {
            return self.output_max;
        }
        let ratio = (self.output_max - self.output_min) / (self.input_max - self.input_min);
        (value - self.input_min) * ratio + self.output_min
    }
}

/// Inclusive band forced to a fixed output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deadzone {
    pub start: f64,
    pub end: f64,
    pub value: f64,
}

impl Deadzone {
    pub fn new(start: f64, end: f64, value: f64) -> Self {
        Self { start, end, value }
    }

    pub fn apply(&self, value: f64) -> f64 {
        if value >= self.start && value <= self.end {
            self.value
        } else {
            value
        }
    }
}

/// Remap followed by deadzone; either stage is optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remap: Option<Remap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadzone: Option<Deadzone>,
}

impl AxisTransform {
    pub fn apply(&self, value: f64) -> f64 {
        let value = self.remap.map_or(value, |remap| remap.apply(value));
        self.deadzone.map_or(value, |deadzone| deadzone.apply(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn remap_clamps_at_boundaries() {
        let remap = Remap::new(0.1, 0.9, -1.0, 1.0);
        assert_eq!(remap.apply(0.1), -1.0);
        assert_eq!(remap.apply(0.9), 1.0);
        assert_eq!(remap.apply(-5.0), -1.0);
        assert_eq!(remap.apply(5.0), 1.0);
    }

    #[test]
    fn remap_interpolates_linearly() {
        let remap = Remap::new(0.0, 1.0, 10.0, 20.0);
        assert!(close(remap.apply(0.25), 12.5));
        assert!(close(remap.apply(0.5), 15.0));
    }

    #[test]
    fn remap_is_monotonic() {
        let remap = Remap::new(0.2, 0.8, 0.0, 100.0);
        let samples: Vec<f64> = (0..=1023).map(|raw| remap.apply(raw as f64 / 1023.0)).collect();
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn inverted_remap() {
        let remap = Remap::new(0.0, 1.0, 1.0, 0.0);
        assert_eq!(remap.apply(0.0), 1.0);
        assert_eq!(remap.apply(1.0), 0.0);
        assert!(close(remap.apply(0.75), 0.25));
    }

    #[test]
    fn deadzone_band_is_inclusive() {
        let deadzone = Deadzone::new(0.45, 0.55, 0.5);
        assert_eq!(deadzone.apply(0.45), 0.5);
        assert_eq!(deadzone.apply(0.55), 0.5);
        assert_eq!(deadzone.apply(0.449), 0.449);
        assert_eq!(deadzone.apply(0.9), 0.9);
    }

    #[test]
    fn deadzone_wins_over_remap() {
        let transform = AxisTransform {
            remap: Some(Remap::new(0.0, 1.0, -1.0, 1.0)),
            deadzone: Some(Deadzone::new(-0.1, 0.1, 0.0)),
        };
        // 0.52 remaps to 0.04, inside the band
        assert_eq!(transform.apply(0.52), 0.0);
        assert!(close(transform.apply(1.0), 1.0));
    }

    #[test]
    fn empty_transform_is_identity() {
        assert_eq!(AxisTransform::default().apply(0.3), 0.3);
    }

    #[test]
    fn deserializes_from_arrays() {
        let transform: AxisTransform =
            toml::from_str("remap = [0.0, 1.0, 1.0, 0.0]\ndeadzone = [0.4, 0.6, 0.5]").unwrap();
        assert_eq!(transform.remap, Some(Remap::new(0.0, 1.0, 1.0, 0.0)));
        assert_eq!(transform.deadzone, Some(Deadzone::new(0.4, 0.6, 0.5)));
    }
}
