// ============================================================
// Layer 3 — Head Pose Domain Type
// ============================================================
// A head pose is three rotation angles in degrees:
//   - yaw   (turning left/right)
//   - pitch (nodding up/down)
//   - roll  (tilting towards a shoulder)
//
// The network does not regress the angles directly. Each angle
// is discretised into one of 66 bins of 3 degrees covering
// [-99°, 99°), and the three heads classify the bin:
//
//   bin 0  → [-99°, -96°)
//   bin 1  → [-96°, -93°)
//   ...
//   bin 65 → [ 96°,  99°)
//
// The expected bin index under the softmax distribution
// (soft-argmax) is mapped back to degrees with `bin * 3 - 99`.

use serde::{Deserialize, Serialize};

/// Number of angle bins per axis
pub const NUM_BINS: usize = 66;

/// Width of one bin in degrees
pub const BIN_WIDTH: f32 = 3.0;

/// Lower edge of bin 0 in degrees
pub const BIN_OFFSET: f32 = -99.0;

/// Map an angle in degrees to its bin index.
/// Angles outside [-99°, 99°) are clamped to the edge bins.
pub fn angle_to_bin(degrees: f32) -> usize {
    let raw = ((degrees - BIN_OFFSET) / BIN_WIDTH).floor();
    raw.clamp(0.0, (NUM_BINS - 1) as f32) as usize
}

/// Map a (possibly fractional) bin index back to degrees.
pub fn bin_to_angle(bin: f32) -> f32 {
    bin * BIN_WIDTH + BIN_OFFSET
}

/// Ground truth pose of one face, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw:   f32,
    pub pitch: f32,
    pub roll:  f32,
}

impl HeadPose {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Build a pose from AFLW annotation values (radians).
    /// AFLW stores roll with the opposite sign convention.
    pub fn from_aflw_radians(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self {
            yaw:   yaw.to_degrees(),
            pitch: pitch.to_degrees(),
            roll:  -roll.to_degrees(),
        }
    }

    /// Angles in (yaw, pitch, roll) order
    pub fn angles(&self) -> [f32; 3] {
        [self.yaw, self.pitch, self.roll]
    }

    /// Bin classes in (yaw, pitch, roll) order
    pub fn bins(&self) -> [usize; 3] {
        [
            angle_to_bin(self.yaw),
            angle_to_bin(self.pitch),
            angle_to_bin(self.roll),
        ]
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_edges() {
        assert_eq!(angle_to_bin(-99.0), 0);
        assert_eq!(angle_to_bin(-96.1), 0);
        assert_eq!(angle_to_bin(-96.0), 1);
        assert_eq!(angle_to_bin(0.0),   33);
        assert_eq!(angle_to_bin(98.9),  65);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(angle_to_bin(-150.0), 0);
        assert_eq!(angle_to_bin(99.0),   65);
        assert_eq!(angle_to_bin(180.0),  65);
    }

    #[test]
    fn test_bin_to_angle_is_lower_edge() {
        assert_eq!(bin_to_angle(0.0),  -99.0);
        assert_eq!(bin_to_angle(33.0),   0.0);
        assert_eq!(bin_to_angle(65.0),  96.0);
    }

    #[test]
    fn test_aflw_conversion_negates_roll() {
        // 0.5 rad ≈ 28.65°, stored negated
        let pose = HeadPose::from_aflw_radians(0.0, 0.0, 0.5);
        assert!((pose.roll + 28.6479).abs() < 1e-3);
        assert_eq!(pose.bins(), [33, 33, 23]);
    }
}
