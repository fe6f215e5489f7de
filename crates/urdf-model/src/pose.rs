//! Pose type and rotation conversions

use std::f64::consts::{PI, TAU};

use glam::{DMat3, DMat4, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};

/// Pose (position and orientation)
///
/// Angles follow the URDF convention: extrinsic roll/pitch/yaw about the
/// fixed X, Y, Z axes, i.e. `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub xyz: [f64; 3],
    pub rpy: [f64; 3], // roll, pitch, yaw in radians
}

impl Pose {
    pub fn new(xyz: [f64; 3], rpy: [f64; 3]) -> Self {
        Self { xyz, rpy }
    }

    /// Convert to quaternion representation
    pub fn to_quat(&self) -> DQuat {
        DQuat::from_euler(EulerRot::ZYX, self.rpy[2], self.rpy[1], self.rpy[0])
    }

    pub fn to_dmat4(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.to_quat(), DVec3::from(self.xyz))
    }

    /// Convert to a matrix with the translation multiplied per-axis by `scale`.
    ///
    /// The rotation part is unaffected; only joint-origin offsets stretch when
    /// an instance carries a non-uniform scale.
    pub fn to_dmat4_scaled(&self, scale: DVec3) -> DMat4 {
        DMat4::from_rotation_translation(self.to_quat(), DVec3::from(self.xyz) * scale)
    }

    /// Get position as DVec3
    pub fn position(&self) -> DVec3 {
        DVec3::from(self.xyz)
    }

    /// Extract translation and roll/pitch/yaw from a rigid transform.
    ///
    /// The generic arctangent extraction is unstable near pitch = ±90°, so
    /// when `sqrt(r21² + r22²)` vanishes the roll is recovered from the
    /// second row instead and yaw is pinned to zero. The result still
    /// reproduces the input rotation; only the (degenerate) split between
    /// roll and yaw is conventional.
    pub fn from_dmat4(mat: &DMat4) -> Self {
        let t = mat.w_axis;

        let r00 = mat.x_axis.x;
        let r10 = mat.x_axis.y;
        let r20 = mat.x_axis.z;
        let r21 = mat.y_axis.z;
        let r22 = mat.z_axis.z;
        let m11 = mat.y_axis.y;
        let m12 = mat.z_axis.y;

        let sy = (r21 * r21 + r22 * r22).sqrt();
        let pitch = (-r20).atan2(sy);
        let (roll, yaw) = if sy > 1e-8 {
            (r21.atan2(r22), r10.atan2(r00))
        } else {
            ((-m12).atan2(m11), 0.0)
        };

        Self {
            xyz: [t.x, t.y, t.z],
            rpy: [roll, pitch, yaw],
        }
    }

    /// Normalize all three angles into (-PI, PI]
    pub fn normalized_rpy(&self) -> Self {
        Self {
            xyz: self.xyz,
            rpy: [
                normalize_angle(self.rpy[0]),
                normalize_angle(self.rpy[1]),
                normalize_angle(self.rpy[2]),
            ],
        }
    }
}

/// Wrap an angle into (-PI, PI]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle;
    while a <= -PI {
        a += TAU;
    }
    while a > PI {
        a -= TAU;
    }
    a
}

/// Normalize a quaternion and flip it into the w >= 0 hemisphere.
///
/// q and -q describe the same rotation; picking the non-negative scalar
/// component gives every orientation a unique textual representation.
/// A degenerate (zero-length) input collapses to identity.
pub fn canonicalize_quat(q: DQuat) -> DQuat {
    let len = q.length();
    if len < 1e-12 {
        return DQuat::IDENTITY;
    }
    let q = q / len;
    if q.w < 0.0 { -q } else { q }
}

/// Rotate a vector by the rotation part of a transform and renormalize.
///
/// A zero-length input (or one collapsed by the transform) falls back to
/// the unit X axis.
pub fn rotate_axis(mat: &DMat4, axis: DVec3) -> DVec3 {
    let rotated = DMat3::from_mat4(*mat) * axis;
    let len = rotated.length();
    if len < 1e-12 {
        DVec3::X
    } else {
        rotated / len
    }
}
