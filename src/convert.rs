//! Axis-system conversion
//!
//! Scene geometry is authored in a Z-up, right-handed system; the runtime
//! consumes Y-up, left-handed data. Vectors remap as (x, y, z) -> (-x, z, -y),
//! quaternions as (x, y, z, w) -> (x, -z, y, w) and scales swap their Y/Z
//! components without negation. The handedness flip also reverses triangle
//! winding, which the mesh builder compensates for at emission time.

use glam::{Quat, Vec3, Vec4};

/// Convert a direction or position vector to the runtime axis system.
pub fn convert_vector(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, v.z, -v.y)
}

/// Convert a rotation quaternion to the runtime axis system.
pub fn convert_quat(q: Quat) -> Quat {
    Quat::from_xyzw(q.x, -q.z, q.y, q.w)
}

/// Convert a scale vector to the runtime axis system.
pub fn convert_scale(s: Vec3) -> Vec3 {
    Vec3::new(s.x, s.z, s.y)
}

/// Convert a sign-encoded tangent (xyz direction + w bitangent sign).
///
/// The direction converts like any vector; the bitangent sign flips with the
/// handedness change.
pub fn convert_tangent(t: Vec4) -> Vec4 {
    Vec4::new(-t.x, t.z, -t.y, -t.w)
}
