//! Small vector helpers shared by the steering, formation, and batch code.
//!
//! The simulation is y-up: the horizontal plane is x/z and headings are
//! measured as yaw around the y axis, with yaw `0` facing `+z`.

use std::f32::consts::{PI, TAU};

use glam::{Quat, Vec3};

/// Below this squared length a vector is treated as zero.
pub const VECTOR_EPSILON_SQ: f32 = 1e-6;

/// Project a vector onto the horizontal (x/z) plane.
pub const fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Horizontal distance between two points.
pub fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    horizontal(a - b).length()
}

/// Clamp a vector's length to `max`. Non-positive `max` yields zero.
pub fn truncate(v: Vec3, max: f32) -> Vec3 {
    if max <= 0.0 {
        return Vec3::ZERO;
    }
    v.clamp_length_max(max)
}

/// Normalize `v`, or return `None` if it is too short to have a direction.
pub fn try_direction(v: Vec3) -> Option<Vec3> {
    if v.length_squared() < VECTOR_EPSILON_SQ {
        None
    } else {
        Some(v.normalize())
    }
}

/// Yaw angle (radians around +y) of a horizontal direction. `+z` is `0`.
pub fn yaw_of(direction: Vec3) -> f32 {
    direction.x.atan2(direction.z)
}

/// Rotation that turns `+z` into the horizontal part of `heading`.
///
/// Falls back to the identity rotation if `heading` has no horizontal part.
pub fn yaw_rotation(heading: Vec3) -> Quat {
    try_direction(horizontal(heading)).map_or(Quat::IDENTITY, |dir| Quat::from_rotation_y(yaw_of(dir)))
}

/// Unit vector pointing to the right of a horizontal heading (`+x` for `+z`).
pub fn right_of(heading: Vec3) -> Vec3 {
    Vec3::new(heading.z, 0.0, -heading.x).normalize_or_zero()
}

/// Turn the horizontal heading `current` toward `desired` by at most
/// `max_angle` radians of yaw, returning the new unit heading.
///
/// Both inputs are projected onto the horizontal plane. Degenerate inputs
/// return `current` unchanged (or `desired` when `current` has no
/// direction).
pub fn rotate_towards(current: Vec3, desired: Vec3, max_angle: f32) -> Vec3 {
    let Some(to) = try_direction(horizontal(desired)) else {
        return current;
    };
    let Some(from) = try_direction(horizontal(current)) else {
        return to;
    };
    let from_yaw = yaw_of(from);
    let delta = wrap_angle(yaw_of(to) - from_yaw);
    if delta.abs() <= max_angle {
        return to;
    }
    let step = delta.clamp(-max_angle, max_angle);
    Quat::from_rotation_y(from_yaw + step) * Vec3::Z
}

/// Wrap an angle into `[-π, π]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped < -PI { wrapped + TAU } else { wrapped }
}
