//! Animatable values
//!
//! Numbers and colors interpolate linearly. Everything else is discrete: the
//! start value holds until the end of the segment, then snaps.

use weft_core::{Color, Value};

/// Trait for values that can be linearly interpolated
pub trait Interpolate: Clone {
    /// Linearly interpolate between self and other by factor t (0.0 to 1.0)
    fn lerp(&self, other: &Self, t: f32) -> Self;

    /// Check if two values are approximately equal
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;
}

impl Interpolate for f32 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self - other).abs() < epsilon
    }
}

impl Interpolate for f64 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t as f64
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self - other).abs() < epsilon as f64
    }
}

impl Interpolate for Color {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Color::lerp(self, other, t)
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.r - other.r).abs() < epsilon
            && (self.g - other.g).abs() < epsilon
            && (self.b - other.b).abs() < epsilon
            && (self.a - other.a).abs() < epsilon
    }
}

/// Whether `value` interpolates smoothly
pub fn is_animatable(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Color(_))
}

/// Interpolate two property values at eased progress `t`
pub fn interpolate(from: &Value, to: &Value, t: f32) -> Value {
    match (from, to) {
        (Value::Float(a), Value::Float(b)) => Value::Float(a.lerp(b, t)),
        (Value::Int(a), Value::Float(b)) => Value::Float((*a as f64).lerp(b, t)),
        (Value::Float(a), Value::Int(b)) => Value::Float(a.lerp(&(*b as f64), t)),
        (Value::Int(a), Value::Int(b)) => {
            Value::Int((*a as f64).lerp(&(*b as f64), t).round() as i64)
        }
        (Value::Color(a), Value::Color(b)) => Value::Color(a.lerp(b, t)),
        _ => {
            if t >= 1.0 {
                to.clone()
            } else {
                from.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(
            interpolate(&Value::Float(0.0), &Value::Float(10.0), 0.5),
            Value::Float(5.0)
        );
        assert_eq!(interpolate(&Value::Int(0), &Value::Int(3), 0.5), Value::Int(2));
    }

    #[test]
    fn test_color() {
        let mid = interpolate(&Color::BLACK.into(), &Color::WHITE.into(), 0.5);
        let mid = mid.as_color().unwrap();
        assert!(mid.approx_eq(&Color::GRAY, 0.001));
    }

    #[test]
    fn test_discrete() {
        let from = Value::str("Visible");
        let to = Value::str("Collapsed");
        assert_eq!(interpolate(&from, &to, 0.99), from);
        assert_eq!(interpolate(&from, &to, 1.0), to);
        assert!(!is_animatable(&from));
    }
}
