//! Axis-aligned bounding boxes in world space. Used for camera framing, the
//! bounding-box fitting fallback, and coverage overlap tests.

use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that unions as the identity element.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        let mut aabb = Self::EMPTY;
        for point in points {
            aabb.grow(Vec3::from(*point));
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Pad every face outward by `amount` world units.
    pub fn expanded(&self, amount: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// The box enclosing this box after an affine transform, built from the
    /// eight transformed corners.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for corner in 0..8 {
            let point = Vec3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(matrix.transform_point3(point));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn union_ignores_empty_operands() {
        let unit = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(Aabb::EMPTY.union(&unit), unit);
        assert_eq!(unit.union(&Aabb::EMPTY), unit);
    }

    #[test]
    fn expanded_box_gains_tolerance_on_every_face() {
        let unit = Aabb::new(Vec3::ZERO, Vec3::ONE).expanded(0.01);
        assert!((unit.min.x + 0.01).abs() < 1e-6);
        assert!((unit.max.y - 1.01).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_do_not_intersect_until_expanded() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(1.005), Vec3::splat(2.0));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&b.expanded(0.01)));
    }

    #[test]
    fn transform_rotates_corners() {
        let slab = Aabb::new(Vec3::new(-2.0, 0.0, -0.5), Vec3::new(2.0, 1.0, 0.5));
        let quarter_turn = Mat4::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let turned = slab.transformed(&quarter_turn);
        assert!((turned.size().x - 1.0).abs() < 1e-5);
        assert!((turned.size().z - 4.0).abs() < 1e-5);
    }

    #[test]
    fn empty_box_has_zero_size() {
        assert_eq!(Aabb::EMPTY.size(), Vec3::ZERO);
        assert!(!Aabb::EMPTY.intersects(&Aabb::new(Vec3::ZERO, Vec3::ONE)));
    }
}
