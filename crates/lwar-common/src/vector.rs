// vector.rs — 2-D vector math for the simulation

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

pub type Real = f32;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: Real,
    pub y: Real,
}

pub const VEC2_ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

impl Vec2 {
    pub const fn new(x: Real, y: Real) -> Self {
        Self { x, y }
    }

    pub fn dot(self, o: Vec2) -> Real {
        self.x * o.x + self.y * o.y
    }

    pub fn dot_sq(self) -> Real {
        self.dot(self)
    }

    pub fn len(self) -> Real {
        self.dot_sq().sqrt()
    }

    pub fn dist(self, o: Vec2) -> Real {
        (self - o).len()
    }

    pub fn dist_sq(self, o: Vec2) -> Real {
        (self - o).dot_sq()
    }

    pub fn scale(self, s: Real) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn normalize(self) -> Vec2 {
        let s = self.len();
        Vec2::new(self.x / s, self.y / s)
    }

    /// ( cos phi   -sin phi ) ( x )
    /// ( sin phi    cos phi ) ( y )
    pub fn rotate(self, phi: Real) -> Vec2 {
        let (sin, cos) = phi.sin_cos();
        Vec2::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }

    pub fn arctan(self) -> Real {
        self.y.atan2(self.x)
    }

    /// Split `self` into the component parallel to `b` and the rest, such
    /// that `self = parallel + rest`. `b` must be normalized.
    pub fn project(self, b: Vec2) -> (Vec2, Vec2) {
        let p = b.scale(self.dot(b));
        (p, self - p)
    }
}

/// Unit vector for angle `phi`.
pub fn unit(phi: Real) -> Vec2 {
    let (sin, cos) = phi.sin_cos();
    Vec2::new(cos, sin)
}

/// Unit vector for `phi + pi/2`.
pub fn ortho(phi: Real) -> Vec2 {
    let (sin, cos) = phi.sin_cos();
    Vec2::new(-sin, cos)
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, o: Vec2) -> Vec2 {
        Vec2::new(self.x + o.x, self.y + o.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, o: Vec2) {
        self.x += o.x;
        self.y += o.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, o: Vec2) -> Vec2 {
        Vec2::new(self.x - o.x, self.y - o.y)
    }
}

impl Mul<Real> for Vec2 {
    type Output = Vec2;
    fn mul(self, s: Real) -> Vec2 {
        self.scale(s)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

pub fn rad(deg: Real) -> Real {
    deg * std::f32::consts::PI / 180.0
}

/// Orientation angle in hundredths of a degree, as carried by the update
/// formats.
pub fn deg100(phi: Real) -> u16 {
    let d = phi * 180.0 / std::f32::consts::PI * 100.0;
    d.rem_euclid(360.0 * 100.0) as u16
}

/// Solve `a x^2 + b x + c = 0`. Returns the real solutions, smaller first.
pub fn roots(a: Real, b: Real, c: Real) -> Option<(Real, Real)> {
    let d = b * b - 4.0 * a * c;
    if d < 0.0 {
        return None;
    }
    let sq = d.sqrt();
    let x0 = (-b - sq) / (2.0 * a);
    let x1 = (-b + sq) / (2.0 * a);
    Some((x0, x1))
}

/// The smallest strictly positive root, if any.
pub fn smallest_positive_root(a: Real, b: Real, c: Real) -> Option<Real> {
    let (x0, x1) = roots(a, b, c)?;
    if x0 > 0.0 {
        Some(x0)
    } else if x1 > 0.0 {
        Some(x1)
    } else {
        None
    }
}
