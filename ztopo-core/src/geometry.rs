use glam::DVec2;
use serde::{Deserialize, Serialize};

/// 二维点，内部以 `glam::DVec2` 表示，全部几何运算使用双精度。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2(pub DVec2);

impl Point2 {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self(DVec2::new(x, y))
    }

    #[inline]
    pub fn from_vec(vec: DVec2) -> Self {
        Self(vec)
    }

    #[inline]
    pub fn x(self) -> f64 {
        self.0.x
    }

    #[inline]
    pub fn y(self) -> f64 {
        self.0.y
    }

    #[inline]
    pub fn translate(self, offset: Vector2) -> Self {
        Self(self.0 + offset.0)
    }

    #[inline]
    pub fn vector_to(self, other: Point2) -> Vector2 {
        Vector2(other.0 - self.0)
    }

    #[inline]
    pub fn as_vec2(self) -> DVec2 {
        self.0
    }

    #[inline]
    pub fn distance(self, other: Point2) -> f64 {
        self.0.distance(other.0)
    }

    #[inline]
    pub fn distance_squared(self, other: Point2) -> f64 {
        self.0.distance_squared(other.0)
    }

    #[inline]
    pub fn midpoint(self, other: Point2) -> Point2 {
        Self((self.0 + other.0) * 0.5)
    }

    #[inline]
    pub fn lerp(self, other: Point2, t: f64) -> Point2 {
        Self(self.0.lerp(other.0, t))
    }

    /// 容差意义下的点重合判定。
    #[inline]
    pub fn approx_eq(self, other: Point2, tolerance: f64) -> bool {
        self.distance_squared(other) <= tolerance * tolerance
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl From<DVec2> for Point2 {
    fn from(value: DVec2) -> Self {
        Self::from_vec(value)
    }
}

/// 二维向量。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector2(pub DVec2);

impl Vector2 {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self(DVec2::new(x, y))
    }

    #[inline]
    pub fn from_points(start: Point2, end: Point2) -> Self {
        Self(end.0 - start.0)
    }

    #[inline]
    pub fn length(self) -> f64 {
        self.0.length()
    }

    #[inline]
    pub fn length_squared(self) -> f64 {
        self.0.length_squared()
    }

    #[inline]
    pub fn as_vec2(self) -> DVec2 {
        self.0
    }

    #[inline]
    pub fn x(self) -> f64 {
        self.0.x
    }

    #[inline]
    pub fn y(self) -> f64 {
        self.0.y
    }

    /// 二维叉积（z 分量），为正表示 `other` 位于左侧。
    #[inline]
    pub fn cross(self, other: Vector2) -> f64 {
        self.0.perp_dot(other.0)
    }

    #[inline]
    pub fn dot(self, other: Vector2) -> f64 {
        self.0.dot(other.0)
    }

    /// 左法向（逆时针旋转 90°）。
    #[inline]
    pub fn perp(self) -> Vector2 {
        Self(self.0.perp())
    }

    #[inline]
    pub fn scale(self, factor: f64) -> Vector2 {
        Self(self.0 * factor)
    }

    #[inline]
    pub fn normalize(self) -> Option<Self> {
        let len = self.0.length();
        if len <= f64::EPSILON {
            None
        } else {
            Some(Self(self.0 / len))
        }
    }
}

impl From<DVec2> for Vector2 {
    fn from(value: DVec2) -> Self {
        Self(value)
    }
}

/// 轴对齐边界框，用于结果范围与空间预筛。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds2D {
    min: Point2,
    max: Point2,
}

impl Bounds2D {
    #[inline]
    pub fn new(min: Point2, max: Point2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::INFINITY, f64::INFINITY),
            max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point2>,
    {
        let mut bounds = Self::empty();
        for point in points {
            bounds.include_point(point);
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x() > self.max.x() || self.min.y() > self.max.y()
    }

    #[inline]
    pub fn min(&self) -> Point2 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Point2 {
        self.max
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x() - self.min.x()
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y() - self.min.y()
    }

    pub fn include_point(&mut self, point: Point2) {
        if self.is_empty() {
            self.min = point;
            self.max = point;
            return;
        }
        let min_vec = self.min.as_vec2().min(point.as_vec2());
        let max_vec = self.max.as_vec2().max(point.as_vec2());
        self.min = Point2::from_vec(min_vec);
        self.max = Point2::from_vec(max_vec);
    }

    pub fn include_bounds(&mut self, other: &Bounds2D) {
        if other.is_empty() {
            return;
        }
        self.include_point(other.min);
        self.include_point(other.max);
    }

    #[inline]
    pub fn center(&self) -> Point2 {
        debug_assert!(!self.is_empty());
        let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
        Point2::from_vec(center)
    }

    /// 向四周扩展 `pad`，空框保持为空。
    pub fn expanded(&self, pad: f64) -> Bounds2D {
        if self.is_empty() {
            return *self;
        }
        let pad = DVec2::splat(pad);
        Bounds2D::new(
            Point2::from_vec(self.min.as_vec2() - pad),
            Point2::from_vec(self.max.as_vec2() + pad),
        )
    }

    /// 判定两个边界框是否相交（含 `tolerance` 的接触）。
    pub fn intersects(&self, other: &Bounds2D, tolerance: f64) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min.x() <= other.max.x() + tolerance
            && other.min.x() <= self.max.x() + tolerance
            && self.min.y() <= other.max.y() + tolerance
            && other.min.y() <= self.max.y() + tolerance
    }

    pub fn contains_point(&self, point: Point2, tolerance: f64) -> bool {
        !self.is_empty()
            && point.x() >= self.min.x() - tolerance
            && point.x() <= self.max.x() + tolerance
            && point.y() >= self.min.y() - tolerance
            && point.y() <= self.max.y() + tolerance
    }

    /// 两个边界框的交集，不相交时返回 `None`。
    pub fn intersection(&self, other: &Bounds2D) -> Option<Bounds2D> {
        if !self.intersects(other, 0.0) {
            return None;
        }
        let min = self.min.as_vec2().max(other.min.as_vec2());
        let max = self.max.as_vec2().min(other.max.as_vec2());
        Some(Bounds2D::new(Point2::from_vec(min), Point2::from_vec(max)))
    }
}
