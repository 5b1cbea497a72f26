use std::f64::consts::{FRAC_PI_2, TAU};

use serde::{Deserialize, Serialize};

use crate::document::{
    self, Arc, Circle, Entity, Line, Polyline, PolylineVertex, include_arc_bounds,
    normalize_angle,
};
use crate::geometry::{Bounds2D, Point2, Vector2};

/// 凸度绝对值小于该值的段按直线处理。
pub const BULGE_EPSILON: f64 = 1e-12;

const PARAM_EPSILON: f64 = 1e-12;
const MAX_ARC_STEPS: usize = 512;

/// 一段直线或圆弧，凸度语义与多段线顶点一致。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Point2,
    pub end: Point2,
    pub bulge: f64,
}

/// 圆弧段的几何参数，`sweep` 带符号，正值为逆时针。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcGeometry {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    pub sweep: f64,
}

impl ArcGeometry {
    #[inline]
    pub fn point_at_angle(&self, angle: f64) -> Point2 {
        document::arc_point(self.center, self.radius, angle)
    }

    /// 角度落在扫掠范围内时返回段参数 `t ∈ [0, 1]`。
    pub fn param_of_angle(&self, angle: f64, tolerance: f64) -> Option<f64> {
        let span = self.sweep.abs();
        let delta = if self.sweep > 0.0 {
            normalize_angle(angle - self.start_angle)
        } else {
            normalize_angle(self.start_angle - angle)
        };
        if delta <= span + tolerance {
            Some((delta / span).min(1.0))
        } else if TAU - delta <= tolerance {
            Some(0.0)
        } else {
            None
        }
    }
}

impl Segment {
    #[inline]
    pub fn new(start: Point2, end: Point2, bulge: f64) -> Self {
        Self { start, end, bulge }
    }

    #[inline]
    pub fn chord_length(&self) -> f64 {
        self.start.distance(self.end)
    }

    #[inline]
    pub fn is_arc(&self) -> bool {
        self.bulge.abs() > BULGE_EPSILON && self.chord_length() > f64::EPSILON
    }

    /// 圆心角，`θ = 4·atan(bulge)`。
    #[inline]
    pub fn sweep(&self) -> f64 {
        4.0 * self.bulge.atan()
    }

    /// 圆心位于弦的左法向上，偏移量 `c(1−b²)/(4b)`。
    pub fn arc(&self) -> Option<ArcGeometry> {
        if !self.is_arc() {
            return None;
        }
        let chord = self.start.vector_to(self.end);
        let length = chord.length();
        let normal = chord.perp().scale(1.0 / length);
        let bulge = self.bulge;
        let offset = length * (1.0 - bulge * bulge) / (4.0 * bulge);
        let center = self.start.midpoint(self.end).translate(normal.scale(offset));
        let sweep = self.sweep();
        let radius = length / (2.0 * (sweep * 0.5).sin().abs());
        let to_start = center.vector_to(self.start);
        let start_angle = to_start.y().atan2(to_start.x());
        Some(ArcGeometry {
            center,
            radius,
            start_angle,
            sweep,
        })
    }

    pub fn point_at(&self, t: f64) -> Point2 {
        match self.arc() {
            Some(arc) => arc.point_at_angle(arc.start_angle + arc.sweep * t),
            None => self.start.lerp(self.end, t),
        }
    }

    /// 关于段参数 `t` 的一阶导数。
    pub fn derivative(&self, t: f64) -> Vector2 {
        match self.arc() {
            Some(arc) => {
                let angle = arc.start_angle + arc.sweep * t;
                Vector2::new(-angle.sin(), angle.cos()).scale(arc.radius * arc.sweep)
            }
            None => self.start.vector_to(self.end),
        }
    }

    pub fn second_derivative(&self, t: f64) -> Vector2 {
        match self.arc() {
            Some(arc) => {
                let angle = arc.start_angle + arc.sweep * t;
                Vector2::new(angle.cos(), angle.sin())
                    .scale(-arc.radius * arc.sweep * arc.sweep)
            }
            None => Vector2::new(0.0, 0.0),
        }
    }

    pub fn length(&self) -> f64 {
        match self.arc() {
            Some(arc) => arc.radius * arc.sweep.abs(),
            None => self.chord_length(),
        }
    }

    pub fn bounds(&self) -> Bounds2D {
        let mut bounds = Bounds2D::empty();
        bounds.include_point(self.start);
        bounds.include_point(self.end);
        if let Some(arc) = self.arc() {
            let (low, high) = if arc.sweep > 0.0 {
                (arc.start_angle, arc.start_angle + arc.sweep)
            } else {
                (arc.start_angle + arc.sweep, arc.start_angle)
            };
            include_arc_bounds(arc.center, arc.radius, low, high, &mut bounds);
        }
        bounds
    }

    /// 子区间 `[ta, tb]` 对应的凸度。
    pub fn partial_bulge(&self, ta: f64, tb: f64) -> f64 {
        if self.is_arc() {
            (self.sweep() * (tb - ta) / 4.0).tan()
        } else {
            0.0
        }
    }

    pub fn reversed(&self) -> Segment {
        Segment::new(self.end, self.start, -self.bulge)
    }

    /// 按弦高容差离散化，结果包含两个端点。
    pub fn tessellate(&self, chord_tolerance: f64) -> Vec<Point2> {
        let Some(arc) = self.arc() else {
            return vec![self.start, self.end];
        };
        let step = if chord_tolerance <= 0.0 || chord_tolerance >= arc.radius {
            FRAC_PI_2
        } else {
            (2.0 * (1.0 - chord_tolerance / arc.radius).acos()).min(FRAC_PI_2)
        };
        let steps = ((arc.sweep.abs() / step).ceil() as usize).clamp(1, MAX_ARC_STEPS);
        let mut points = Vec::with_capacity(steps + 1);
        points.push(self.start);
        for index in 1..steps {
            let t = index as f64 / steps as f64;
            points.push(arc.point_at_angle(arc.start_angle + arc.sweep * t));
        }
        points.push(self.end);
        points
    }

    /// 段上离 `point` 最近的位置，返回 `(t, 点)`。
    pub fn closest_point(&self, point: Point2) -> (f64, Point2) {
        if let Some(arc) = self.arc() {
            let to_point = arc.center.vector_to(point);
            if to_point.length() > f64::EPSILON {
                let angle = to_point.y().atan2(to_point.x());
                if let Some(t) = arc.param_of_angle(angle, 0.0) {
                    return (t, arc.point_at_angle(angle));
                }
            }
            let to_start = point.distance_squared(self.start);
            let to_end = point.distance_squared(self.end);
            return if to_start <= to_end {
                (0.0, self.start)
            } else {
                (1.0, self.end)
            };
        }
        let direction = self.start.vector_to(self.end);
        let length_sq = direction.length_squared();
        if length_sq <= f64::EPSILON * f64::EPSILON {
            return (0.0, self.start);
        }
        let t = (self.start.vector_to(point).dot(direction) / length_sq).clamp(0.0, 1.0);
        (t, self.start.lerp(self.end, t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurveKind {
    Line,
    Arc,
    Circle,
    Polyline,
}

/// 曲线的统一表示：带凸度的顶点序列。
///
/// 参数 `u` 取值 `[0, segment_count]`，整数部分为段序号，小数部分为段内参数。
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub kind: CurveKind,
    pub vertices: Vec<PolylineVertex>,
    pub is_closed: bool,
}

impl Curve {
    pub fn line(start: Point2, end: Point2) -> Self {
        Self {
            kind: CurveKind::Line,
            vertices: vec![PolylineVertex::new(start), PolylineVertex::new(end)],
            is_closed: false,
        }
    }

    /// 由顶点序列构造，开放的两点曲线按凸度推断为直线或圆弧。
    pub fn polyline(vertices: Vec<PolylineVertex>, is_closed: bool) -> Self {
        let kind = if !is_closed && vertices.len() == 2 {
            if vertices[0].bulge.abs() > BULGE_EPSILON {
                CurveKind::Arc
            } else {
                CurveKind::Line
            }
        } else {
            CurveKind::Polyline
        };
        Self {
            kind,
            vertices,
            is_closed,
        }
    }

    pub fn from_points<I>(points: I, is_closed: bool) -> Self
    where
        I: IntoIterator<Item = Point2>,
    {
        Self::polyline(points.into_iter().map(PolylineVertex::new).collect(), is_closed)
    }

    /// 文字不是曲线，返回 `None`。
    pub fn from_entity(entity: &Entity) -> Option<Curve> {
        match entity {
            Entity::Line(line) => Some(Curve::line(line.start, line.end)),
            Entity::Circle(circle) => Some(Curve::circle(circle.center, circle.radius)),
            Entity::Arc(arc) => {
                let sweep = arc.sweep();
                if sweep >= TAU - 1e-12 {
                    return Some(Curve::circle(arc.center, arc.radius));
                }
                let start = arc.start_angle;
                let start_point = document::arc_point(arc.center, arc.radius, start);
                let end_point = document::arc_point(arc.center, arc.radius, start + sweep);
                Some(Curve {
                    kind: CurveKind::Arc,
                    vertices: vec![
                        PolylineVertex::with_bulge(start_point, (sweep / 4.0).tan()),
                        PolylineVertex::new(end_point),
                    ],
                    is_closed: false,
                })
            }
            Entity::Polyline(polyline) => Some(Curve {
                kind: CurveKind::Polyline,
                vertices: polyline.vertices.clone(),
                is_closed: polyline.is_closed,
            }),
            Entity::Text(_) => None,
        }
    }

    /// 整圆表示为两段逆时针半圆。
    pub fn circle(center: Point2, radius: f64) -> Self {
        let radius = radius.abs();
        Self {
            kind: CurveKind::Circle,
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(center.x() + radius, center.y()), 1.0),
                PolylineVertex::with_bulge(Point2::new(center.x() - radius, center.y()), 1.0),
            ],
            is_closed: true,
        }
    }

    /// 转回宿主实体；直线与单段圆弧保持原类型，其余写为多段线。
    pub fn to_entity(&self, layer: impl Into<String>) -> Entity {
        let layer = layer.into();
        if !self.is_closed && self.vertices.len() == 2 {
            let segment = self.segment(0);
            match segment.arc() {
                None => {
                    return Entity::Line(Line {
                        start: segment.start,
                        end: segment.end,
                        layer,
                    });
                }
                Some(arc) if arc.sweep > 0.0 => {
                    return Entity::Arc(Arc {
                        center: arc.center,
                        radius: arc.radius,
                        start_angle: arc.start_angle,
                        end_angle: arc.start_angle + arc.sweep,
                        layer,
                    });
                }
                Some(_) => {}
            }
        }
        if self.kind == CurveKind::Circle && self.vertices.len() == 2 {
            if let Some(arc) = self.segment(0).arc() {
                if (arc.sweep.abs() - std::f64::consts::PI).abs() < 1e-9 {
                    return Entity::Circle(Circle {
                        center: arc.center,
                        radius: arc.radius,
                        layer,
                    });
                }
            }
        }
        Entity::Polyline(Polyline {
            vertices: self.vertices.clone(),
            is_closed: self.is_closed,
            layer,
        })
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn points(&self) -> impl Iterator<Item = Point2> + '_ {
        self.vertices.iter().map(|vertex| vertex.position)
    }

    pub fn segment_count(&self) -> usize {
        let count = self.vertices.len();
        match (self.is_closed, count) {
            (_, 0) | (_, 1) => 0,
            (true, n) => n,
            (false, n) => n - 1,
        }
    }

    pub fn segment(&self, index: usize) -> Segment {
        let count = self.vertices.len();
        let start = self.vertices[index];
        let end = self.vertices[(index + 1) % count];
        Segment::new(start.position, end.position, start.bulge)
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        (0..self.segment_count()).map(|index| self.segment(index))
    }

    #[inline]
    pub fn param_end(&self) -> f64 {
        self.segment_count() as f64
    }

    pub fn start(&self) -> Option<Point2> {
        self.vertices.first().map(|vertex| vertex.position)
    }

    /// 闭合曲线的终点即起点。
    pub fn end(&self) -> Option<Point2> {
        if self.is_closed {
            self.start()
        } else {
            self.vertices.last().map(|vertex| vertex.position)
        }
    }

    /// 闭合标志为真，或首尾在容差内重合。
    pub fn is_loop(&self, tolerance: f64) -> bool {
        if self.is_closed {
            return self.segment_count() >= 2;
        }
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => self.vertices.len() > 2 && start.approx_eq(end, tolerance),
            _ => false,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.vertices
            .iter()
            .all(|vertex| vertex.position.is_finite() && vertex.bulge.is_finite())
    }

    pub fn length(&self) -> f64 {
        self.segments().map(|segment| segment.length()).sum()
    }

    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        for point in self.points() {
            bounds.include_point(point);
        }
        for segment in self.segments() {
            bounds.include_bounds(&segment.bounds());
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    fn locate(&self, u: f64) -> Option<(usize, f64)> {
        let count = self.segment_count();
        if count == 0 {
            return None;
        }
        let u = u.clamp(0.0, count as f64);
        let index = (u.floor() as usize).min(count - 1);
        Some((index, u - index as f64))
    }

    pub fn point_at(&self, u: f64) -> Option<Point2> {
        match self.locate(u) {
            Some((index, t)) => Some(self.segment(index).point_at(t)),
            None => self.start(),
        }
    }

    pub fn derivative(&self, u: f64) -> Option<Vector2> {
        self.locate(u)
            .map(|(index, t)| self.segment(index).derivative(t))
    }

    pub fn second_derivative(&self, u: f64) -> Option<Vector2> {
        self.locate(u)
            .map(|(index, t)| self.segment(index).second_derivative(t))
    }

    /// 弧长比例 `fraction ∈ [0, 1]` 对应的参数。
    pub fn param_at_fraction(&self, fraction: f64) -> Option<f64> {
        let total = self.length();
        if self.segment_count() == 0 {
            return None;
        }
        if total <= f64::EPSILON {
            return Some(0.0);
        }
        let mut remaining = fraction.clamp(0.0, 1.0) * total;
        for (index, segment) in self.segments().enumerate() {
            let length = segment.length();
            if remaining <= length || index + 1 == self.segment_count() {
                let t = if length > 0.0 {
                    (remaining / length).min(1.0)
                } else {
                    0.0
                };
                return Some(index as f64 + t);
            }
            remaining -= length;
        }
        Some(self.param_end())
    }

    pub fn point_at_fraction(&self, fraction: f64) -> Option<Point2> {
        self.param_at_fraction(fraction)
            .and_then(|u| self.point_at(u))
    }

    /// 反向曲线：顶点倒序，凸度取反并前移一位。
    pub fn reversed(&self) -> Curve {
        let count = self.vertices.len();
        let mut vertices = Vec::with_capacity(count);
        for k in 0..count {
            let position = self.vertices[count - 1 - k].position;
            let bulge = if self.is_closed {
                let source = (count as isize - 2 - k as isize).rem_euclid(count as isize) as usize;
                -self.vertices[source].bulge
            } else if k + 1 < count {
                -self.vertices[count - 2 - k].bulge
            } else {
                0.0
            };
            vertices.push(PolylineVertex::with_bulge(position, bulge));
        }
        Curve {
            kind: self.kind,
            vertices,
            is_closed: self.is_closed,
        }
    }

    /// 参数区间 `[from, to]` 的子曲线；闭合曲线允许 `from >= to` 跨越接缝。
    pub fn sub_curve(&self, from: f64, to: f64) -> Option<Curve> {
        let count = self.segment_count();
        if count == 0 {
            return None;
        }
        let total = count as f64;
        let from = from.clamp(0.0, total);
        let to = to.clamp(0.0, total);
        let ranges: Vec<(f64, f64)> = if to > from + PARAM_EPSILON {
            vec![(from, to)]
        } else if self.is_closed {
            vec![(from, total), (0.0, to)]
        } else {
            return None;
        };

        let mut vertices: Vec<PolylineVertex> = Vec::new();
        for (low, high) in ranges {
            let mut u = low;
            while u < high - PARAM_EPSILON {
                let index = (u.floor() as usize).min(count - 1);
                let upper = ((index + 1) as f64).min(high);
                let segment = self.segment(index);
                let ta = u - index as f64;
                let tb = upper - index as f64;
                vertices.push(PolylineVertex::with_bulge(
                    segment.point_at(ta),
                    segment.partial_bulge(ta, tb),
                ));
                u = upper;
            }
        }
        if vertices.is_empty() {
            return None;
        }
        vertices.push(PolylineVertex::new(self.point_at(to)?));
        Some(Curve::polyline(vertices, false))
    }

    /// 在给定参数处打断。开放曲线得到 `k + 1` 段，闭合曲线得到 `k` 段。
    pub fn split_at(&self, params: &[f64]) -> Vec<Curve> {
        let total = self.param_end();
        let mut cuts: Vec<f64> = params
            .iter()
            .copied()
            .filter(|u| u.is_finite())
            .map(|u| u.clamp(0.0, total))
            .map(|u| {
                if self.is_closed && u >= total - PARAM_EPSILON {
                    0.0
                } else {
                    u
                }
            })
            .filter(|u| self.is_closed || (*u > PARAM_EPSILON && *u < total - PARAM_EPSILON))
            .collect();
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|a, b| (*a - *b).abs() <= 1e-9);

        if cuts.is_empty() {
            return vec![self.clone()];
        }

        let mut pieces = Vec::new();
        if self.is_closed {
            for (index, from) in cuts.iter().enumerate() {
                let to = cuts[(index + 1) % cuts.len()];
                if let Some(piece) = self.sub_curve(*from, to) {
                    pieces.push(piece);
                }
            }
        } else {
            let mut from = 0.0;
            for to in cuts.iter().copied().chain(std::iter::once(total)) {
                if let Some(piece) = self.sub_curve(from, to) {
                    pieces.push(piece);
                }
                from = to;
            }
        }
        pieces
    }

    pub fn translated(&self, offset: Vector2) -> Curve {
        Curve {
            kind: self.kind,
            vertices: self
                .vertices
                .iter()
                .map(|vertex| PolylineVertex::with_bulge(vertex.position.translate(offset), vertex.bulge))
                .collect(),
            is_closed: self.is_closed,
        }
    }

    /// 离散化为折线点列；闭合曲线的末点重复首点。
    pub fn tessellate(&self, chord_tolerance: f64) -> Vec<Point2> {
        let mut points = Vec::new();
        for segment in self.segments() {
            let piece = segment.tessellate(chord_tolerance);
            let skip = usize::from(!points.is_empty());
            points.extend(piece.into_iter().skip(skip));
        }
        if points.is_empty() {
            points.extend(self.start());
        }
        points
    }

    /// 返回 `(参数, 最近点, 距离)`。
    pub fn closest_point(&self, point: Point2) -> Option<(f64, Point2, f64)> {
        let mut best: Option<(f64, Point2, f64)> = None;
        for (index, segment) in self.segments().enumerate() {
            let (t, candidate) = segment.closest_point(point);
            let distance = candidate.distance(point);
            if best.is_none_or(|(_, _, current)| distance < current) {
                best = Some((index as f64 + t, candidate, distance));
            }
        }
        if best.is_none() {
            if let Some(start) = self.start() {
                best = Some((0.0, start, start.distance(point)));
            }
        }
        best
    }

    pub fn distance_to(&self, point: Point2) -> Option<f64> {
        self.closest_point(point).map(|(_, _, distance)| distance)
    }
}
