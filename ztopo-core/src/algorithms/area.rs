use serde::{Deserialize, Serialize};

use crate::curve::Curve;
use crate::geometry::Point2;
use crate::tolerance::Tolerances;

/// 环绕方向。全工程只以 [`winding`] 的结果为准。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    Clockwise,
    CounterClockwise,
    Degenerate,
}

impl Winding {
    pub fn opposite(self) -> Winding {
        match self {
            Winding::Clockwise => Winding::CounterClockwise,
            Winding::CounterClockwise => Winding::Clockwise,
            Winding::Degenerate => Winding::Degenerate,
        }
    }
}

/// 带符号面积：顶点鞋带公式加上每个圆弧段的弓形面积 `r²(θ − sin θ)/2`。
///
/// 开放曲线按首尾直线闭合计算。正值表示逆时针。
pub fn signed_area(curve: &Curve) -> f64 {
    let count = curve.vertices.len();
    if count < 2 {
        return 0.0;
    }
    let mut twice = 0.0;
    for index in 0..count {
        let a = curve.vertices[index].position;
        let b = curve.vertices[(index + 1) % count].position;
        twice += a.x() * b.y() - b.x() * a.y();
    }
    let mut area = twice * 0.5;
    for segment in curve.segments() {
        if let Some(arc) = segment.arc() {
            area += arc.radius * arc.radius * (arc.sweep - arc.sweep.sin()) * 0.5;
        }
    }
    area
}

/// 以带符号面积判定方向，面积不超过 `zero_area` 视为退化。
pub fn winding(curve: &Curve, tolerances: &Tolerances) -> Winding {
    let area = signed_area(curve);
    if !area.is_finite() || tolerances.is_zero_area(area) {
        Winding::Degenerate
    } else if area > 0.0 {
        Winding::CounterClockwise
    } else {
        Winding::Clockwise
    }
}

/// `Σ (x[i+1] − x[i])(y[i+1] + y[i])`，忽略重复的闭合点。
///
/// 该值恒等于鞋带面积的 −2 倍，正值即顺时针。
pub fn winding_sum(points: &[Point2]) -> f64 {
    let ring = strip_closing_point(points);
    let count = ring.len();
    if count < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for index in 0..count {
        let a = ring[index];
        let b = ring[(index + 1) % count];
        sum += (b.x() - a.x()) * (b.y() + a.y());
    }
    sum
}

#[inline]
pub fn is_clockwise(points: &[Point2]) -> bool {
    winding_sum(points) > 0.0
}

/// 折线点列的鞋带面积（逆时针为正）。
pub fn polygon_area(points: &[Point2]) -> f64 {
    -0.5 * winding_sum(points)
}

pub(crate) fn strip_closing_point(points: &[Point2]) -> &[Point2] {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() > 1 && first == last => {
            &points[..points.len() - 1]
        }
        _ => points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PolylineVertex;
    use std::f64::consts::PI;

    fn rectangle() -> Curve {
        Curve::from_points(
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 5.0),
                Point2::new(0.0, 5.0),
            ],
            true,
        )
    }

    #[test]
    fn rectangle_area_flips_with_orientation() {
        let curve = rectangle();
        assert!((signed_area(&curve) - 50.0).abs() < 1e-9);
        assert!((signed_area(&curve.reversed()) + 50.0).abs() < 1e-9);

        let tolerances = Tolerances::default();
        assert_eq!(winding(&curve, &tolerances), Winding::CounterClockwise);
        assert_eq!(winding(&curve.reversed(), &tolerances), Winding::Clockwise);
    }

    #[test]
    fn full_circle_area() {
        let curve = Curve::circle(Point2::new(4.0, -2.0), 3.0);
        assert!((signed_area(&curve) - 9.0 * PI).abs() < 1e-6);
    }

    #[test]
    fn bulged_side_adds_half_disc() {
        // 正方形下边外凸为半圆：逆时针正方形的下边向右侧（外侧）鼓出。
        let curve = Curve::polyline(
            vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(2.0, 0.0)),
                PolylineVertex::new(Point2::new(2.0, 2.0)),
                PolylineVertex::new(Point2::new(0.0, 2.0)),
            ],
            true,
        );
        assert!((signed_area(&curve) - (4.0 + PI / 2.0)).abs() < 1e-9);
        let reversed = curve.reversed();
        assert!((signed_area(&reversed) + 4.0 + PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn winding_sum_agrees_with_signed_area() {
        let tolerances = Tolerances::default();
        let curve = rectangle();
        let mut points: Vec<Point2> = curve.points().collect();
        points.push(points[0]);
        assert!((winding_sum(&points) + 2.0 * signed_area(&curve)).abs() < 1e-9);
        assert!(!is_clockwise(&points));
        assert_eq!(winding(&curve, &tolerances), Winding::CounterClockwise);

        points.reverse();
        assert!(is_clockwise(&points));
        assert_eq!(winding(&curve.reversed(), &tolerances), Winding::Clockwise);
        assert!((polygon_area(&points) + 50.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let curve = Curve::from_points(
            [
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(2.0, 0.0),
            ],
            true,
        );
        assert_eq!(winding(&curve, &Tolerances::default()), Winding::Degenerate);
    }
}
