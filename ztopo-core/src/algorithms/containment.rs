use crate::curve::{Curve, Segment};
use crate::geometry::{Point2, Vector2};
use crate::tolerance::Tolerances;

/// 射线方向取一个不与常见坐标轴或 45° 对齐的固定角度。
const RAY_ANGLE: f64 = std::f64::consts::SQRT_2 - 1.0;
const SAMPLE_STEP: f64 = 1e-6;
const HIT_MERGE: f64 = 1e-9;

/// 点是否在闭合曲线内（含边界）。
///
/// 从测试点沿固定方向发射射线，对每个交点在参数 `u ± ε` 两侧取样判断
/// 曲线是否穿越射线所在直线；切向穿越记为掠射命中。穿越数与掠射数之和为奇数即在内部。
/// 开放、退化或含非有限值的曲线一律返回 `false`。
pub fn point_in_curve(curve: &Curve, point: Point2, tolerances: &Tolerances) -> bool {
    if !point.is_finite() || !curve.is_finite() || !curve.is_loop(tolerances.point) {
        return false;
    }
    if curve.segment_count() < 2 || tolerances.is_zero_length(curve.length()) {
        return false;
    }
    match curve.distance_to(point) {
        Some(distance) if distance <= tolerances.point => return true,
        Some(_) => {}
        None => return false,
    }

    let direction = Vector2::new(RAY_ANGLE.cos(), RAY_ANGLE.sin());
    let hits = ray_hits(curve, point, direction, tolerances);
    let mut crossings = 0usize;
    let mut glancing = 0usize;
    for u in hits {
        match classify_hit(curve, point, direction, u) {
            HitKind::Crossing => crossings += 1,
            HitKind::Glancing => glancing += 1,
            HitKind::Touch => {}
        }
    }
    (crossings + glancing) % 2 == 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitKind {
    Crossing,
    /// 切向命中且曲线穿过射线。
    Glancing,
    /// 切向接触但未穿过。
    Touch,
}

fn ray_hits(curve: &Curve, origin: Point2, direction: Vector2, tolerances: &Tolerances) -> Vec<f64> {
    let total = curve.param_end();
    let mut hits: Vec<f64> = Vec::new();
    for (index, segment) in curve.segments().enumerate() {
        for t in segment_ray_params(&segment, origin, direction, tolerances) {
            let mut u = index as f64 + t;
            if curve.is_closed && u >= total - HIT_MERGE {
                u = 0.0;
            }
            hits.push(u);
        }
    }
    hits.sort_by(f64::total_cmp);
    hits.dedup_by(|a, b| (*a - *b).abs() <= HIT_MERGE);
    // 端到端闭合的开放曲线：起点与终点是同一个交点。
    if !curve.is_closed && hits.len() > 1 {
        let first = hits[0];
        let last = hits[hits.len() - 1];
        if first <= HIT_MERGE && last >= total - HIT_MERGE {
            hits.pop();
        }
    }
    hits
}

fn segment_ray_params(
    segment: &Segment,
    origin: Point2,
    direction: Vector2,
    tolerances: &Tolerances,
) -> Vec<f64> {
    let mut params = Vec::new();
    match segment.arc() {
        None => {
            let edge = segment.start.vector_to(segment.end);
            let denom = direction.cross(edge);
            if denom.abs() <= f64::EPSILON * edge.length().max(1.0) {
                return params;
            }
            let offset = origin.vector_to(segment.start);
            let s = offset.cross(edge) / denom;
            let t = offset.cross(direction) / denom;
            if s >= -HIT_MERGE && (-HIT_MERGE..=1.0 + HIT_MERGE).contains(&t) {
                params.push(t.clamp(0.0, 1.0));
            }
        }
        Some(arc) => {
            let to_origin = arc.center.vector_to(origin);
            let b = direction.dot(to_origin);
            let c = to_origin.length_squared() - arc.radius * arc.radius;
            let disc = b * b - c;
            if disc < 0.0 {
                return params;
            }
            let root = disc.sqrt();
            for s in [-b - root, -b + root] {
                if s < -HIT_MERGE {
                    continue;
                }
                let hit = origin.translate(direction.scale(s));
                let radial = arc.center.vector_to(hit);
                let angle = radial.y().atan2(radial.x());
                if let Some(t) = arc.param_of_angle(angle, tolerances.angle) {
                    params.push(t);
                }
            }
        }
    }
    params
}

fn classify_hit(curve: &Curve, origin: Point2, direction: Vector2, u: f64) -> HitKind {
    let side = |param: f64| -> f64 {
        curve
            .point_at(wrap_param(curve, param))
            .map(|p| direction.cross(origin.vector_to(p)))
            .unwrap_or(0.0)
    };
    let mut step = SAMPLE_STEP;
    let mut before = side(u - step);
    let mut after = side(u + step);
    // 取样点恰好落在射线直线上时逐步放大步长。
    for _ in 0..4 {
        if before != 0.0 && after != 0.0 {
            break;
        }
        step *= 10.0;
        before = side(u - step);
        after = side(u + step);
    }
    if before * after >= 0.0 {
        return HitKind::Touch;
    }
    let tangent = curve.derivative(u).unwrap_or(Vector2::new(0.0, 0.0));
    let parallel = direction.cross(tangent).abs() <= 1e-9 * tangent.length().max(1.0);
    if parallel {
        HitKind::Glancing
    } else {
        HitKind::Crossing
    }
}

fn wrap_param(curve: &Curve, u: f64) -> f64 {
    let total = curve.param_end();
    if curve.is_closed || curve.is_loop(1e-9) {
        u.rem_euclid(total)
    } else {
        u.clamp(0.0, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PolylineVertex;

    fn unit_square() -> Curve {
        Curve::from_points(
            [
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
            true,
        )
    }

    #[test]
    fn unit_square_containment() {
        let tolerances = Tolerances::default();
        let square = unit_square();
        assert!(point_in_curve(&square, Point2::new(0.5, 0.5), &tolerances));
        assert!(!point_in_curve(&square, Point2::new(2.0, 2.0), &tolerances));
        assert!(point_in_curve(&square, Point2::new(0.5, 0.0), &tolerances));
        assert!(point_in_curve(&square.reversed(), Point2::new(0.5, 0.5), &tolerances));
    }

    #[test]
    fn open_curve_is_unsupported() {
        let tolerances = Tolerances::default();
        let mut square = unit_square();
        square.is_closed = false;
        assert!(!point_in_curve(&square, Point2::new(0.5, 0.5), &tolerances));
    }

    #[test]
    fn ray_through_vertex_is_counted_once() {
        let tolerances = Tolerances::default();
        let diamond = Curve::from_points(
            [
                Point2::new(1.0, 0.0),
                Point2::new(0.0, 1.0),
                Point2::new(-1.0, 0.0),
                Point2::new(0.0, -1.0),
            ],
            true,
        );
        assert!(point_in_curve(&diamond, Point2::new(0.0, 0.0), &tolerances));
        // 射线经过顶点 (1, 0)：起点取在顶点沿射线反方向上。
        let angle = RAY_ANGLE;
        let origin = Point2::new(1.0 - 3.0 * angle.cos(), -3.0 * angle.sin());
        assert!(!point_in_curve(&diamond, origin, &tolerances));
    }

    #[test]
    fn circle_and_bulged_boundary() {
        let tolerances = Tolerances::default();
        let circle = Curve::circle(Point2::new(0.0, 0.0), 3.0);
        assert!(point_in_curve(&circle, Point2::new(2.9, 0.0), &tolerances));
        assert!(point_in_curve(&circle, Point2::new(0.0, -3.0), &tolerances));
        assert!(!point_in_curve(&circle, Point2::new(2.2, 2.2), &tolerances));

        let capsule = Curve::polyline(
            vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(2.0, 0.0)),
                PolylineVertex::new(Point2::new(2.0, 2.0)),
                PolylineVertex::new(Point2::new(0.0, 2.0)),
            ],
            true,
        );
        assert!(point_in_curve(&capsule, Point2::new(1.0, -0.9), &tolerances));
        assert!(!point_in_curve(&capsule, Point2::new(0.1, -0.9), &tolerances));
    }
}
