use crate::curve::{ArcGeometry, Curve, Segment};
use crate::geometry::{Bounds2D, Point2, Vector2};
use crate::tolerance::Tolerances;

/// 两条曲线的一个交点，附带在各自曲线上的参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionPoint {
    pub point: Point2,
    pub param_a: f64,
    pub param_b: f64,
}

/// 单段交点：`(点, 段 A 参数, 段 B 参数)`。
pub type SegmentHit = (Point2, f64, f64);

/// 计算两条曲线的全部交点。
///
/// 求解前把两条曲线一起平移到原点附近以减小大坐标下的相消误差，结果再平移回去。
/// 距离不超过 `tolerances.point` 的交点只保留一个。
pub fn curve_intersections(a: &Curve, b: &Curve, tolerances: &Tolerances) -> Vec<IntersectionPoint> {
    let (Some(bounds_a), Some(bounds_b)) = (a.bounds(), b.bounds()) else {
        return Vec::new();
    };
    if !bounds_a.intersects(&bounds_b, tolerances.point) {
        return Vec::new();
    }
    let mut joint = bounds_a;
    joint.include_bounds(&bounds_b);
    let shift = Vector2::from_points(Point2::new(0.0, 0.0), joint.center());
    let local_a = a.translated(shift.scale(-1.0));
    let local_b = b.translated(shift.scale(-1.0));

    let mut hits = Vec::new();
    let segments_b: Vec<(Segment, Bounds2D)> = local_b
        .segments()
        .map(|segment| (segment, segment.bounds()))
        .collect();
    for (i, segment_a) in local_a.segments().enumerate() {
        let bounds_a = segment_a.bounds();
        for (j, (segment_b, bounds_b)) in segments_b.iter().enumerate() {
            if !bounds_a.intersects(bounds_b, tolerances.point) {
                continue;
            }
            for (point, ta, tb) in segment_intersections(&segment_a, segment_b, tolerances) {
                hits.push(IntersectionPoint {
                    point: point.translate(shift),
                    param_a: i as f64 + ta,
                    param_b: j as f64 + tb,
                });
            }
        }
    }
    dedup_hits(hits, tolerances.point)
}

/// 曲线与自身的交点，不含相邻段的公共顶点及闭合曲线的接缝。
///
/// 返回的每个交点满足 `param_a < param_b`。
pub fn self_intersections(curve: &Curve, tolerances: &Tolerances) -> Vec<IntersectionPoint> {
    let count = curve.segment_count();
    if count < 2 {
        return Vec::new();
    }
    let Some(bounds) = curve.bounds() else {
        return Vec::new();
    };
    let shift = Vector2::from_points(Point2::new(0.0, 0.0), bounds.center());
    let local = curve.translated(shift.scale(-1.0));
    let segments: Vec<(Segment, Bounds2D)> = local
        .segments()
        .map(|segment| (segment, segment.bounds()))
        .collect();
    let is_loop = local.is_loop(tolerances.point);

    let mut hits = Vec::new();
    for i in 0..count {
        for j in (i + 1)..count {
            let (segment_a, bounds_a) = &segments[i];
            let (segment_b, bounds_b) = &segments[j];
            if !bounds_a.intersects(bounds_b, tolerances.point) {
                continue;
            }
            let adjacent = j == i + 1;
            let wraps = is_loop && i == 0 && j == count - 1;
            for (point, ta, tb) in segment_intersections(segment_a, segment_b, tolerances) {
                if adjacent && point.approx_eq(segment_a.end, tolerances.point) {
                    continue;
                }
                if wraps && point.approx_eq(segment_a.start, tolerances.point) {
                    continue;
                }
                hits.push(IntersectionPoint {
                    point: point.translate(shift),
                    param_a: i as f64 + ta,
                    param_b: j as f64 + tb,
                });
            }
        }
    }
    dedup_hits(hits, tolerances.point)
}

fn dedup_hits(mut hits: Vec<IntersectionPoint>, tolerance: f64) -> Vec<IntersectionPoint> {
    hits.sort_by(|x, y| {
        x.param_a
            .total_cmp(&y.param_a)
            .then(x.param_b.total_cmp(&y.param_b))
    });
    let mut unique: Vec<IntersectionPoint> = Vec::with_capacity(hits.len());
    for hit in hits {
        if unique
            .iter()
            .all(|kept| !kept.point.approx_eq(hit.point, tolerance))
        {
            unique.push(hit);
        }
    }
    unique
}

/// 两段（直线或圆弧）的交点。共线或同圆重叠时返回重叠区间的端点。
pub fn segment_intersections(a: &Segment, b: &Segment, tolerances: &Tolerances) -> Vec<SegmentHit> {
    match (a.arc(), b.arc()) {
        (None, None) => line_line(a, b, tolerances),
        (None, Some(arc_b)) => line_arc(a, b, &arc_b, tolerances),
        (Some(arc_a), None) => line_arc(b, a, &arc_a, tolerances)
            .into_iter()
            .map(|(point, tb, ta)| (point, ta, tb))
            .collect(),
        (Some(arc_a), Some(arc_b)) => arc_arc(a, &arc_a, b, &arc_b, tolerances),
    }
}

fn line_line(a: &Segment, b: &Segment, tolerances: &Tolerances) -> Vec<SegmentHit> {
    let ea = a.start.vector_to(a.end);
    let eb = b.start.vector_to(b.end);
    let len_a = ea.length();
    let len_b = eb.length();
    if len_a <= f64::EPSILON || len_b <= f64::EPSILON {
        return endpoint_contacts(a, b, tolerances);
    }
    let denom = ea.cross(eb);
    if denom.abs() <= 1e-12 * len_a * len_b {
        return endpoint_contacts(a, b, tolerances);
    }
    let offset = a.start.vector_to(b.start);
    let ta = offset.cross(eb) / denom;
    let tb = offset.cross(ea) / denom;
    let slack_a = tolerances.point / len_a;
    let slack_b = tolerances.point / len_b;
    if ta < -slack_a || ta > 1.0 + slack_a || tb < -slack_b || tb > 1.0 + slack_b {
        return Vec::new();
    }
    let ta = ta.clamp(0.0, 1.0);
    let tb = tb.clamp(0.0, 1.0);
    vec![(a.start.lerp(a.end, ta), ta, tb)]
}

fn line_arc(line: &Segment, arc_segment: &Segment, arc: &ArcGeometry, tolerances: &Tolerances) -> Vec<SegmentHit> {
    let edge = line.start.vector_to(line.end);
    let length_sq = edge.length_squared();
    if length_sq <= f64::EPSILON * f64::EPSILON {
        return endpoint_contacts(line, arc_segment, tolerances);
    }
    let to_start = arc.center.vector_to(line.start);
    let half_b = edge.dot(to_start) / length_sq;
    let c = (to_start.length_squared() - arc.radius * arc.radius) / length_sq;
    let mut disc = half_b * half_b - c;
    if disc < 0.0 {
        // 近似相切：最近点到圆的距离在容差内时按切点处理。
        let nearest = line.start.translate(edge.scale(-half_b));
        if (arc.center.distance(nearest) - arc.radius).abs() > tolerances.point {
            return Vec::new();
        }
        disc = 0.0;
    }
    let root = disc.sqrt();
    let slack = tolerances.point / length_sq.sqrt();
    let angle_slack = tolerances.point / arc.radius.max(f64::EPSILON);
    let mut hits = Vec::new();
    let roots = if root == 0.0 {
        vec![-half_b]
    } else {
        vec![-half_b - root, -half_b + root]
    };
    for t in roots {
        if t < -slack || t > 1.0 + slack {
            continue;
        }
        let t = t.clamp(0.0, 1.0);
        let point = line.start.lerp(line.end, t);
        let radial = arc.center.vector_to(point);
        let angle = radial.y().atan2(radial.x());
        if let Some(s) = arc.param_of_angle(angle, angle_slack) {
            hits.push((point, t, s));
        }
    }
    hits
}

fn arc_arc(
    a: &Segment,
    arc_a: &ArcGeometry,
    b: &Segment,
    arc_b: &ArcGeometry,
    tolerances: &Tolerances,
) -> Vec<SegmentHit> {
    let between = arc_a.center.vector_to(arc_b.center);
    let distance = between.length();
    if distance <= tolerances.point && (arc_a.radius - arc_b.radius).abs() <= tolerances.point {
        return endpoint_contacts(a, b, tolerances);
    }
    if distance <= f64::EPSILON
        || distance > arc_a.radius + arc_b.radius + tolerances.point
        || distance < (arc_a.radius - arc_b.radius).abs() - tolerances.point
    {
        return Vec::new();
    }
    let along = (distance * distance + arc_a.radius * arc_a.radius - arc_b.radius * arc_b.radius)
        / (2.0 * distance);
    let height = (arc_a.radius * arc_a.radius - along * along).max(0.0).sqrt();
    let axis = between.scale(1.0 / distance);
    let base = arc_a.center.translate(axis.scale(along));
    let mut candidates = vec![base.translate(axis.perp().scale(height))];
    if height > tolerances.point {
        candidates.push(base.translate(axis.perp().scale(-height)));
    }

    let slack_a = tolerances.point / arc_a.radius.max(f64::EPSILON);
    let slack_b = tolerances.point / arc_b.radius.max(f64::EPSILON);
    let mut hits = Vec::new();
    for point in candidates {
        let ra = arc_a.center.vector_to(point);
        let rb = arc_b.center.vector_to(point);
        let ta = arc_a.param_of_angle(ra.y().atan2(ra.x()), slack_a);
        let tb = arc_b.param_of_angle(rb.y().atan2(rb.x()), slack_b);
        if let (Some(ta), Some(tb)) = (ta, tb) {
            hits.push((point, ta, tb));
        }
    }
    hits
}

/// 平行、共线、同圆或退化段：只检查各端点是否落在另一段上。
fn endpoint_contacts(a: &Segment, b: &Segment, tolerances: &Tolerances) -> Vec<SegmentHit> {
    let mut hits: Vec<SegmentHit> = Vec::new();
    for (t, point) in [(0.0, a.start), (1.0, a.end)] {
        let (s, on_b) = b.closest_point(point);
        if on_b.approx_eq(point, tolerances.point) {
            hits.push((point, t, s));
        }
    }
    for (s, point) in [(0.0, b.start), (1.0, b.end)] {
        let (t, on_a) = a.closest_point(point);
        if on_a.approx_eq(point, tolerances.point)
            && hits
                .iter()
                .all(|(kept, _, _)| !kept.approx_eq(point, tolerances.point))
        {
            hits.push((point, t, s));
        }
    }
    hits
}
