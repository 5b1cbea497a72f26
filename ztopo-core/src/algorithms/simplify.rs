use crate::algorithms::area::strip_closing_point;
use crate::geometry::Point2;

/// 点到线段的距离；线段退化时为点距。
pub fn distance_to_segment(point: Point2, start: Point2, end: Point2) -> f64 {
    let edge = start.vector_to(end);
    let length_sq = edge.length_squared();
    if length_sq <= f64::EPSILON * f64::EPSILON {
        return point.distance(start);
    }
    let t = (start.vector_to(point).dot(edge) / length_sq).clamp(0.0, 1.0);
    point.distance(start.lerp(end, t))
}

/// Douglas-Peucker 保留掩码，首尾始终保留。使用显式栈迭代。
pub fn douglas_peucker_mask(points: &[Point2], epsilon: f64) -> Vec<bool> {
    let count = points.len();
    let mut keep = vec![false; count];
    if count == 0 {
        return keep;
    }
    keep[0] = true;
    keep[count - 1] = true;
    if count < 3 {
        return keep;
    }

    let mut stack = vec![(0usize, count - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut farthest = first;
        let mut max_distance = 0.0;
        for index in (first + 1)..last {
            let distance = distance_to_segment(points[index], points[first], points[last]);
            if distance > max_distance {
                max_distance = distance;
                farthest = index;
            }
        }
        if max_distance > epsilon && farthest != first {
            keep[farthest] = true;
            stack.push((first, farthest));
            stack.push((farthest, last));
        }
    }
    keep
}

pub fn douglas_peucker(points: &[Point2], epsilon: f64) -> Vec<Point2> {
    let keep = douglas_peucker_mask(points, epsilon);
    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

/// 闭合环抽稀。
///
/// 接缝顶点在直接抽稀时总被保留，因此先把前两个点移到序列末尾再抽稀，
/// 之后按原始顺序恢复并重新闭合：结果首点等于末点。
pub fn simplify_closed(points: &[Point2], epsilon: f64) -> Vec<Point2> {
    let ring = strip_closing_point(points);
    let count = ring.len();
    if count < 4 {
        let mut closed = ring.to_vec();
        if let Some(first) = ring.first() {
            closed.push(*first);
        }
        return closed;
    }

    // 旋转后的第 k 个点对应原序号 (k + 2) % count，末尾再补上起点以闭合。
    let order: Vec<usize> = (0..count)
        .map(|k| (k + 2) % count)
        .chain(std::iter::once(2))
        .collect();
    let rotated: Vec<Point2> = order.iter().map(|&index| ring[index]).collect();
    let keep = douglas_peucker_mask(&rotated, epsilon);

    let mut kept: Vec<usize> = order
        .iter()
        .zip(keep)
        .filter_map(|(&index, kept)| kept.then_some(index))
        .collect();
    kept.sort_unstable();
    kept.dedup();

    let mut result: Vec<Point2> = kept.iter().map(|&index| ring[index]).collect();
    if let Some(first) = result.first().copied() {
        result.push(first);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn octagon(radius: f64) -> Vec<Point2> {
        let mut points: Vec<Point2> = (0..8)
            .map(|k| {
                let angle = TAU * k as f64 / 8.0;
                Point2::new(radius * angle.cos(), radius * angle.sin())
            })
            .collect();
        points.push(points[0]);
        points
    }

    #[test]
    fn open_polyline_drops_near_collinear_points() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.01),
            Point2::new(2.0, -0.01),
            Point2::new(3.0, 5.0),
            Point2::new(4.0, 6.0),
        ];
        let simplified = douglas_peucker(&points, 0.1);
        assert_eq!(simplified.first(), points.first());
        assert_eq!(simplified.last(), points.last());
        assert!(!simplified.contains(&points[1]));
        assert!(simplified.contains(&points[3]));
    }

    #[test]
    fn closed_octagon_keeps_detail_with_small_epsilon() {
        let points = octagon(1.0);
        let simplified = simplify_closed(&points, 1e-3);
        assert_eq!(simplified, points);
    }

    #[test]
    fn closed_octagon_collapses_with_large_epsilon() {
        let points = octagon(1.0);
        let simplified = simplify_closed(&points, 1.2);
        assert!(simplified.len() <= 4);
        assert_eq!(simplified.first(), simplified.last());
        let distinct = simplified.len() - 1;
        assert!(distinct <= 3);
    }

    #[test]
    fn distance_to_degenerate_segment_is_point_distance() {
        let p = Point2::new(3.0, 4.0);
        let o = Point2::new(0.0, 0.0);
        assert!((distance_to_segment(p, o, o) - 5.0).abs() < 1e-12);
    }
}
