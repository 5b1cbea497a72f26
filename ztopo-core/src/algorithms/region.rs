use std::cmp::Ordering;
use std::collections::HashSet;

use crate::algorithms::area::{polygon_area, strip_closing_point};
use crate::algorithms::intersect::segment_intersections;
use crate::algorithms::points::PointGrid;
use crate::curve::{Curve, Segment};
use crate::geometry::{Bounds2D, Point2, Vector2};
use crate::tolerance::Tolerances;

/// 平面划分中的一个有界面。
#[derive(Debug, Clone)]
pub struct Face {
    /// 外边界，逆时针，不含重复闭合点。
    pub boundary: Vec<Point2>,
    /// 落在该面内部、互不相连的其他连通分量外轮廓。
    pub holes: Vec<Vec<Point2>>,
    /// 净面积（外边界面积减去孔洞面积）。
    pub area: f64,
    /// 面内部的一个取样点。
    pub sample: Point2,
    /// 取样点是否位于各输入环内部，序号与输入环一致。
    pub inside: Vec<bool>,
}

impl Face {
    #[inline]
    pub fn is_uncovered(&self) -> bool {
        !self.inside.iter().any(|inside| *inside)
    }

    pub fn bounds(&self) -> Option<Bounds2D> {
        Bounds2D::from_points(self.boundary.iter().copied())
    }
}

/// 若干折线环的平面划分：在相互交点处打断、容差内合并顶点，再以半边追踪各个面。
///
/// 划分与其中的面都是普通的自有值，离开作用域即释放。
#[derive(Debug, Clone)]
pub struct Arrangement {
    rings: Vec<Vec<Point2>>,
    vertices: Vec<Point2>,
    edges: Vec<(usize, usize)>,
    faces: Vec<Face>,
}

/// 布尔求交的结果区域。
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub loops: Vec<Vec<Point2>>,
    pub area: f64,
}

impl Region {
    pub fn bounds(&self) -> Option<Bounds2D> {
        Bounds2D::from_points(self.loops.iter().flatten().copied())
    }
}

impl Arrangement {
    /// 由折线环构造，`tolerance` 为顶点合并距离。
    pub fn build(rings: &[Vec<Point2>], tolerance: f64) -> Self {
        let rings: Vec<Vec<Point2>> = rings
            .iter()
            .map(|ring| normalize_ring(ring, tolerance))
            .collect();
        let joint = Bounds2D::from_points(rings.iter().flatten().copied());
        let shift = joint
            .map(|bounds| Vector2::from_points(Point2::new(0.0, 0.0), bounds.center()))
            .unwrap_or(Vector2::new(0.0, 0.0));
        let local: Vec<Vec<Point2>> = rings
            .iter()
            .map(|ring| ring.iter().map(|p| p.translate(shift.scale(-1.0))).collect())
            .collect();

        let segments: Vec<Segment> = local
            .iter()
            .flat_map(|ring| {
                let count = ring.len();
                (0..count).map(move |i| Segment::new(ring[i], ring[(i + 1) % count], 0.0))
            })
            .collect();
        let bounds: Vec<Bounds2D> = segments.iter().map(Segment::bounds).collect();
        let split_tolerances = Tolerances {
            point: tolerance,
            ..Tolerances::default()
        };
        let mut splits: Vec<Vec<f64>> = vec![vec![0.0, 1.0]; segments.len()];
        for i in 0..segments.len() {
            for j in (i + 1)..segments.len() {
                if !bounds[i].intersects(&bounds[j], tolerance) {
                    continue;
                }
                for (_, ta, tb) in segment_intersections(&segments[i], &segments[j], &split_tolerances) {
                    splits[i].push(ta);
                    splits[j].push(tb);
                }
            }
        }

        let mut grid = PointGrid::new(tolerance);
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut edges = Vec::new();
        for (segment, params) in segments.iter().zip(splits.iter_mut()) {
            params.sort_by(f64::total_cmp);
            let ids: Vec<usize> = params
                .iter()
                .map(|t| grid.snap(segment.point_at(*t)))
                .collect();
            for pair in ids.windows(2) {
                let (u, v) = (pair[0], pair[1]);
                if u == v {
                    continue;
                }
                let key = (u.min(v), u.max(v));
                if seen.insert(key) {
                    edges.push((u, v));
                }
            }
        }

        let vertices = grid.into_points();
        let faces = trace_faces(&vertices, &edges, &local);
        let faces = faces
            .into_iter()
            .map(|face| Face {
                boundary: face.boundary.iter().map(|p| p.translate(shift)).collect(),
                holes: face
                    .holes
                    .iter()
                    .map(|hole| hole.iter().map(|p| p.translate(shift)).collect())
                    .collect(),
                sample: face.sample.translate(shift),
                ..face
            })
            .collect();
        let vertices = vertices.into_iter().map(|p| p.translate(shift)).collect();

        Self {
            rings,
            vertices,
            edges,
            faces,
        }
    }

    /// 闭合曲线按 `arc_chord` 离散化后构造，顶点合并距离取 `point`。
    pub fn from_curves(curves: &[&Curve], tolerances: &Tolerances) -> Self {
        let rings: Vec<Vec<Point2>> = curves
            .iter()
            .map(|curve| curve.tessellate(tolerances.arc_chord))
            .collect();
        Self::build(&rings, tolerances.point)
    }

    #[inline]
    pub fn rings(&self) -> &[Vec<Point2>] {
        &self.rings
    }

    #[inline]
    pub fn vertices(&self) -> &[Point2] {
        &self.vertices
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    /// 同时位于全部指定环内部的面。
    pub fn covered_faces<'a>(&'a self, rings: &'a [usize]) -> impl Iterator<Item = &'a Face> + 'a {
        self.faces.iter().filter(move |face| {
            rings
                .iter()
                .all(|&ring| face.inside.get(ring).copied().unwrap_or(false))
        })
    }

    /// 不属于任何输入环的有界面，即被环包围出来的隐含孔洞。
    pub fn uncovered_faces(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter().filter(|face| face.is_uncovered())
    }
}

/// 两条闭合曲线的布尔求交。重叠面积不超过 `overlap_area` 时返回 `None`。
pub fn intersect_regions(a: &Curve, b: &Curve, tolerances: &Tolerances) -> Option<Region> {
    let (bounds_a, bounds_b) = (a.bounds()?, b.bounds()?);
    if !bounds_a.intersects(&bounds_b, tolerances.point) {
        return None;
    }
    let arrangement = Arrangement::from_curves(&[a, b], tolerances);
    let mut loops = Vec::new();
    let mut area = 0.0;
    for face in arrangement.covered_faces(&[0, 1]) {
        area += face.area;
        loops.push(face.boundary.clone());
    }
    if area > tolerances.overlap_area {
        Some(Region { loops, area })
    } else {
        None
    }
}

/// 偶奇规则判定点是否位于折线环内。
pub fn point_in_ring(ring: &[Point2], point: Point2) -> bool {
    let ring = strip_closing_point(ring);
    let count = ring.len();
    if count < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = count - 1;
    for i in 0..count {
        let (a, b) = (ring[i], ring[j]);
        if (a.y() > point.y()) != (b.y() > point.y()) {
            let x = (b.x() - a.x()) * (point.y() - a.y()) / (b.y() - a.y()) + a.x();
            if point.x() < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn normalize_ring(points: &[Point2], tolerance: f64) -> Vec<Point2> {
    let mut ring: Vec<Point2> = Vec::with_capacity(points.len());
    for point in strip_closing_point(points) {
        if ring.last().is_none_or(|last| !last.approx_eq(*point, tolerance)) {
            ring.push(*point);
        }
    }
    while ring.len() > 1 {
        let (first, last) = (ring[0], ring[ring.len() - 1]);
        if first.approx_eq(last, tolerance) {
            ring.pop();
        } else {
            break;
        }
    }
    if ring.len() < 3 { Vec::new() } else { ring }
}

struct Cycle {
    points: Vec<Point2>,
    area: f64,
}

fn trace_faces(vertices: &[Point2], edges: &[(usize, usize)], rings: &[Vec<Point2>]) -> Vec<Face> {
    let half_count = edges.len() * 2;
    let origin = |h: usize| -> usize {
        let (u, v) = edges[h / 2];
        if h % 2 == 0 { u } else { v }
    };
    let destination = |h: usize| origin(h ^ 1);

    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); vertices.len()];
    for h in 0..half_count {
        outgoing[origin(h)].push(h);
    }
    let angle = |h: usize| {
        let direction = vertices[origin(h)].vector_to(vertices[destination(h)]);
        direction.y().atan2(direction.x())
    };
    let mut position = vec![0usize; half_count];
    for list in &mut outgoing {
        list.sort_by(|&a, &b| angle(a).partial_cmp(&angle(b)).unwrap_or(Ordering::Equal));
        for (index, &h) in list.iter().enumerate() {
            position[h] = index;
        }
    }
    // 逆时针排序后，twin 的前驱即左侧面上的下一条半边。
    let next = |h: usize| -> usize {
        let v = destination(h);
        let list = &outgoing[v];
        let k = position[h ^ 1];
        list[(k + list.len() - 1) % list.len()]
    };

    let mut visited = vec![false; half_count];
    let mut bounded: Vec<Cycle> = Vec::new();
    let mut outer: Vec<Cycle> = Vec::new();
    for start in 0..half_count {
        if visited[start] {
            continue;
        }
        let mut points = Vec::new();
        let mut h = start;
        for _ in 0..=half_count {
            if visited[h] {
                break;
            }
            visited[h] = true;
            points.push(vertices[origin(h)]);
            h = next(h);
        }
        let area = polygon_area(&points);
        if area > 0.0 {
            bounded.push(Cycle { points, area });
        } else if area < 0.0 {
            outer.push(Cycle { points, area });
        }
    }

    let mut faces: Vec<Face> = bounded
        .into_iter()
        .map(|cycle| {
            let sample = interior_sample(&cycle.points);
            Face {
                inside: rings.iter().map(|ring| point_in_ring(ring, sample)).collect(),
                sample,
                area: cycle.area,
                holes: Vec::new(),
                boundary: cycle.points,
            }
        })
        .collect();

    for cycle in outer {
        let probe = interior_sample(&cycle.points);
        let container = faces
            .iter()
            .enumerate()
            .filter(|(_, face)| face.area > cycle.area.abs() && point_in_ring(&face.boundary, probe))
            .min_by(|(_, a), (_, b)| a.area.partial_cmp(&b.area).unwrap_or(Ordering::Equal))
            .map(|(index, _)| index);
        if let Some(index) = container {
            faces[index].area -= cycle.area.abs();
            faces[index].holes.push(cycle.points);
        }
    }
    faces
}

/// 最长边中点沿左法向偏移一小段：逆时针环得到内部点，顺时针外轮廓得到外侧点。
fn interior_sample(points: &[Point2]) -> Point2 {
    let count = points.len();
    if count == 0 {
        return Point2::new(0.0, 0.0);
    }
    let mut longest = 0;
    let mut longest_len = -1.0;
    for i in 0..count {
        let len = points[i].distance(points[(i + 1) % count]);
        if len > longest_len {
            longest_len = len;
            longest = i;
        }
    }
    let a = points[longest];
    let b = points[(longest + 1) % count];
    let Some(normal) = a.vector_to(b).perp().normalize() else {
        return a;
    };
    let mid = a.midpoint(b);
    let signed = polygon_area(points);
    let mut offset = longest_len * 1e-3;
    for _ in 0..24 {
        let candidate = mid.translate(normal.scale(offset));
        let inside = point_in_ring(points, candidate);
        if inside == (signed > 0.0) {
            return candidate;
        }
        offset *= 0.5;
    }
    mid.translate(normal.scale(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Vec<Point2> {
        vec![
            Point2::new(x, y),
            Point2::new(x + size, y),
            Point2::new(x + size, y + size),
            Point2::new(x, y + size),
        ]
    }

    fn curve(points: Vec<Point2>) -> Curve {
        Curve::from_points(points, true)
    }

    #[test]
    fn overlapping_squares_intersect_in_quarter() {
        let tolerances = Tolerances::default();
        let a = curve(square(0.0, 0.0, 10.0));
        let b = curve(square(5.0, 5.0, 10.0));
        let region = intersect_regions(&a, &b, &tolerances).expect("overlap");
        assert!((region.area - 25.0).abs() < 1e-9);
        assert_eq!(region.loops.len(), 1);
        let bounds = region.bounds().expect("bounds");
        assert!((bounds.min().x() - 5.0).abs() < 1e-9);
        assert!((bounds.max().y() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn touching_and_disjoint_squares_do_not_overlap() {
        let tolerances = Tolerances::default();
        let a = curve(square(0.0, 0.0, 10.0));
        let touching = curve(square(10.0, 0.0, 10.0));
        let far = curve(square(30.0, 0.0, 10.0));
        assert!(intersect_regions(&a, &touching, &tolerances).is_none());
        assert!(intersect_regions(&a, &far, &tolerances).is_none());
    }

    #[test]
    fn nested_square_is_the_intersection() {
        let tolerances = Tolerances::default();
        let outer = curve(square(0.0, 0.0, 10.0));
        let inner = curve(square(2.0, 2.0, 3.0));
        let region = intersect_regions(&outer, &inner, &tolerances).expect("nested overlap");
        assert!((region.area - 9.0).abs() < 1e-9);

        let arrangement = Arrangement::from_curves(&[&outer, &inner], &tolerances);
        let annulus = arrangement
            .faces()
            .iter()
            .find(|face| face.inside == vec![true, false])
            .expect("annulus face");
        assert_eq!(annulus.holes.len(), 1);
        assert!((annulus.area - 91.0).abs() < 1e-9);
    }

    #[test]
    fn ring_of_parcels_leaves_one_uncovered_face() {
        let mut rings = Vec::new();
        for ix in 0..3 {
            for iy in 0..3 {
                if ix == 1 && iy == 1 {
                    continue;
                }
                rings.push(square(ix as f64, iy as f64, 1.0));
            }
        }
        let arrangement = Arrangement::build(&rings, 1e-6);
        let holes: Vec<&Face> = arrangement.uncovered_faces().collect();
        assert_eq!(holes.len(), 1);
        assert!((holes[0].area - 1.0).abs() < 1e-9);
        assert!(holes[0].sample.approx_eq(Point2::new(1.5, 1.5), 0.6));
        assert_eq!(arrangement.faces().len(), 9);
    }

    #[test]
    fn circles_overlap_by_lens_area() {
        let tolerances = Tolerances {
            arc_chord: 1e-5,
            ..Tolerances::default()
        };
        let a = Curve::circle(Point2::new(0.0, 0.0), 1.0);
        let b = Curve::circle(Point2::new(1.0, 0.0), 1.0);
        let region = intersect_regions(&a, &b, &tolerances).expect("lens");
        // 两个单位圆圆心距为 1 时的透镜面积：2π/3 − √3/2。
        let expected = 2.0 * std::f64::consts::PI / 3.0 - 3.0_f64.sqrt() / 2.0;
        assert!((region.area - expected).abs() < 1e-3);
    }
}
