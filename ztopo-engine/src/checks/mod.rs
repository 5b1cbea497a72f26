//! 各类缺陷的检查函数。检查只读取实体，输出按源实体 ID 排序。

pub mod annotation;
pub mod lines;
pub mod polygons;

use ztopo_core::curve::Curve;
use ztopo_core::document::EntityId;
use ztopo_core::geometry::{Bounds2D, Point2};

use crate::result::DefectResult;

/// 按源实体与标记点排序，保证多次检查的结果顺序一致。
pub(crate) fn sort_results(results: &mut [DefectResult]) {
    results.sort_by(|a, b| {
        let (sa, pa) = a.sort_key();
        let (sb, pb) = b.sort_key();
        sa.cmp(&sb).then(pa.cmp(&pb))
    });
}

/// 点不在曲线端点上（闭合曲线只有接缝一个端点）。
pub(crate) fn is_interior_point(curve: &Curve, point: Point2, tolerance: f64) -> bool {
    let at_start = curve.start().is_some_and(|start| start.approx_eq(point, tolerance));
    let at_end = curve.end().is_some_and(|end| end.approx_eq(point, tolerance));
    !(at_start || at_end)
}

/// 外包框（外扩 `pad`）相交的曲线对 `(i, j)`，`i < j`，按序号排序。
///
/// 按最小 x 排序后做一次扫描线。
pub(crate) fn candidate_pairs(curves: &[(EntityId, Curve)], pad: f64) -> Vec<(usize, usize)> {
    let bounds: Vec<Option<Bounds2D>> = curves
        .iter()
        .map(|(_, curve)| curve.bounds().map(|b| b.expanded(pad)))
        .collect();
    let mut order: Vec<usize> = (0..curves.len()).filter(|&i| bounds[i].is_some()).collect();
    order.sort_by(|&a, &b| {
        let ax = bounds[a].map_or(0.0, |b| b.min().x());
        let bx = bounds[b].map_or(0.0, |b| b.min().x());
        ax.total_cmp(&bx).then(a.cmp(&b))
    });

    let mut pairs = Vec::new();
    for (position, &i) in order.iter().enumerate() {
        let Some(bi) = bounds[i] else { continue };
        for &j in &order[position + 1..] {
            let Some(bj) = bounds[j] else { continue };
            if bj.min().x() > bi.max().x() {
                break;
            }
            if bi.intersects(&bj, 0.0) {
                pairs.push((i.min(j), i.max(j)));
            }
        }
    }
    pairs.sort();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_finds_only_overlapping_boxes() {
        let curves = vec![
            (EntityId::new(1), Curve::line(Point2::new(0.0, 0.0), Point2::new(2.0, 0.0))),
            (EntityId::new(2), Curve::line(Point2::new(10.0, 0.0), Point2::new(12.0, 0.0))),
            (EntityId::new(3), Curve::line(Point2::new(1.0, -1.0), Point2::new(1.0, 1.0))),
            (EntityId::new(4), Curve::line(Point2::new(2.005, 0.0), Point2::new(3.0, 0.0))),
        ];
        assert_eq!(candidate_pairs(&curves, 0.0), vec![(0, 2)]);
        assert_eq!(candidate_pairs(&curves, 0.01), vec![(0, 2), (0, 3)]);
    }

    #[test]
    fn seam_is_not_interior() {
        let square = Curve::from_points(
            [
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
            true,
        );
        assert!(!is_interior_point(&square, Point2::new(0.0, 0.0), 1e-6));
        assert!(is_interior_point(&square, Point2::new(1.0, 0.0), 1e-6));
    }
}
