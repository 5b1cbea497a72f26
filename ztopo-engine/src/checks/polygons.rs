//! 多边形检查：未闭合、零面积、小面积、方向、重叠、缝隙与孔洞。

use tracing::debug;
use ztopo_core::algorithms::area::{signed_area, winding, Winding};
use ztopo_core::algorithms::containment::point_in_curve;
use ztopo_core::algorithms::intersect::curve_intersections;
use ztopo_core::algorithms::region::{intersect_regions, Arrangement};
use ztopo_core::curve::{Curve, CurveKind};
use ztopo_core::document::{EntityId, EntityTag};

use super::{candidate_pairs, sort_results};
use crate::action::CheckContext;
use crate::result::{DefectPayload, DefectResult, GapSnap};

/// 闭合曲线，或首尾在 `tolerance` 内相接的开放多段线（去掉重复的末点）。
pub(crate) fn as_loop(curve: &Curve, tolerance: f64) -> Option<Curve> {
    if curve.is_closed {
        return Some(curve.clone());
    }
    if curve.vertex_count() < 4 || !curve.is_loop(tolerance) {
        return None;
    }
    let mut vertices = curve.vertices.clone();
    vertices.pop();
    Some(Curve::polyline(vertices, true))
}

/// 应当围成区域却未闭合的多段线：标记为宗地，或首尾距离不超过 `gap`。
pub fn unclosed(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .curves()
        .into_iter()
        .filter(|(_, curve)| {
            !curve.is_closed && curve.kind == CurveKind::Polyline && curve.vertex_count() >= 3
        })
        .filter_map(|(id, curve)| {
            let (start, end) = (curve.start()?, curve.end()?);
            let gap = start.distance(end);
            let parcel = context.store.tag(id) == Some(EntityTag::Parcel);
            if !parcel && gap > tolerances.gap {
                return None;
            }
            Some(DefectResult::new(
                DefectPayload::UnclosedPolygon { gap },
                vec![id],
                vec![start, end],
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

pub fn zero_area_loops(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .curves()
        .into_iter()
        .filter_map(|(id, curve)| {
            let ring = as_loop(&curve, tolerances.point)?;
            let area = signed_area(&ring);
            if !tolerances.is_zero_area(area) {
                return None;
            }
            Some(DefectResult::new(
                DefectPayload::ZeroAreaLoop { area },
                vec![id],
                ring.start().into_iter().collect(),
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

pub fn small_polygons(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .curves()
        .into_iter()
        .filter_map(|(id, curve)| {
            let ring = as_loop(&curve, tolerances.point)?;
            let area = signed_area(&ring).abs();
            if tolerances.is_zero_area(area) || area >= tolerances.small_polygon_area {
                return None;
            }
            Some(DefectResult::new(
                DefectPayload::SmallPolygon { area },
                vec![id],
                ring.start().into_iter().collect(),
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

/// 方向与期望相反的闭合曲线。孔洞的期望方向与宗地相反；圆实体没有方向，不参与检查。
pub fn wrong_winding(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .closed_curves()
        .into_iter()
        .filter(|(_, curve)| curve.kind != CurveKind::Circle)
        .filter_map(|(id, curve)| {
            let expected = match context.store.tag(id) {
                Some(EntityTag::Hole) => context.expected_winding.opposite(),
                _ => context.expected_winding,
            };
            let found = winding(&curve, tolerances);
            if found == Winding::Degenerate || found == expected {
                return None;
            }
            Some(DefectResult::new(
                DefectPayload::AntiClockwisePolygon {
                    area: signed_area(&curve),
                    found,
                },
                vec![id],
                curve.start().into_iter().collect(),
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

/// 边界相交且公共区域面积超过 `overlap_area` 的两个闭合曲线。
///
/// 完全嵌套（边界不相交）的情况交给孔洞检查。
pub fn overlaps(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.closed_curves();
    let mut results = Vec::new();
    for (i, j) in candidate_pairs(&curves, tolerances.point) {
        let (id_a, a) = &curves[i];
        let (id_b, b) = &curves[j];
        if curve_intersections(a, b, tolerances).is_empty() {
            continue;
        }
        let Some(region) = intersect_regions(a, b, tolerances) else {
            continue;
        };
        let marks = region.bounds().map(|bounds| bounds.center()).into_iter().collect();
        results.push(DefectResult::new(
            DefectPayload::IntersectPolygon {
                loops: region.loops,
                area: region.area,
            },
            vec![*id_a, *id_b],
            marks,
            context.store,
        ));
    }
    sort_results(&mut results);
    debug!(count = results.len(), "多边形重叠检查完成");
    results
}

/// 多边形 A 的顶点落在多边形 B 外侧、距 B 边界不超过 `gap` 的缝隙。
///
/// 每个有序对单独报告；载荷中的顶点属于第一个源实体，吸附目标在第二个源实体上。
pub fn gaps(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.closed_curves();
    let mut results = Vec::new();
    for (i, j) in candidate_pairs(&curves, tolerances.gap) {
        for (from, onto) in [(i, j), (j, i)] {
            let (id_a, a) = &curves[from];
            let (id_b, b) = &curves[onto];
            let snaps: Vec<GapSnap> = a
                .points()
                .enumerate()
                .filter_map(|(vertex, point)| {
                    let (_, target, distance) = b.closest_point(point)?;
                    if distance <= tolerances.point || distance > tolerances.gap {
                        return None;
                    }
                    if point_in_curve(b, point, tolerances) {
                        return None;
                    }
                    Some(GapSnap {
                        vertex,
                        from: point,
                        to: target,
                    })
                })
                .collect();
            if snaps.is_empty() {
                continue;
            }
            let marks = snaps.iter().map(|snap| snap.from).collect();
            results.push(DefectResult::new(
                DefectPayload::PolygonGap { snaps },
                vec![*id_a, *id_b],
                marks,
                context.store,
            ));
        }
    }
    sort_results(&mut results);
    results
}

/// 孔洞候选：
/// 1. 未标记的闭合曲线完整地落在另一闭合曲线内部（取面积最小的容器）；
/// 2. 全部闭合曲线的平面划分中不属于任何曲线的有界面，即被相邻多边形围出的隐含孔洞，
///    这类结果没有源实体。
pub fn holes(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.closed_curves();
    let areas: Vec<f64> = curves.iter().map(|(_, curve)| signed_area(curve).abs()).collect();
    let mut results = Vec::new();

    for (index, (id, curve)) in curves.iter().enumerate() {
        if context.store.tag(*id).is_some() || tolerances.is_zero_area(areas[index]) {
            continue;
        }
        let samples = curve.tessellate(tolerances.arc_chord);
        let container = curves
            .iter()
            .enumerate()
            .filter(|(other, (other_id, _))| {
                *other != index
                    && areas[*other] > areas[index]
                    && context.store.tag(*other_id) != Some(EntityTag::Hole)
            })
            .filter(|(_, (_, outer))| {
                curve_intersections(curve, outer, tolerances).is_empty()
                    && samples
                        .iter()
                        .all(|point| point_in_curve(outer, *point, tolerances))
            })
            .min_by(|(a, _), (b, _)| areas[*a].total_cmp(&areas[*b]).then(a.cmp(b)))
            .map(|(_, (outer_id, _))| *outer_id);
        let Some(container) = container else {
            continue;
        };
        results.push(DefectResult::new(
            DefectPayload::PolygonHole {
                container: Some(container),
                boundary: samples,
                area: areas[index],
            },
            vec![*id],
            curve.start().into_iter().collect(),
            context.store,
        ));
    }

    let rings: Vec<&Curve> = curves.iter().map(|(_, curve)| curve).collect();
    if rings.len() >= 2 {
        let arrangement = Arrangement::from_curves(&rings, tolerances);
        for face in arrangement.uncovered_faces() {
            if face.area <= tolerances.zero_area {
                continue;
            }
            results.push(DefectResult::new(
                DefectPayload::PolygonHole {
                    container: None,
                    boundary: face.boundary.clone(),
                    area: face.area,
                },
                Vec::<EntityId>::new(),
                face.boundary.clone(),
                context.store,
            ));
        }
    }
    sort_results(&mut results);
    debug!(count = results.len(), "孔洞检查完成");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztopo_core::document::{Document, EntityStore};
    use ztopo_core::geometry::Point2;
    use ztopo_core::tolerance::Tolerances;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn rect(doc: &mut Document, x0: f64, y0: f64, x1: f64, y1: f64) -> EntityId {
        // 顺时针。
        doc.add_polyline([p(x0, y0), p(x0, y1), p(x1, y1), p(x1, y0)], true, "parcel")
    }

    fn run(doc: &Document, detect: fn(&CheckContext<'_>) -> Vec<DefectResult>) -> Vec<DefectResult> {
        let ids = doc.entity_ids();
        let tolerances = Tolerances::default();
        let context = CheckContext::new(doc, &ids, &tolerances);
        detect(&context)
    }

    #[test]
    fn near_closed_and_tagged_polylines_are_unclosed() {
        let mut doc = Document::new();
        let near = doc.add_polyline([p(0.0, 0.0), p(0.0, 5.0), p(5.0, 5.0), p(0.001, 0.0)], false, "0");
        let tagged = doc.add_polyline([p(10.0, 0.0), p(10.0, 5.0), p(15.0, 5.0)], false, "0");
        doc.tag_entity(tagged, EntityTag::Parcel).unwrap();
        doc.add_polyline([p(20.0, 0.0), p(20.0, 5.0), p(25.0, 5.0)], false, "0");
        let results = run(&doc, unclosed);
        let sources: Vec<_> = results.iter().map(|r| r.source_ids[0]).collect();
        assert_eq!(sources, vec![near, tagged]);
    }

    #[test]
    fn area_thresholds_split_zero_and_small() {
        let mut doc = Document::new();
        let flat = doc.add_polyline([p(0.0, 0.0), p(5.0, 0.0), p(10.0, 0.0)], true, "0");
        let small = rect(&mut doc, 20.0, 0.0, 20.5, 0.5);
        rect(&mut doc, 30.0, 0.0, 40.0, 10.0);
        let zero = run(&doc, zero_area_loops);
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].source_ids, vec![flat]);
        let tiny = run(&doc, small_polygons);
        assert_eq!(tiny.len(), 1);
        assert_eq!(tiny[0].source_ids, vec![small]);
    }

    #[test]
    fn counter_clockwise_polygon_is_flagged() {
        let mut doc = Document::new();
        rect(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let ccw = doc.add_polyline(
            [p(20.0, 0.0), p(30.0, 0.0), p(30.0, 10.0), p(20.0, 10.0)],
            true,
            "0",
        );
        doc.add_circle(p(50.0, 0.0), 3.0, "0");
        let results = run(&doc, wrong_winding);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_ids, vec![ccw]);
        let DefectPayload::AntiClockwisePolygon { area, found } = results[0].payload else {
            panic!("unexpected payload");
        };
        assert_eq!(found, Winding::CounterClockwise);
        assert!((area - 100.0).abs() < 1e-9);
    }

    #[test]
    fn overlapping_parcels_report_shared_area() {
        let mut doc = Document::new();
        let a = rect(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let b = rect(&mut doc, 5.0, 5.0, 15.0, 15.0);
        // 只在角点接触，不算重叠。
        rect(&mut doc, 10.0, -10.0, 20.0, 0.0);
        let results = run(&doc, overlaps);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_ids, vec![a, b]);
        let DefectPayload::IntersectPolygon { area, .. } = results[0].payload else {
            panic!("unexpected payload");
        };
        assert!((area - 25.0).abs() < 1e-6);
    }

    #[test]
    fn gap_between_neighbours_is_snapped_outward_only() {
        let mut doc = Document::new();
        let a = rect(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let b = rect(&mut doc, 10.005, 0.0, 20.0, 10.0);
        let results = run(&doc, gaps);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_ids, vec![a, b]);
        assert_eq!(results[1].source_ids, vec![b, a]);
        let DefectPayload::PolygonGap { snaps } = &results[0].payload else {
            panic!("unexpected payload");
        };
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().all(|snap| (snap.to.x() - 10.005).abs() < 1e-9));
    }

    #[test]
    fn nested_and_implied_holes() {
        let mut doc = Document::new();
        let outer = rect(&mut doc, 0.0, 0.0, 10.0, 10.0);
        let inner = rect(&mut doc, 2.0, 2.0, 4.0, 4.0);
        let registered = rect(&mut doc, 6.0, 6.0, 8.0, 8.0);
        doc.tag_entity(registered, EntityTag::Parcel).unwrap();
        let results = run(&doc, holes);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_ids, vec![inner]);
        let DefectPayload::PolygonHole { container, area, .. } = &results[0].payload else {
            panic!("unexpected payload");
        };
        assert_eq!(*container, Some(outer));
        assert!((area - 4.0).abs() < 1e-9);

        // 四块宗地围出中间 1×1 的空白。
        let mut ring = Document::new();
        rect(&mut ring, 0.0, 0.0, 2.0, 1.0);
        rect(&mut ring, 2.0, 0.0, 3.0, 2.0);
        rect(&mut ring, 1.0, 2.0, 3.0, 3.0);
        rect(&mut ring, 0.0, 1.0, 1.0, 3.0);
        let results = run(&ring, holes);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_derived());
        let DefectPayload::PolygonHole { area, container, .. } = &results[0].payload else {
            panic!("unexpected payload");
        };
        assert!(container.is_none());
        assert!((area - 1.0).abs() < 1e-9);
    }
}
