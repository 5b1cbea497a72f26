use ztopo_core::curve::Curve;
use ztopo_core::document::{EntityId, Mutation, PolylineVertex};
use ztopo_core::tolerance::Tolerances;

use super::{load_curve, replace_with_pieces, require};
use crate::action::FixOutcome;
use crate::checks::is_interior_point;
use crate::checks::lines::merged_intervals;
use crate::errors::FixError;
use crate::result::{DefectPayload, DefectResult};

const PARAM_GAP: f64 = 1e-9;

fn mismatch(result: &DefectResult) -> FixError {
    FixError::UnsupportedGeometry(format!("unexpected payload for {}", result.class()))
}

/// 删除重复实体，保留 ID 较小者。
pub fn erase_duplicate(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::Duplicate { kept, duplicate } = result.payload else {
        return Err(mismatch(result));
    };
    require(mutation, kept)?;
    require(mutation, duplicate)?;
    mutation.erase_entity(duplicate)?;
    Ok(FixOutcome::new(vec![kept]))
}

/// 把聚簇中各曲线的端点吸附到簇中心。
pub fn snap_cluster(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::Clustered(cluster) = &result.payload else {
        return Err(mismatch(result));
    };
    let mut targets = Vec::new();
    for id in &cluster.entities {
        let (mut curve, layer) = load_curve(mutation, *id)?;
        let last = curve.vertex_count().saturating_sub(1);
        let ends = if curve.is_closed { vec![0] } else { vec![0, last] };
        let mut changed = false;
        for index in ends {
            let Some(vertex) = curve.vertices.get_mut(index) else {
                continue;
            };
            let member = cluster
                .points
                .iter()
                .any(|point| point.approx_eq(vertex.position, tolerances.point));
            if member && vertex.position != cluster.center {
                vertex.position = cluster.center;
                changed = true;
            }
        }
        if changed {
            mutation.replace_entity(*id, curve.to_entity(layer))?;
            targets.push(*id);
        }
    }
    if targets.is_empty() {
        return Err(FixError::UnsupportedGeometry(
            "cluster points are no longer curve ends".to_string(),
        ));
    }
    Ok(FixOutcome::new(targets))
}

/// 在两条曲线各自的内部交点处打断。
pub fn split_crossing(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::Crossing { hits } = &result.payload else {
        return Err(mismatch(result));
    };
    let [first, second] = result.source_ids.as_slice() else {
        return Err(mismatch(result));
    };
    let mut targets = Vec::new();
    for (id, use_a) in [(*first, true), (*second, false)] {
        let (curve, layer) = load_curve(mutation, id)?;
        let mut params = Vec::new();
        for hit in hits {
            let on_curve = curve
                .distance_to(hit.point)
                .is_some_and(|distance| distance <= tolerances.point * 10.0);
            if !on_curve {
                return Err(FixError::UnsupportedGeometry(format!(
                    "entity {} no longer passes through the crossing",
                    id.get()
                )));
            }
            if is_interior_point(&curve, hit.point, tolerances.point) {
                params.push(if use_a { hit.param_a } else { hit.param_b });
            }
        }
        let pieces = curve.split_at(&params);
        if pieces.len() > 1 {
            targets.extend(replace_with_pieces(mutation, id, &layer, pieces)?);
        }
    }
    if targets.is_empty() {
        return Err(FixError::UnsupportedGeometry(
            "crossing has no interior split point".to_string(),
        ));
    }
    Ok(FixOutcome::new(targets))
}

/// 在自交点处打断。只有一个自交点的闭合曲线拆成两个闭合环，其余情况拆成开放曲线。
pub fn split_self_intersection(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::SelfIntersect { hits } = &result.payload else {
        return Err(mismatch(result));
    };
    let Some(&id) = result.source_ids.first() else {
        return Err(mismatch(result));
    };
    let (curve, layer) = load_curve(mutation, id)?;
    let pieces = match hits.as_slice() {
        [hit] if curve.is_closed => {
            let (low, high) = (hit.param_a.min(hit.param_b), hit.param_a.max(hit.param_b));
            [curve.sub_curve(low, high), curve.sub_curve(high, low)]
                .into_iter()
                .flatten()
                .filter_map(close_piece)
                .collect()
        }
        _ => {
            let params: Vec<f64> = hits
                .iter()
                .flat_map(|hit| [hit.param_a, hit.param_b])
                .collect();
            curve.split_at(&params)
        }
    };
    if pieces.len() < 2 {
        return Err(FixError::UnsupportedGeometry(format!(
            "entity {} cannot be split at its self intersections",
            id.get()
        )));
    }
    Ok(FixOutcome::new(replace_with_pieces(mutation, id, &layer, pieces)?))
}

/// 首尾重合的开放曲线转为闭合曲线。
fn close_piece(piece: Curve) -> Option<Curve> {
    let mut vertices: Vec<PolylineVertex> = piece.vertices;
    vertices.pop();
    (vertices.len() >= 2).then(|| Curve::polyline(vertices, true))
}

/// 删除悬挂链覆盖的参数区间，整条曲线都悬挂时删除实体。
pub fn trim_dangling(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::Dangling { pieces, .. } = &result.payload else {
        return Err(mismatch(result));
    };
    let mut targets: Vec<EntityId> = Vec::new();
    for id in &result.source_ids {
        let (curve, layer) = load_curve(mutation, *id)?;
        if curve.is_closed {
            return Err(FixError::UnsupportedGeometry(format!(
                "entity {} is closed",
                id.get()
            )));
        }
        let end = curve.param_end();
        let removed = merged_intervals(pieces, *id);
        if removed.iter().any(|(_, high)| *high > end + PARAM_GAP) {
            return Err(FixError::UnsupportedGeometry(format!(
                "entity {} changed since the check",
                id.get()
            )));
        }
        let mut kept = Vec::new();
        let mut cursor = 0.0;
        for (low, high) in removed.into_iter().chain(std::iter::once((end, end))) {
            if low > cursor + PARAM_GAP {
                kept.extend(curve.sub_curve(cursor, low));
            }
            cursor = cursor.max(high);
        }
        targets.extend(replace_with_pieces(mutation, *id, &layer, kept)?);
    }
    Ok(FixOutcome::new(targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztopo_core::document::{Document, EntityStore};
    use ztopo_core::geometry::Point2;

    use crate::action::CheckContext;
    use crate::checks;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn detect(
        doc: &Document,
        detector: fn(&CheckContext<'_>) -> Vec<DefectResult>,
    ) -> Vec<DefectResult> {
        let ids = doc.entity_ids();
        let tolerances = Tolerances::default();
        detector(&CheckContext::new(doc, &ids, &tolerances))
    }

    fn apply(
        doc: &mut Document,
        result: &DefectResult,
        fixer: fn(&DefectResult, &mut Mutation<'_>, &Tolerances) -> Result<FixOutcome, FixError>,
    ) -> Result<FixOutcome, FixError> {
        let mut mutation = Mutation::begin(doc);
        let outcome = fixer(result, &mut mutation, &Tolerances::default())?;
        mutation.commit();
        Ok(outcome)
    }

    #[test]
    fn crossing_split_removes_the_defect() {
        let mut doc = Document::new();
        let a = doc.add_line(p(0.0, 0.0), p(10.0, 10.0), "0");
        let b = doc.add_line(p(0.0, 10.0), p(10.0, 0.0), "0");
        let results = detect(&doc, checks::lines::crossings);
        assert_eq!(results.len(), 1);
        let outcome = apply(&mut doc, &results[0], split_crossing).unwrap();
        assert_eq!(outcome.targets.len(), 4);
        assert_eq!(&outcome.targets[..1], &[a]);
        assert!(outcome.targets.contains(&b));
        assert_eq!(doc.len(), 4);
        assert!(detect(&doc, checks::lines::crossings).is_empty());
    }

    #[test]
    fn figure_eight_becomes_two_loops() {
        let mut doc = Document::new();
        let bow = doc.add_polyline([p(0.0, 0.0), p(2.0, 2.0), p(2.0, 0.0), p(0.0, 2.0)], true, "0");
        let results = detect(&doc, checks::lines::self_intersections);
        let outcome = apply(&mut doc, &results[0], split_self_intersection).unwrap();
        assert_eq!(outcome.targets.len(), 2);
        assert_eq!(outcome.targets[0], bow);
        for id in &outcome.targets {
            let curve = doc.curve(*id).unwrap();
            assert!(curve.is_closed);
            assert!((ztopo_core::algorithms::area::signed_area(&curve).abs() - 1.0).abs() < 1e-9);
        }
        assert!(detect(&doc, checks::lines::self_intersections).is_empty());
    }

    #[test]
    fn dangling_tail_is_trimmed() {
        let mut doc = Document::new();
        doc.add_polyline([p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)], true, "0");
        let stem = doc.add_line(p(5.0, 10.0), p(5.0, -5.0), "0");
        let results = detect(&doc, checks::lines::dangling);
        assert_eq!(results.len(), 1);
        apply(&mut doc, &results[0], trim_dangling).unwrap();
        let trimmed = doc.curve(stem).unwrap();
        assert!(trimmed.end().unwrap().approx_eq(p(5.0, 0.0), 1e-9));
        assert!(detect(&doc, checks::lines::dangling).is_empty());
    }

    #[test]
    fn cluster_snaps_to_centre() {
        let mut doc = Document::new();
        let a = doc.add_line(p(-5.0, 0.0), p(0.0, 0.0), "0");
        let b = doc.add_line(p(0.0006, 0.0), p(5.0, 0.0), "0");
        let results = detect(&doc, checks::lines::clustered_nodes);
        assert_eq!(results.len(), 1);
        let outcome = apply(&mut doc, &results[0], snap_cluster).unwrap();
        assert_eq!(outcome.targets, vec![a, b]);
        let end = doc.curve(a).unwrap().end().unwrap();
        let start = doc.curve(b).unwrap().start().unwrap();
        assert!(end.approx_eq(p(0.0003, 0.0), 1e-12));
        assert_eq!(end, start);
    }

    #[test]
    fn duplicate_keeps_lower_id() {
        let mut doc = Document::new();
        let a = doc.add_line(p(0.0, 0.0), p(3.0, 0.0), "0");
        let b = doc.add_line(p(0.0, 0.0), p(3.0, 0.0), "0");
        let results = detect(&doc, checks::lines::duplicates);
        apply(&mut doc, &results[0], erase_duplicate).unwrap();
        assert!(doc.entity(a).is_some());
        assert!(doc.entity(b).is_none());
    }

    #[test]
    fn stale_duplicate_fails_without_writing() {
        let mut doc = Document::new();
        let a = doc.add_line(p(0.0, 0.0), p(3.0, 0.0), "0");
        let b = doc.add_line(p(0.0, 0.0), p(3.0, 0.0), "0");
        let results = detect(&doc, checks::lines::duplicates);
        doc.erase_entity(a).unwrap();
        let error = apply(&mut doc, &results[0], erase_duplicate).unwrap_err();
        assert!(matches!(error, FixError::EntityMissing(id) if id == a.get()));
        assert!(doc.entity(b).is_some());
    }
}
