//! 线网检查：零长度、重复、节点聚簇、交叉、自相交与悬挂。

use tracing::debug;
use ztopo_core::algorithms::intersect::{curve_intersections, self_intersections as curve_self_intersections};
use ztopo_core::curve::Curve;
use ztopo_core::document::EntityId;

use super::{candidate_pairs, is_interior_point, sort_results};
use crate::action::CheckContext;
use crate::graph::{CurveGraph, GraphOptions};
use crate::result::{DanglingPiece, DefectPayload, DefectResult, HitRecord};

pub fn zero_length(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .curves()
        .into_iter()
        .filter_map(|(id, curve)| {
            let length = curve.length();
            if !tolerances.is_zero_length(length) {
                return None;
            }
            Some(DefectResult::new(
                DefectPayload::ZeroLength { length },
                vec![id],
                curve.start().into_iter().collect(),
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

/// 两条曲线端点重合（同向或反向）、长度相同、中点重合时视为重复，保留 ID 较小者。
pub fn duplicates(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.curves();
    let mut results = Vec::new();
    for (i, j) in candidate_pairs(&curves, tolerances.point) {
        let (kept, a) = &curves[i];
        let (duplicate, b) = &curves[j];
        if !same_geometry(a, b, tolerances.point) {
            continue;
        }
        results.push(DefectResult::new(
            DefectPayload::Duplicate {
                kept: *kept,
                duplicate: *duplicate,
            },
            vec![*kept, *duplicate],
            b.point_at_fraction(0.5).into_iter().collect(),
            context.store,
        ));
    }
    sort_results(&mut results);
    results
}

fn same_geometry(a: &Curve, b: &Curve, tolerance: f64) -> bool {
    if a.is_closed != b.is_closed {
        return false;
    }
    let (Some(a_start), Some(a_end), Some(b_start), Some(b_end)) = (a.start(), a.end(), b.start(), b.end())
    else {
        return false;
    };
    let forward = a_start.approx_eq(b_start, tolerance) && a_end.approx_eq(b_end, tolerance);
    let backward = a_start.approx_eq(b_end, tolerance) && a_end.approx_eq(b_start, tolerance);
    if !(forward || backward) {
        return false;
    }
    let (la, lb) = (a.length(), b.length());
    if (la - lb).abs() > tolerance.max(la.max(lb) * 1e-9) {
        return false;
    }
    // 中点与四分点都落在对方曲线上，排除端点相同但走向不同的情况。
    [0.25, 0.5, 0.75].into_iter().all(|fraction| {
        a.point_at_fraction(fraction)
            .and_then(|point| b.distance_to(point))
            .is_some_and(|distance| distance <= tolerance)
    })
}

/// 不打断的曲线图中，彼此相距不超过聚簇容差的不同节点。
pub fn clustered_nodes(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.curves();
    let graph = CurveGraph::build(&curves, &GraphOptions::new(*tolerances));
    let mut results: Vec<DefectResult> = graph
        .cluster_nodes(tolerances.cluster)
        .into_iter()
        .map(|cluster| {
            let sources = cluster.entities.clone();
            let marks = cluster.points.clone();
            DefectResult::new(DefectPayload::Clustered(cluster), sources, marks, context.store)
        })
        .collect();
    sort_results(&mut results);
    results
}

/// 两条曲线在非共有端点处相交。端点对端点的接触是正常的结点，不报告。
pub fn crossings(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let curves = context.curves();
    let mut results = Vec::new();
    for (i, j) in candidate_pairs(&curves, tolerances.point) {
        let (id_a, a) = &curves[i];
        let (id_b, b) = &curves[j];
        let hits: Vec<HitRecord> = curve_intersections(a, b, tolerances)
            .into_iter()
            .filter(|hit| {
                is_interior_point(a, hit.point, tolerances.point)
                    || is_interior_point(b, hit.point, tolerances.point)
            })
            .map(HitRecord::from)
            .collect();
        if hits.is_empty() {
            continue;
        }
        let marks = hits.iter().map(|hit| hit.point).collect();
        results.push(DefectResult::new(
            DefectPayload::Crossing { hits },
            vec![*id_a, *id_b],
            marks,
            context.store,
        ));
    }
    sort_results(&mut results);
    debug!(count = results.len(), "交叉检查完成");
    results
}

pub fn self_intersections(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerances = context.tolerances;
    let mut results: Vec<DefectResult> = context
        .curves()
        .into_iter()
        .filter_map(|(id, curve)| {
            let hits: Vec<HitRecord> = curve_self_intersections(&curve, tolerances)
                .into_iter()
                .map(HitRecord::from)
                .collect();
            if hits.is_empty() {
                return None;
            }
            let marks = hits.iter().map(|hit| hit.point).collect();
            Some(DefectResult::new(
                DefectPayload::SelfIntersect { hits },
                vec![id],
                marks,
                context.store,
            ))
        })
        .collect();
    sort_results(&mut results);
    results
}

/// 在交点处打断的曲线图上剪叶，每条被剪下的链是一条悬挂线。
pub fn dangling(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let curves = context.curves();
    let options = GraphOptions::new(*context.tolerances).with_split(true);
    let graph = CurveGraph::build(&curves, &options);
    let mut results = Vec::new();
    for chain in graph.dangling_chains() {
        let pieces: Vec<DanglingPiece> = chain
            .edges
            .iter()
            .filter_map(|&edge| graph.edge(edge))
            .map(|edge| DanglingPiece {
                entity: edge.entity,
                t0: edge.t0.min(edge.t1),
                t1: edge.t0.max(edge.t1),
            })
            .collect();
        let mut sources: Vec<EntityId> = chain.entities.clone();
        sources.sort();
        results.push(DefectResult::new(
            DefectPayload::Dangling {
                free_end: chain.free_point,
                pieces,
            },
            sources,
            vec![chain.free_point],
            context.store,
        ));
    }
    sort_results(&mut results);
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        count = results.len(),
        "悬挂线检查完成"
    );
    results
}

/// 悬挂链在某条曲线上覆盖的参数区间，按起点排序并合并相接区间。
pub(crate) fn merged_intervals(pieces: &[DanglingPiece], entity: EntityId) -> Vec<(f64, f64)> {
    let mut intervals: Vec<(f64, f64)> = pieces
        .iter()
        .filter(|piece| piece.entity == entity)
        .map(|piece| (piece.t0, piece.t1))
        .collect();
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f64, f64)> = Vec::new();
    for (low, high) in intervals {
        match merged.last_mut() {
            Some(last) if low <= last.1 + 1e-9 => last.1 = last.1.max(high),
            _ => merged.push((low, high)),
        }
    }
    merged
}
