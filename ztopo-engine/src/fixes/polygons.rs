use ztopo_core::curve::Curve;
use ztopo_core::document::{EntityTag, Mutation};
use ztopo_core::geometry::Point2;
use ztopo_core::tolerance::Tolerances;

use super::{load_curve, require};
use crate::action::FixOutcome;
use crate::errors::FixError;
use crate::result::{DefectPayload, DefectResult};

/// 推导出的孔洞边界写入的图层。
pub const HOLE_LAYER: &str = "hole";

fn mismatch(result: &DefectResult) -> FixError {
    FixError::UnsupportedGeometry(format!("unexpected payload for {}", result.class()))
}

/// 闭合多段线；末点与首点在 `gap` 内时去掉重复的末点。
pub fn close_polygon(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let Some(&id) = result.source_ids.first() else {
        return Err(mismatch(result));
    };
    let (curve, layer) = load_curve(mutation, id)?;
    if curve.is_closed {
        return Err(FixError::UnsupportedGeometry(format!(
            "entity {} is already closed",
            id.get()
        )));
    }
    let mut vertices = curve.vertices;
    let seam = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => first.position.distance(last.position) <= tolerances.gap,
        _ => false,
    };
    if seam && vertices.len() > 3 {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return Err(FixError::UnsupportedGeometry(format!(
            "entity {} has too few vertices to close",
            id.get()
        )));
    }
    let closed = Curve::polyline(vertices, true);
    mutation.replace_entity(id, closed.to_entity(layer))?;
    Ok(FixOutcome::new(vec![id]))
}

pub fn reverse_polygon(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let Some(&id) = result.source_ids.first() else {
        return Err(mismatch(result));
    };
    let (curve, layer) = load_curve(mutation, id)?;
    if !curve.is_closed {
        return Err(FixError::UnsupportedGeometry(format!(
            "entity {} is not closed",
            id.get()
        )));
    }
    mutation.replace_entity(id, curve.reversed().to_entity(layer))?;
    Ok(FixOutcome::new(vec![id]))
}

/// 把第一个源实体上记录的顶点移到第二个源实体的边界上。
pub fn snap_gap(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::PolygonGap { snaps } = &result.payload else {
        return Err(mismatch(result));
    };
    let [moved, onto] = result.source_ids.as_slice() else {
        return Err(mismatch(result));
    };
    require(mutation, *onto)?;
    let (mut curve, layer) = load_curve(mutation, *moved)?;
    for snap in snaps {
        let Some(vertex) = curve.vertices.get_mut(snap.vertex) else {
            return Err(FixError::UnsupportedGeometry(format!(
                "entity {} lost vertex {}",
                moved.get(),
                snap.vertex
            )));
        };
        if !vertex.position.approx_eq(snap.from, tolerances.point) {
            return Err(FixError::UnsupportedGeometry(format!(
                "vertex {} of entity {} moved since the check",
                snap.vertex,
                moved.get()
            )));
        }
        vertex.position = snap.to;
    }
    mutation.replace_entity(*moved, curve.to_entity(layer))?;
    Ok(FixOutcome::new(vec![*moved]))
}

/// 有源实体时标记为孔洞；推导出的孔洞追加一条带孔洞标记的闭合多段线。
pub fn register_hole(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    let DefectPayload::PolygonHole { boundary, .. } = &result.payload else {
        return Err(mismatch(result));
    };
    if let Some(&id) = result.source_ids.first() {
        require(mutation, id)?;
        mutation.set_tag(id, Some(EntityTag::Hole))?;
        return Ok(FixOutcome::new(vec![id]));
    }

    let mut ring: Vec<Point2> = boundary.clone();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return Err(FixError::UnsupportedGeometry(
            "hole boundary has fewer than three points".to_string(),
        ));
    }
    let curve = Curve::from_points(ring, true);
    let id = mutation.append_entity(curve.to_entity(HOLE_LAYER));
    mutation.set_tag(id, Some(EntityTag::Hole))?;
    Ok(FixOutcome::new(vec![id]))
}
