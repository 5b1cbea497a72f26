//! 各类缺陷的修复。修复只通过 [`Mutation`] 写入，出错时由调用方丢弃守卫回滚。

pub mod lines;
pub mod polygons;

use ztopo_core::curve::Curve;
use ztopo_core::document::{EntityId, Mutation};
use ztopo_core::tolerance::Tolerances;

use crate::action::FixOutcome;
use crate::errors::FixError;
use crate::result::DefectResult;

/// 读取实体的曲线几何与图层。
pub(crate) fn load_curve(mutation: &Mutation<'_>, id: EntityId) -> Result<(Curve, String), FixError> {
    let entity = mutation
        .entity(id)
        .ok_or(FixError::EntityMissing(id.get()))?;
    let curve = Curve::from_entity(entity).ok_or_else(|| {
        FixError::UnsupportedGeometry(format!("entity {} is not a curve", id.get()))
    })?;
    Ok((curve, entity.layer_name().to_string()))
}

pub(crate) fn require(mutation: &Mutation<'_>, id: EntityId) -> Result<(), FixError> {
    match mutation.entity(id) {
        Some(_) => Ok(()),
        None => Err(FixError::EntityMissing(id.get())),
    }
}

/// 用若干段曲线替换原实体：第一段原位替换保留 ID，其余追加为新实体；没有任何段时删除原实体。
pub(crate) fn replace_with_pieces(
    mutation: &mut Mutation<'_>,
    id: EntityId,
    layer: &str,
    pieces: Vec<Curve>,
) -> Result<Vec<EntityId>, FixError> {
    let mut pieces = pieces.into_iter();
    let Some(first) = pieces.next() else {
        mutation.erase_entity(id)?;
        return Ok(Vec::new());
    };
    mutation.replace_entity(id, first.to_entity(layer))?;
    let mut targets = vec![id];
    for piece in pieces {
        targets.push(mutation.append_entity(piece.to_entity(layer)));
    }
    Ok(targets)
}

/// 删除全部源实体。
pub fn erase_sources(
    result: &DefectResult,
    mutation: &mut Mutation<'_>,
    _tolerances: &Tolerances,
) -> Result<FixOutcome, FixError> {
    for id in &result.source_ids {
        require(mutation, *id)?;
        mutation.erase_entity(*id)?;
    }
    Ok(FixOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztopo_core::document::{Document, EntityStore};
    use ztopo_core::geometry::Point2;

    use crate::result::DefectPayload;

    #[test]
    fn erasing_a_missing_source_rolls_back_earlier_erases() {
        let mut doc = Document::new();
        let a = doc.add_line(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0), "0");
        let result = DefectResult::new(
            DefectPayload::ZeroLength { length: 0.0 },
            vec![a, EntityId::new(42)],
            Vec::new(),
            &doc,
        );
        {
            let mut mutation = Mutation::begin(&mut doc);
            let outcome = erase_sources(&result, &mut mutation, &Tolerances::default());
            assert!(matches!(outcome, Err(FixError::EntityMissing(42))));
        }
        assert!(doc.entity(a).is_some());
    }

    #[test]
    fn pieces_keep_the_original_id_first() {
        let mut doc = Document::new();
        let id = doc.add_line(Point2::new(0.0, 0.0), Point2::new(4.0, 0.0), "road");
        let pieces = Curve::line(Point2::new(0.0, 0.0), Point2::new(4.0, 0.0)).split_at(&[0.25, 0.5]);
        let targets = {
            let mut mutation = Mutation::begin(&mut doc);
            let targets = replace_with_pieces(&mut mutation, id, "road", pieces).unwrap();
            mutation.commit();
            targets
        };
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], id);
        assert_eq!(doc.len(), 3);
        assert!(doc.entities().all(|(_, entity)| entity.layer_name() == "road"));
        let first = doc.curve(id).unwrap();
        assert!((first.length() - 1.0).abs() < 1e-12);
    }
}
