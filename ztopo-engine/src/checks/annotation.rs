use ztopo_core::geometry::{Bounds2D, Point2, Vector2};

use super::sort_results;
use crate::action::CheckContext;
use crate::result::{DefectPayload, DefectResult};

/// 外框相互重叠的文字注记。外框按字符数估算并随旋转角旋转。
pub fn overlapping_texts(context: &CheckContext<'_>) -> Vec<DefectResult> {
    let tolerance = context.tolerances.point;
    let texts = context.texts();
    let boxes: Vec<[Point2; 4]> = texts.iter().map(|(_, text)| text.extents()).collect();
    let mut results = Vec::new();
    for i in 0..texts.len() {
        for j in i + 1..texts.len() {
            let (Some(a), Some(b)) = (
                Bounds2D::from_points(boxes[i]),
                Bounds2D::from_points(boxes[j]),
            ) else {
                continue;
            };
            let Some(overlap) = a.intersection(&b) else {
                continue;
            };
            if !quads_overlap(&boxes[i], &boxes[j], tolerance) {
                continue;
            }
            results.push(DefectResult::new(
                DefectPayload::AnnotationOverlap { overlap },
                vec![texts[i].0, texts[j].0],
                vec![overlap.center()],
                context.store,
            ));
        }
    }
    sort_results(&mut results);
    results
}

/// 分离轴判定两个凸四边形是否有正面积的重叠，仅边界接触不算。
fn quads_overlap(a: &[Point2; 4], b: &[Point2; 4], tolerance: f64) -> bool {
    for quad in [a, b] {
        for index in 0..4 {
            let edge = quad[index].vector_to(quad[(index + 1) % 4]);
            let Some(axis) = edge.perp().normalize() else {
                continue;
            };
            let (a_min, a_max) = project(a, axis);
            let (b_min, b_max) = project(b, axis);
            if a_max <= b_min + tolerance || b_max <= a_min + tolerance {
                return false;
            }
        }
    }
    true
}

fn project(quad: &[Point2; 4], axis: Vector2) -> (f64, f64) {
    quad.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), point| {
        let value = Vector2::new(point.x(), point.y()).dot(axis);
        (low.min(value), high.max(value))
    })
}
