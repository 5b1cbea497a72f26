use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use ztopo_core::algorithms::area::Winding;
use ztopo_core::algorithms::intersect::IntersectionPoint;
use ztopo_core::document::{EntityId, EntityStore};
use ztopo_core::geometry::{Bounds2D, Point2};

use crate::graph::ClusterNodesInfo;

/// 缺陷类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectClass {
    ZeroLength,
    Duplicate,
    Clustered,
    Crossing,
    SelfIntersect,
    Dangling,
    UnclosedPolygon,
    ZeroAreaLoop,
    SmallPolygon,
    AntiClockwisePolygon,
    IntersectPolygon,
    PolygonGap,
    PolygonHole,
    AnnotationOverlap,
}

impl DefectClass {
    pub const ALL: [DefectClass; 14] = [
        DefectClass::ZeroLength,
        DefectClass::Duplicate,
        DefectClass::Clustered,
        DefectClass::Crossing,
        DefectClass::SelfIntersect,
        DefectClass::Dangling,
        DefectClass::UnclosedPolygon,
        DefectClass::ZeroAreaLoop,
        DefectClass::SmallPolygon,
        DefectClass::AntiClockwisePolygon,
        DefectClass::IntersectPolygon,
        DefectClass::PolygonGap,
        DefectClass::PolygonHole,
        DefectClass::AnnotationOverlap,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DefectClass::ZeroLength => "zero_length",
            DefectClass::Duplicate => "duplicate",
            DefectClass::Clustered => "clustered",
            DefectClass::Crossing => "crossing",
            DefectClass::SelfIntersect => "self_intersect",
            DefectClass::Dangling => "dangling",
            DefectClass::UnclosedPolygon => "unclosed_polygon",
            DefectClass::ZeroAreaLoop => "zero_area_loop",
            DefectClass::SmallPolygon => "small_polygon",
            DefectClass::AntiClockwisePolygon => "anti_clockwise_polygon",
            DefectClass::IntersectPolygon => "intersect_polygon",
            DefectClass::PolygonGap => "polygon_gap",
            DefectClass::PolygonHole => "polygon_hole",
            DefectClass::AnnotationOverlap => "annotation_overlap",
        }
    }

    pub fn from_name(name: &str) -> Option<DefectClass> {
        DefectClass::ALL.into_iter().find(|class| class.name() == name)
    }
}

impl fmt::Display for DefectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 结果状态。除 `Pending` 外均为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Fixed,
    Rejected,
    Invalid,
    Failed,
    NoFixMethod,
}

impl ResultStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResultStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultId(u64);

impl ResultId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 悬挂链上属于同一实体的一段参数区间。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DanglingPiece {
    pub entity: EntityId,
    pub t0: f64,
    pub t1: f64,
}

/// 缝隙修复时把 `entity` 的第 `vertex` 个顶点从 `from` 移到 `to`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapSnap {
    pub vertex: usize,
    pub from: Point2,
    pub to: Point2,
}

/// 交点的可序列化形式。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub point: Point2,
    pub param_a: f64,
    pub param_b: f64,
}

impl From<IntersectionPoint> for HitRecord {
    fn from(hit: IntersectionPoint) -> Self {
        Self {
            point: hit.point,
            param_a: hit.param_a,
            param_b: hit.param_b,
        }
    }
}

/// 各类缺陷的载荷，判别式即缺陷类别。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum DefectPayload {
    /// `param_a` 属于第一个源实体，`param_b` 属于第二个。
    Crossing { hits: Vec<HitRecord> },
    Duplicate { kept: EntityId, duplicate: EntityId },
    Dangling {
        free_end: Point2,
        pieces: Vec<DanglingPiece>,
    },
    Clustered(ClusterNodesInfo),
    ZeroLength { length: f64 },
    ZeroAreaLoop { area: f64 },
    SmallPolygon { area: f64 },
    UnclosedPolygon { gap: f64 },
    SelfIntersect { hits: Vec<HitRecord> },
    AntiClockwisePolygon { area: f64, found: Winding },
    IntersectPolygon { loops: Vec<Vec<Point2>>, area: f64 },
    PolygonGap { snaps: Vec<GapSnap> },
    /// `container` 为空且无源实体时是由多边形排列推出的隐含孔洞。
    PolygonHole {
        container: Option<EntityId>,
        boundary: Vec<Point2>,
        area: f64,
    },
    AnnotationOverlap { overlap: Bounds2D },
}

impl DefectPayload {
    pub fn class(&self) -> DefectClass {
        match self {
            DefectPayload::Crossing { .. } => DefectClass::Crossing,
            DefectPayload::Duplicate { .. } => DefectClass::Duplicate,
            DefectPayload::Dangling { .. } => DefectClass::Dangling,
            DefectPayload::Clustered(_) => DefectClass::Clustered,
            DefectPayload::ZeroLength { .. } => DefectClass::ZeroLength,
            DefectPayload::ZeroAreaLoop { .. } => DefectClass::ZeroAreaLoop,
            DefectPayload::SmallPolygon { .. } => DefectClass::SmallPolygon,
            DefectPayload::UnclosedPolygon { .. } => DefectClass::UnclosedPolygon,
            DefectPayload::SelfIntersect { .. } => DefectClass::SelfIntersect,
            DefectPayload::AntiClockwisePolygon { .. } => DefectClass::AntiClockwisePolygon,
            DefectPayload::IntersectPolygon { .. } => DefectClass::IntersectPolygon,
            DefectPayload::PolygonGap { .. } => DefectClass::PolygonGap,
            DefectPayload::PolygonHole { .. } => DefectClass::PolygonHole,
            DefectPayload::AnnotationOverlap { .. } => DefectClass::AnnotationOverlap,
        }
    }
}

/// 一条检查结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectResult {
    id: ResultId,
    pub payload: DefectPayload,
    pub source_ids: Vec<EntityId>,
    pub target_ids: Vec<EntityId>,
    pub mark_points: Vec<Point2>,
    status: ResultStatus,
    extents: Option<Bounds2D>,
    failure: Option<String>,
}

impl DefectResult {
    /// 构造时即计算范围：源实体范围并上标记点；全部退化时为 `None`。
    pub fn new(
        payload: DefectPayload,
        source_ids: Vec<EntityId>,
        mark_points: Vec<Point2>,
        store: &dyn EntityStore,
    ) -> Self {
        let mut bounds = Bounds2D::empty();
        for id in &source_ids {
            if let Some(entity_bounds) = store.entity(*id).and_then(|entity| entity.bounds()) {
                bounds.include_bounds(&entity_bounds);
            }
        }
        for point in &mark_points {
            if point.is_finite() {
                bounds.include_point(*point);
            }
        }
        Self {
            id: ResultId(0),
            payload,
            source_ids,
            target_ids: Vec::new(),
            mark_points,
            status: ResultStatus::Pending,
            extents: if bounds.is_empty() { None } else { Some(bounds) },
            failure: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ResultId {
        self.id
    }

    #[inline]
    pub fn class(&self) -> DefectClass {
        self.payload.class()
    }

    #[inline]
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    #[inline]
    pub fn extents(&self) -> Option<Bounds2D> {
        self.extents
    }

    /// 修复失败时的错误描述。
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// 无源实体的派生结果（例如隐含孔洞）。
    #[inline]
    pub fn is_derived(&self) -> bool {
        self.source_ids.is_empty()
    }

    pub fn shares_source(&self, ids: &[EntityId]) -> bool {
        self.source_ids.iter().any(|id| ids.contains(id))
    }

    pub(crate) fn set_status(&mut self, status: ResultStatus) {
        self.status = status;
    }

    pub(crate) fn mark_fixed(&mut self, targets: Vec<EntityId>) {
        self.status = ResultStatus::Fixed;
        self.target_ids = targets;
        self.failure = None;
    }

    pub(crate) fn mark_failed(&mut self, reason: String) {
        self.status = ResultStatus::Failed;
        self.failure = Some(reason);
    }

    /// 同类结果的稳定排序键。
    pub fn sort_key(&self) -> (Vec<EntityId>, Vec<(u64, u64)>) {
        let points = self
            .mark_points
            .iter()
            .map(|p| (p.x().to_bits(), p.y().to_bits()))
            .collect();
        (self.source_ids.clone(), points)
    }
}

/// 按状态统计的数量。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub fixed: usize,
    pub rejected: usize,
    pub invalid: usize,
    pub failed: usize,
    pub no_fix_method: usize,
}

impl StatusCounts {
    fn record(&mut self, status: ResultStatus) {
        match status {
            ResultStatus::Pending => self.pending += 1,
            ResultStatus::Fixed => self.fixed += 1,
            ResultStatus::Rejected => self.rejected += 1,
            ResultStatus::Invalid => self.invalid += 1,
            ResultStatus::Failed => self.failed += 1,
            ResultStatus::NoFixMethod => self.no_fix_method += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.fixed + self.rejected + self.invalid + self.failed + self.no_fix_method
    }
}

/// 一次检查产生的全部结果：按 ID 存储，按源实体建立索引，按类别分组。
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    results: Vec<DefectResult>,
    by_id: HashMap<ResultId, usize>,
    by_entity: HashMap<EntityId, Vec<ResultId>>,
    groups: BTreeMap<DefectClass, Vec<ResultId>>,
    next_id: u64,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut result: DefectResult) -> ResultId {
        self.next_id += 1;
        let id = ResultId(self.next_id);
        result.id = id;
        for entity in &result.source_ids {
            let row = self.by_entity.entry(*entity).or_default();
            if !row.contains(&id) {
                row.push(id);
            }
        }
        self.groups.entry(result.class()).or_default().push(id);
        self.by_id.insert(id, self.results.len());
        self.results.push(result);
        id
    }

    pub fn get(&self, id: ResultId) -> Option<&DefectResult> {
        self.by_id.get(&id).map(|&index| &self.results[index])
    }

    pub(crate) fn get_mut(&mut self, id: ResultId) -> Option<&mut DefectResult> {
        self.by_id.get(&id).map(|&index| &mut self.results[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefectResult> {
        self.results.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 已有结果的类别，按类别顺序。
    pub fn classes(&self) -> impl Iterator<Item = DefectClass> + '_ {
        self.groups.keys().copied()
    }

    pub fn group(&self, class: DefectClass) -> impl Iterator<Item = &DefectResult> {
        self.groups
            .get(&class)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
    }

    pub fn group_ids(&self, class: DefectClass) -> Vec<ResultId> {
        self.groups.get(&class).cloned().unwrap_or_default()
    }

    /// 以 `entity` 为源的全部结果。
    pub fn sharing(&self, entity: EntityId) -> &[ResultId] {
        self.by_entity
            .get(&entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pending_ids(&self, class: DefectClass) -> Vec<ResultId> {
        self.group(class)
            .filter(|result| result.status() == ResultStatus::Pending)
            .map(DefectResult::id)
            .collect()
    }

    pub fn has_pending(&self, class: DefectClass) -> bool {
        self.group(class)
            .any(|result| result.status() == ResultStatus::Pending)
    }

    /// 把与 `entities` 共享源实体的其他待处理结果标记为失效，返回被标记的 ID。
    pub fn invalidate_sharing(&mut self, fixed: ResultId, entities: &[EntityId]) -> Vec<ResultId> {
        let mut affected: Vec<ResultId> = entities
            .iter()
            .flat_map(|entity| self.sharing(*entity).iter().copied())
            .filter(|id| *id != fixed)
            .collect();
        affected.sort();
        affected.dedup();
        let mut invalidated = Vec::new();
        for id in affected {
            if let Some(result) = self.get_mut(id) {
                if result.status() == ResultStatus::Pending {
                    result.set_status(ResultStatus::Invalid);
                    invalidated.push(id);
                }
            }
        }
        invalidated
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in &self.results {
            counts.record(result.status());
        }
        counts
    }

    pub fn counts_for(&self, class: DefectClass) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in self.group(class) {
            counts.record(result.status());
        }
        counts
    }

    /// 丢弃全部结果，ID 继续递增。
    pub fn clear(&mut self) {
        self.results.clear();
        self.by_id.clear();
        self.by_entity.clear();
        self.groups.clear();
    }
}
