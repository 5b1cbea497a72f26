use std::collections::{BTreeMap, HashMap};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::curve::{Curve, Segment};
use crate::geometry::{Bounds2D, Point2, Vector2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 提供原始数值，便于序列化或日志输出。
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub is_visible: bool,
}

impl Layer {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_visible: true,
        }
    }
}

/// 带外属性，用于区分宗地边界与孔洞。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTag {
    Parcel,
    Hole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Line(Line),
    Circle(Circle),
    Arc(Arc),
    Polyline(Polyline),
    Text(Text),
}

impl Entity {
    #[inline]
    pub fn layer_name(&self) -> &str {
        match self {
            Entity::Line(line) => &line.layer,
            Entity::Circle(circle) => &circle.layer,
            Entity::Arc(arc) => &arc.layer,
            Entity::Polyline(polyline) => &polyline.layer,
            Entity::Text(text) => &text.layer,
        }
    }

    /// 是否为可参与拓扑检查的曲线。
    #[inline]
    pub fn is_curve(&self) -> bool {
        !matches!(self, Entity::Text(_))
    }

    /// 计算实体的 2D 轴对齐范围，文字按估算外框处理。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        match self {
            Entity::Line(line) => {
                bounds.include_point(line.start);
                bounds.include_point(line.end);
            }
            Entity::Circle(circle) => {
                let radius = circle.radius.abs();
                let center = circle.center;
                bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
            }
            Entity::Arc(arc) => {
                arc_bounds(arc, &mut bounds);
            }
            Entity::Polyline(polyline) => {
                let count = polyline.vertices.len();
                for (index, vertex) in polyline.vertices.iter().enumerate() {
                    bounds.include_point(vertex.position);
                    let next = if index + 1 < count {
                        Some(&polyline.vertices[index + 1])
                    } else if polyline.is_closed && count > 1 {
                        Some(&polyline.vertices[0])
                    } else {
                        None
                    };
                    if let Some(next) = next {
                        let segment = Segment::new(vertex.position, next.position, vertex.bulge);
                        bounds.include_bounds(&segment.bounds());
                    }
                }
            }
            Entity::Text(text) => {
                for corner in text.extents() {
                    bounds.include_point(corner);
                }
            }
        }
        if bounds.is_empty() {
            None
        } else {
            Some(bounds)
        }
    }

    /// 返回同一几何放到另一个图层上的副本。
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        let layer = layer.into();
        match &mut self {
            Entity::Line(line) => line.layer = layer,
            Entity::Circle(circle) => circle.layer = layer,
            Entity::Arc(arc) => arc.layer = layer,
            Entity::Polyline(polyline) => polyline.layer = layer,
            Entity::Text(text) => text.layer = layer,
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
    pub layer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
    pub layer: String,
}

/// 圆弧实体，角度以弧度形式储存，遵循数学正方向（逆时针）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub layer: String,
}

impl Arc {
    /// 逆时针扫掠角，范围 `(0, 2π]`；起止角重合视为整圆。
    pub fn sweep(&self) -> f64 {
        let (start, end) = canonical_interval(self.start_angle, self.end_angle);
        end - start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub vertices: Vec<PolylineVertex>,
    pub is_closed: bool,
    pub layer: String,
}

/// 多段线顶点。`bulge` 描述从本顶点到下一顶点的圆弧段，
/// 取值为圆心角四分之一的正切，正值为逆时针，零为直线段。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolylineVertex {
    pub position: Point2,
    pub bulge: f64,
}

impl PolylineVertex {
    #[inline]
    pub fn new(position: Point2) -> Self {
        Self {
            position,
            bulge: 0.0,
        }
    }

    #[inline]
    pub fn with_bulge(position: Point2, bulge: f64) -> Self {
        Self { position, bulge }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub insert: Point2,
    pub content: String,
    pub height: f64,
    pub rotation: f64,
    #[serde(default = "Text::default_width_factor")]
    pub width_factor: f64,
    pub layer: String,
}

impl Text {
    fn default_width_factor() -> f64 {
        1.0
    }

    /// 估算文字外框的四个角点：每个字符按 `height × width_factor` 的方格计。
    pub fn extents(&self) -> [Point2; 4] {
        let chars = self.content.chars().count().max(1) as f64;
        let width = chars * self.height.abs() * self.width_factor.abs();
        let height = self.height.abs();
        let u = Vector2::new(self.rotation.cos(), self.rotation.sin());
        let v = u.perp();
        let origin = self.insert;
        [
            origin,
            origin.translate(u.scale(width)),
            origin.translate(u.scale(width)).translate(v.scale(height)),
            origin.translate(v.scale(height)),
        ]
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity with id {0} not found")]
    EntityNotFound(u64),
    #[error("entity with id {0} is not a curve")]
    NotACurve(u64),
    #[error("entity id {0} appears more than once")]
    DuplicateEntity(u64),
}

/// 宿主图形数据库的接缝。引擎只通过该接口读写实体，
/// 写操作应包裹在 [`Mutation`] 中。
pub trait EntityStore {
    fn entity(&self, id: EntityId) -> Option<&Entity>;

    /// 当前全部实体 ID，按创建顺序。
    fn entity_ids(&self) -> Vec<EntityId>;

    fn tag(&self, id: EntityId) -> Option<EntityTag>;

    fn append_entity(&mut self, entity: Entity) -> EntityId;

    fn erase_entity(&mut self, id: EntityId) -> Result<Entity, StoreError>;

    /// 原位替换几何，ID 不变，返回旧实体。
    fn replace_entity(&mut self, id: EntityId, entity: Entity) -> Result<Entity, StoreError>;

    /// 以原 ID 恢复一个已删除的实体，仅供撤销使用。
    fn restore_entity(&mut self, id: EntityId, entity: Entity);

    /// 设置或清除标记，返回旧标记。
    fn set_tag(
        &mut self,
        id: EntityId,
        tag: Option<EntityTag>,
    ) -> Result<Option<EntityTag>, StoreError>;

    fn curve(&self, id: EntityId) -> Option<Curve> {
        self.entity(id).and_then(Curve::from_entity)
    }
}

/// 实体按 ID 升序保存，查找依赖该顺序。
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDocument")]
pub struct Document {
    layers: HashMap<String, Layer>,
    entities: Vec<(EntityId, Entity)>,
    next_entity_id: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<u64, EntityTag>,
}

/// 反序列化的中间形态，经 [`Document::try_from`] 校验后才成为文档。
#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    layers: HashMap<String, Layer>,
    entities: Vec<(EntityId, Entity)>,
    #[serde(default)]
    next_entity_id: u64,
    #[serde(default)]
    tags: BTreeMap<u64, EntityTag>,
}

impl TryFrom<RawDocument> for Document {
    type Error = StoreError;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let RawDocument {
            layers,
            mut entities,
            next_entity_id,
            tags,
        } = raw;
        entities.sort_by_key(|(id, _)| *id);
        if let Some(pair) = entities.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(StoreError::DuplicateEntity(pair[0].0.get()));
        }
        let next_entity_id = entities
            .last()
            .map_or(next_entity_id, |(id, _)| next_entity_id.max(id.get() + 1));

        let mut doc = Self {
            layers,
            entities,
            next_entity_id,
            tags: BTreeMap::new(),
        };
        doc.ensure_layer("0");
        let layer_names: Vec<String> = doc
            .entities
            .iter()
            .map(|(_, entity)| entity.layer_name().to_string())
            .collect();
        for name in layer_names {
            doc.ensure_layer(name);
        }
        // 指向不存在实体的标记直接丢弃。
        doc.tags = tags
            .into_iter()
            .filter(|(id, _)| doc.position(EntityId(*id)).is_some())
            .collect();
        Ok(doc)
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self::default();
        doc.ensure_layer("0");
        doc
    }

    pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
        let key = name.as_ref();
        self.layers
            .entry(key.to_string())
            .or_insert_with(|| Layer::new(key));
    }

    pub fn add_line(&mut self, start: Point2, end: Point2, layer: impl Into<String>) -> EntityId {
        let layer = layer.into();
        self.push(Entity::Line(Line { start, end, layer }))
    }

    pub fn add_circle(
        &mut self,
        center: Point2,
        radius: f64,
        layer: impl Into<String>,
    ) -> EntityId {
        let layer = layer.into();
        self.push(Entity::Circle(Circle {
            center,
            radius,
            layer,
        }))
    }

    pub fn add_arc(
        &mut self,
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        layer: impl Into<String>,
    ) -> EntityId {
        let layer = layer.into();
        self.push(Entity::Arc(Arc {
            center,
            radius,
            start_angle,
            end_angle,
            layer,
        }))
    }

    pub fn add_polyline<I>(&mut self, vertices: I, is_closed: bool, layer: impl Into<String>) -> EntityId
    where
        I: IntoIterator<Item = Point2>,
    {
        let collected = vertices
            .into_iter()
            .map(PolylineVertex::new)
            .collect::<Vec<_>>();
        self.add_polyline_with_vertices(collected, is_closed, layer)
    }

    pub fn add_polyline_with_vertices<I>(
        &mut self,
        vertices: I,
        is_closed: bool,
        layer: impl Into<String>,
    ) -> EntityId
    where
        I: IntoIterator<Item = PolylineVertex>,
    {
        let layer = layer.into();
        let vertices: Vec<PolylineVertex> = vertices.into_iter().collect();
        self.push(Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer,
        }))
    }

    pub fn add_text(
        &mut self,
        insert: Point2,
        content: impl Into<String>,
        height: f64,
        rotation: f64,
        layer: impl Into<String>,
    ) -> EntityId {
        let layer = layer.into();
        self.push(Entity::Text(Text {
            insert,
            content: content.into(),
            height,
            rotation,
            width_factor: 1.0,
            layer,
        }))
    }

    #[inline]
    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        self.push(entity)
    }

    #[inline]
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    #[inline]
    pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
        self.entities.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn entity_bounds(&self, id: EntityId) -> Option<Bounds2D> {
        self.entity(id).and_then(Entity::bounds)
    }

    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        let mut has = false;
        for (_, entity) in &self.entities {
            if let Some(entity_bounds) = entity.bounds() {
                bounds.include_bounds(&entity_bounds);
                has = true;
            }
        }
        if has { Some(bounds) } else { None }
    }

    pub fn tag_entity(&mut self, id: EntityId, tag: EntityTag) -> Result<(), StoreError> {
        self.set_tag(id, Some(tag)).map(|_| ())
    }

    fn push(&mut self, entity: Entity) -> EntityId {
        self.ensure_layer(entity.layer_name());
        let id = self.next_id();
        self.entities.push((id, entity));
        id
    }

    fn position(&self, id: EntityId) -> Option<usize> {
        self.entities
            .binary_search_by_key(&id, |(entity_id, _)| *entity_id)
            .ok()
    }

    #[inline]
    fn next_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        EntityId(id)
    }
}

impl EntityStore for Document {
    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.position(id).map(|index| &self.entities[index].1)
    }

    fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|(id, _)| *id).collect()
    }

    fn tag(&self, id: EntityId) -> Option<EntityTag> {
        self.tags.get(&id.get()).copied()
    }

    fn append_entity(&mut self, entity: Entity) -> EntityId {
        self.push(entity)
    }

    fn erase_entity(&mut self, id: EntityId) -> Result<Entity, StoreError> {
        let index = self
            .position(id)
            .ok_or(StoreError::EntityNotFound(id.get()))?;
        self.tags.remove(&id.get());
        Ok(self.entities.remove(index).1)
    }

    fn replace_entity(&mut self, id: EntityId, entity: Entity) -> Result<Entity, StoreError> {
        let index = self
            .position(id)
            .ok_or(StoreError::EntityNotFound(id.get()))?;
        self.ensure_layer(entity.layer_name());
        Ok(std::mem::replace(&mut self.entities[index].1, entity))
    }

    fn restore_entity(&mut self, id: EntityId, entity: Entity) {
        self.ensure_layer(entity.layer_name());
        match self
            .entities
            .binary_search_by_key(&id, |(entity_id, _)| *entity_id)
        {
            Ok(index) => self.entities[index].1 = entity,
            Err(index) => self.entities.insert(index, (id, entity)),
        }
        self.next_entity_id = self.next_entity_id.max(id.get() + 1);
    }

    fn set_tag(
        &mut self,
        id: EntityId,
        tag: Option<EntityTag>,
    ) -> Result<Option<EntityTag>, StoreError> {
        if self.position(id).is_none() {
            return Err(StoreError::EntityNotFound(id.get()));
        }
        Ok(match tag {
            Some(tag) => self.tags.insert(id.get(), tag),
            None => self.tags.remove(&id.get()),
        })
    }
}

#[derive(Debug)]
enum JournalEntry {
    Appended(EntityId),
    Erased {
        id: EntityId,
        entity: Entity,
        tag: Option<EntityTag>,
    },
    Replaced {
        id: EntityId,
        previous: Entity,
    },
    Tagged {
        id: EntityId,
        previous: Option<EntityTag>,
    },
}

/// 提交后的写操作概要。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationLog {
    pub appended: Vec<EntityId>,
    pub erased: Vec<EntityId>,
    pub modified: Vec<EntityId>,
}

impl MutationLog {
    /// 本次写入涉及的全部既有实体（删除或修改）。
    pub fn touched(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.erased.iter().chain(self.modified.iter()).copied()
    }
}

/// 写作用域守卫：所有写入都会记入日志，`commit` 后生效；
/// 未提交即被丢弃时按逆序撤销全部写入。
pub struct Mutation<'a> {
    store: &'a mut dyn EntityStore,
    journal: Vec<JournalEntry>,
    committed: bool,
}

impl<'a> Mutation<'a> {
    pub fn begin(store: &'a mut dyn EntityStore) -> Self {
        Self {
            store,
            journal: Vec::new(),
            committed: false,
        }
    }

    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.store.entity(id)
    }

    #[inline]
    pub fn curve(&self, id: EntityId) -> Option<Curve> {
        self.store.curve(id)
    }

    #[inline]
    pub fn tag(&self, id: EntityId) -> Option<EntityTag> {
        self.store.tag(id)
    }

    pub fn append_entity(&mut self, entity: Entity) -> EntityId {
        let id = self.store.append_entity(entity);
        self.journal.push(JournalEntry::Appended(id));
        id
    }

    pub fn erase_entity(&mut self, id: EntityId) -> Result<(), StoreError> {
        let tag = self.store.tag(id);
        let entity = self.store.erase_entity(id)?;
        self.journal.push(JournalEntry::Erased { id, entity, tag });
        Ok(())
    }

    pub fn replace_entity(&mut self, id: EntityId, entity: Entity) -> Result<(), StoreError> {
        let previous = self.store.replace_entity(id, entity)?;
        self.journal.push(JournalEntry::Replaced { id, previous });
        Ok(())
    }

    pub fn set_tag(&mut self, id: EntityId, tag: Option<EntityTag>) -> Result<(), StoreError> {
        let previous = self.store.set_tag(id, tag)?;
        self.journal.push(JournalEntry::Tagged { id, previous });
        Ok(())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    /// 提交写入并返回概要。
    pub fn commit(mut self) -> MutationLog {
        self.committed = true;
        let mut log = MutationLog::default();
        for entry in std::mem::take(&mut self.journal) {
            match entry {
                JournalEntry::Appended(id) => log.appended.push(id),
                JournalEntry::Erased { id, .. } => {
                    // 同一作用域内新建又删除的实体不对外暴露。
                    if let Some(pos) = log.appended.iter().position(|a| *a == id) {
                        log.appended.remove(pos);
                    } else {
                        log.modified.retain(|m| *m != id);
                        log.erased.push(id);
                    }
                }
                JournalEntry::Replaced { id, .. } | JournalEntry::Tagged { id, .. } => {
                    if !log.appended.contains(&id) && !log.modified.contains(&id) {
                        log.modified.push(id);
                    }
                }
            }
        }
        log
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                JournalEntry::Appended(id) => {
                    let _ = self.store.erase_entity(id);
                }
                JournalEntry::Erased { id, entity, tag } => {
                    self.store.restore_entity(id, entity);
                    if tag.is_some() {
                        let _ = self.store.set_tag(id, tag);
                    }
                }
                JournalEntry::Replaced { id, previous } => {
                    let _ = self.store.replace_entity(id, previous);
                }
                JournalEntry::Tagged { id, previous } => {
                    let _ = self.store.set_tag(id, previous);
                }
            }
        }
    }
}

impl Drop for Mutation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

pub(crate) fn normalize_angle(angle: f64) -> f64 {
    let mut result = angle % TAU;
    if result < 0.0 {
        result += TAU;
    }
    result
}

fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
    let start = normalize_angle(start);
    let mut end = normalize_angle(end);
    if (end - start).abs() < 1e-9 {
        end = start + TAU;
    } else if end < start {
        end += TAU;
    }
    (start, end)
}

pub(crate) fn arc_point(center: Point2, radius: f64, angle: f64) -> Point2 {
    let offset = Vector2::new(radius * angle.cos(), radius * angle.sin());
    center.translate(offset)
}

fn arc_bounds(arc: &Arc, bounds: &mut Bounds2D) {
    let radius = arc.radius.abs();
    if radius <= f64::EPSILON {
        bounds.include_point(arc.center);
        return;
    }

    let (start, end) = canonical_interval(arc.start_angle, arc.end_angle);
    include_arc_bounds(arc.center, radius, start, end, bounds);
}

/// 将逆时针角区间 `[start, end]` 上的圆弧并入范围，含象限极值点。
pub(crate) fn include_arc_bounds(
    center: Point2,
    radius: f64,
    start: f64,
    end: f64,
    bounds: &mut Bounds2D,
) {
    bounds.include_point(arc_point(center, radius, start));
    bounds.include_point(arc_point(center, radius, end));

    const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
    for base in QUADRANTS {
        let candidate = start + normalize_angle(base - start);
        if candidate <= end {
            bounds.include_point(arc_point(center, radius, candidate));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(doc: &mut Document) -> EntityId {
        doc.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 10.0),
                Point2::new(0.0, 10.0),
            ],
            true,
            "PARCEL",
        )
    }

    #[test]
    fn document_stores_entities() {
        let mut doc = Document::new();
        let line = doc.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "0");
        let circle = doc.add_circle(Point2::new(5.0, 5.0), 2.0, "ANNOT");
        let arc = doc.add_arc(Point2::new(5.0, 0.0), 3.5, 0.0, FRAC_PI_2, "GEOM");
        let poly = square(&mut doc);
        let text = doc.add_text(Point2::new(1.0, 1.0), "P-01", 2.5, 0.0, "ANNOT");

        assert_eq!(line.get(), 0);
        assert_eq!(circle.get(), 1);
        assert_eq!(arc.get(), 2);
        assert_eq!(poly.get(), 3);
        assert_eq!(text.get(), 4);
        let layers: Vec<_> = doc.layers().map(|l| l.name.clone()).collect();
        assert!(layers.contains(&"PARCEL".to_string()));
        assert_eq!(doc.len(), 5);

        match doc.entity(arc) {
            Some(Entity::Arc(arc)) => {
                assert!((arc.radius - 3.5).abs() < f64::EPSILON);
                assert!((arc.sweep() - FRAC_PI_2).abs() < 1e-12);
            }
            other => panic!("unexpected entity lookup result: {other:?}"),
        }
        assert!(!doc.entity(text).expect("text").is_curve());

        let bounds = doc.bounds().expect("document bounds should exist");
        assert!((bounds.min().x() - 0.0).abs() < 1e-9);
        assert!((bounds.max().x() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn bulged_polyline_bounds_include_arc_apex() {
        let mut doc = Document::new();
        // 下凸半圆：从 (0,0) 逆时针到 (2,0)，顶点在 (1,-1)。
        let id = doc.add_polyline_with_vertices(
            [
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(2.0, 0.0)),
            ],
            false,
            "0",
        );
        let bounds = doc.entity_bounds(id).expect("bounds");
        assert!((bounds.min().y() + 1.0).abs() < 1e-9);
        assert!(bounds.max().y().abs() < 1e-9);
    }

    #[test]
    fn uncommitted_mutation_rolls_back() {
        let mut doc = Document::new();
        let a = square(&mut doc);
        let b = doc.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), "0");
        doc.tag_entity(a, EntityTag::Parcel).unwrap();

        {
            let mut tx = Mutation::begin(&mut doc);
            tx.erase_entity(a).unwrap();
            tx.replace_entity(
                b,
                Entity::Line(Line {
                    start: Point2::new(5.0, 5.0),
                    end: Point2::new(6.0, 6.0),
                    layer: "0".into(),
                }),
            )
            .unwrap();
            let added = tx.append_entity(Entity::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(0.0, 1.0),
                layer: "0".into(),
            }));
            assert!(tx.entity(added).is_some());
            assert!(tx.entity(a).is_none());
        }

        assert_eq!(doc.len(), 2);
        assert!(doc.entity(a).is_some());
        assert_eq!(doc.tag(a), Some(EntityTag::Parcel));
        match doc.entity(b) {
            Some(Entity::Line(line)) => assert!(line.start.approx_eq(Point2::new(0.0, 0.0), 1e-12)),
            other => panic!("unexpected entity: {other:?}"),
        }
        assert_eq!(doc.entity_ids(), vec![a, b]);
    }

    #[test]
    fn committed_mutation_reports_log() {
        let mut doc = Document::new();
        let a = square(&mut doc);
        let b = doc.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), "0");

        let mut tx = Mutation::begin(&mut doc);
        tx.erase_entity(b).unwrap();
        tx.set_tag(a, Some(EntityTag::Hole)).unwrap();
        let added = tx.append_entity(Entity::Line(Line {
            start: Point2::new(0.0, 0.0),
            end: Point2::new(0.0, 1.0),
            layer: "0".into(),
        }));
        let log = tx.commit();

        assert_eq!(log.appended, vec![added]);
        assert_eq!(log.erased, vec![b]);
        assert_eq!(log.modified, vec![a]);
        assert_eq!(doc.tag(a), Some(EntityTag::Hole));
        assert!(doc.entity(b).is_none());
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = Document::new();
        let a = square(&mut doc);
        doc.tag_entity(a, EntityTag::Parcel).unwrap();
        let json = serde_json::to_string(&doc).expect("serialize");
        let back: Document = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.len(), 1);
        assert_eq!(back.tag(a), Some(EntityTag::Parcel));
    }

    #[test]
    fn loading_reorders_entities_and_advances_next_id() {
        let mut doc = Document::new();
        let ids: Vec<EntityId> = (0..3)
            .map(|i| {
                let x = f64::from(i);
                doc.add_line(Point2::new(x, 0.0), Point2::new(x, 5.0), "0")
            })
            .collect();
        doc.tag_entity(ids[1], EntityTag::Parcel).unwrap();

        let mut value = serde_json::to_value(&doc).expect("serialize");
        value["entities"]
            .as_array_mut()
            .expect("entity list")
            .reverse();
        value["next_entity_id"] = serde_json::json!(0);
        value["tags"]["99"] = serde_json::json!("hole");

        let mut back: Document = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.entity_ids(), ids);
        for id in &ids {
            assert!(back.entity(*id).is_some());
        }
        assert_eq!(back.tag(ids[1]), Some(EntityTag::Parcel));
        assert_eq!(back.tag(EntityId::new(99)), None);

        let added = back.add_line(Point2::new(9.0, 0.0), Point2::new(9.0, 5.0), "0");
        assert_eq!(added, EntityId::new(3));
        assert!(back.erase_entity(ids[0]).is_ok());
        assert_eq!(back.len(), 3);
    }

    #[test]
    fn duplicate_entity_ids_are_rejected_on_load() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), "0");
        let mut value = serde_json::to_value(&doc).expect("serialize");
        let entities = value["entities"].as_array_mut().expect("entity list");
        let copy = entities[0].clone();
        entities.push(copy);

        let err = serde_json::from_value::<Document>(value).unwrap_err();
        assert!(err.to_string().contains("appears more than once"));
    }
}
