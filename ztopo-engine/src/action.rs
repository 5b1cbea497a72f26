use std::collections::BTreeMap;

use ztopo_core::algorithms::area::Winding;
use ztopo_core::curve::Curve;
use ztopo_core::document::{Entity, EntityId, EntityStore, Mutation, Text};
use ztopo_core::tolerance::Tolerances;

use crate::errors::FixError;
use crate::result::{DefectClass, DefectResult};
use crate::{checks, fixes};

/// 检查所需的只读上下文。
pub struct CheckContext<'a> {
    pub store: &'a dyn EntityStore,
    pub ids: &'a [EntityId],
    pub tolerances: &'a Tolerances,
    pub expected_winding: Winding,
}

impl<'a> CheckContext<'a> {
    pub fn new(store: &'a dyn EntityStore, ids: &'a [EntityId], tolerances: &'a Tolerances) -> Self {
        Self {
            store,
            ids,
            tolerances,
            expected_winding: Winding::Clockwise,
        }
    }

    pub fn with_expected_winding(mut self, winding: Winding) -> Self {
        self.expected_winding = winding;
        self
    }

    /// 候选集中的有效曲线，按 ID 升序；文字、缺失实体与非有限坐标被跳过。
    pub fn curves(&self) -> Vec<(EntityId, Curve)> {
        let mut ids = self.ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| {
                let curve = self.store.curve(id)?;
                (curve.vertex_count() > 0 && curve.is_finite()).then_some((id, curve))
            })
            .collect()
    }

    pub fn closed_curves(&self) -> Vec<(EntityId, Curve)> {
        self.curves()
            .into_iter()
            .filter(|(_, curve)| curve.is_closed)
            .collect()
    }

    pub fn texts(&self) -> Vec<(EntityId, &'a Text)> {
        let store = self.store;
        let mut ids = self.ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| match store.entity(id) {
                Some(Entity::Text(text)) => Some((id, text)),
                _ => None,
            })
            .collect()
    }
}

/// 一次成功修复产生的实体。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixOutcome {
    pub targets: Vec<EntityId>,
}

impl FixOutcome {
    pub fn new(targets: Vec<EntityId>) -> Self {
        Self { targets }
    }
}

/// 一类缺陷的检查与修复实现。
pub trait TopologyAction: Send + Sync {
    fn class(&self) -> DefectClass;

    /// 纯函数：不得修改实体，输出顺序确定。
    fn check(&self, context: &CheckContext<'_>) -> Vec<DefectResult>;

    fn fix(
        &self,
        _result: &DefectResult,
        _mutation: &mut Mutation<'_>,
        _tolerances: &Tolerances,
    ) -> Result<FixOutcome, FixError> {
        Err(FixError::NoFixMethod)
    }

    fn can_fix(&self) -> bool {
        true
    }
}

pub type DetectFn = fn(&CheckContext<'_>) -> Vec<DefectResult>;
pub type RepairFn = fn(&DefectResult, &mut Mutation<'_>, &Tolerances) -> Result<FixOutcome, FixError>;

/// 由一个检查函数与可选修复函数组成的内置动作。
pub struct ClassAction {
    class: DefectClass,
    detect: DetectFn,
    repair: Option<RepairFn>,
}

impl ClassAction {
    pub fn new(class: DefectClass, detect: DetectFn, repair: Option<RepairFn>) -> Self {
        Self {
            class,
            detect,
            repair,
        }
    }
}

impl TopologyAction for ClassAction {
    fn class(&self) -> DefectClass {
        self.class
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<DefectResult> {
        (self.detect)(context)
    }

    fn fix(
        &self,
        result: &DefectResult,
        mutation: &mut Mutation<'_>,
        tolerances: &Tolerances,
    ) -> Result<FixOutcome, FixError> {
        match self.repair {
            Some(repair) => repair(result, mutation, tolerances),
            None => Err(FixError::NoFixMethod),
        }
    }

    fn can_fix(&self) -> bool {
        self.repair.is_some()
    }
}

/// 缺陷类别到动作的注册表。
pub struct ActionRegistry {
    actions: BTreeMap<DefectClass, Box<dyn TopologyAction>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// 注册全部内置检查项。
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(ClassAction::new(
            DefectClass::ZeroLength,
            checks::lines::zero_length,
            Some(fixes::erase_sources),
        ));
        registry.register(ClassAction::new(
            DefectClass::Duplicate,
            checks::lines::duplicates,
            Some(fixes::lines::erase_duplicate),
        ));
        registry.register(ClassAction::new(
            DefectClass::Clustered,
            checks::lines::clustered_nodes,
            Some(fixes::lines::snap_cluster),
        ));
        registry.register(ClassAction::new(
            DefectClass::Crossing,
            checks::lines::crossings,
            Some(fixes::lines::split_crossing),
        ));
        registry.register(ClassAction::new(
            DefectClass::SelfIntersect,
            checks::lines::self_intersections,
            Some(fixes::lines::split_self_intersection),
        ));
        registry.register(ClassAction::new(
            DefectClass::Dangling,
            checks::lines::dangling,
            Some(fixes::lines::trim_dangling),
        ));
        registry.register(ClassAction::new(
            DefectClass::UnclosedPolygon,
            checks::polygons::unclosed,
            Some(fixes::polygons::close_polygon),
        ));
        registry.register(ClassAction::new(
            DefectClass::ZeroAreaLoop,
            checks::polygons::zero_area_loops,
            Some(fixes::erase_sources),
        ));
        registry.register(ClassAction::new(
            DefectClass::SmallPolygon,
            checks::polygons::small_polygons,
            Some(fixes::erase_sources),
        ));
        registry.register(ClassAction::new(
            DefectClass::AntiClockwisePolygon,
            checks::polygons::wrong_winding,
            Some(fixes::polygons::reverse_polygon),
        ));
        registry.register(ClassAction::new(
            DefectClass::IntersectPolygon,
            checks::polygons::overlaps,
            None,
        ));
        registry.register(ClassAction::new(
            DefectClass::PolygonGap,
            checks::polygons::gaps,
            Some(fixes::polygons::snap_gap),
        ));
        registry.register(ClassAction::new(
            DefectClass::PolygonHole,
            checks::polygons::holes,
            Some(fixes::polygons::register_hole),
        ));
        registry.register(ClassAction::new(
            DefectClass::AnnotationOverlap,
            checks::annotation::overlapping_texts,
            None,
        ));
        registry
    }

    /// 同一类别重复注册时替换旧实现。
    pub fn register<A: TopologyAction + 'static>(&mut self, action: A) {
        self.actions.insert(action.class(), Box::new(action));
    }

    pub fn get(&self, class: DefectClass) -> Option<&dyn TopologyAction> {
        self.actions.get(&class).map(|action| action.as_ref())
    }

    pub fn contains(&self, class: DefectClass) -> bool {
        self.actions.contains_key(&class)
    }

    pub fn classes(&self) -> impl Iterator<Item = DefectClass> + '_ {
        self.actions.keys().copied()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
