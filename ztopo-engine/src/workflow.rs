use serde::{Deserialize, Serialize};

use crate::agent::AgentTable;
use crate::errors::EngineError;
use crate::result::DefectClass;

/// 预置工作流的种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    LineCleanup,
    PolygonTopology,
    AnnotationCheck,
    Custom,
}

/// 一组代理及其依赖声明。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub kind: WorkflowKind,
    pub agents: Vec<(DefectClass, Vec<DefectClass>)>,
}

impl Workflow {
    /// 线清理：零长度 → 重复 → 聚簇 → 交叉 → 悬挂。
    pub fn line_cleanup() -> Self {
        use DefectClass::*;
        Self {
            name: "line_cleanup".to_string(),
            kind: WorkflowKind::LineCleanup,
            agents: vec![
                (ZeroLength, vec![]),
                (Duplicate, vec![ZeroLength]),
                (Clustered, vec![Duplicate]),
                (Crossing, vec![Clustered]),
                (SelfIntersect, vec![ZeroLength]),
                (Dangling, vec![Crossing, SelfIntersect]),
            ],
        }
    }

    pub fn polygon_topology() -> Self {
        use DefectClass::*;
        Self {
            name: "polygon_topology".to_string(),
            kind: WorkflowKind::PolygonTopology,
            agents: vec![
                (UnclosedPolygon, vec![]),
                (ZeroAreaLoop, vec![UnclosedPolygon]),
                (SelfIntersect, vec![UnclosedPolygon]),
                (SmallPolygon, vec![ZeroAreaLoop]),
                (AntiClockwisePolygon, vec![SelfIntersect, ZeroAreaLoop]),
                (IntersectPolygon, vec![SelfIntersect, SmallPolygon]),
                (PolygonGap, vec![IntersectPolygon]),
                (PolygonHole, vec![IntersectPolygon, PolygonGap]),
            ],
        }
    }

    pub fn annotation_check() -> Self {
        Self {
            name: "annotation_check".to_string(),
            kind: WorkflowKind::AnnotationCheck,
            agents: vec![(DefectClass::AnnotationOverlap, vec![])],
        }
    }

    pub fn custom(
        name: impl Into<String>,
        agents: Vec<(DefectClass, Vec<DefectClass>)>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: WorkflowKind::Custom,
            agents,
        }
    }

    pub fn classes(&self) -> Vec<DefectClass> {
        self.agents.iter().map(|(class, _)| *class).collect()
    }

    pub fn build_table(&self) -> Result<AgentTable, EngineError> {
        AgentTable::new(&self.agents)
    }
}
