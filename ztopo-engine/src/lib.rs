pub mod action;
pub mod agent;
pub mod checks;
pub mod fixes;
pub mod graph;
pub mod result;
pub mod session;
pub mod workflow;

pub mod errors {
    use thiserror::Error;
    use ztopo_core::document::StoreError;

    use crate::result::DefectClass;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("result with id {0} not found")]
        ResultNotFound(u64),
        #[error("no agent registered for {0:?}")]
        AgentNotRegistered(DefectClass),
        #[error("dependency cycle through {0:?}")]
        DependencyCycle(DefectClass),
        #[error("result {0} is not pending")]
        ResultNotPending(u64),
        #[error("invariant violated: {0}")]
        InvariantViolation(String),
    }

    /// 单个修复的可恢复错误，会被会话转换为结果状态，不会中断批处理。
    #[derive(Debug, Error)]
    pub enum FixError {
        #[error("entity with id {0} no longer exists")]
        EntityMissing(u64),
        #[error("unsupported geometry: {0}")]
        UnsupportedGeometry(String),
        #[error(transparent)]
        Store(#[from] StoreError),
        #[error("no fix method for this defect")]
        NoFixMethod,
    }
}
