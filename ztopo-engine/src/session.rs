use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ztopo_core::algorithms::area::Winding;
use ztopo_core::document::{EntityId, EntityStore, Mutation};
use ztopo_core::tolerance::Tolerances;

use crate::action::{ActionRegistry, CheckContext};
use crate::agent::{AgentStatus, AgentTable};
use crate::errors::{EngineError, FixError};
use crate::result::{DefectClass, DefectResult, ResultId, ResultSet, ResultStatus, StatusCounts};
use crate::workflow::Workflow;

/// 会话参数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub tolerances: Tolerances,
    pub expected_winding: Winding,
    pub max_fix_iterations: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            expected_winding: Winding::Clockwise,
            max_fix_iterations: 8,
        }
    }
}

/// 会话向外通知的变化，由调用方通过 [`TopologySession::drain_events`] 取走。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ResultGroupAdded { class: DefectClass, count: usize },
    ResultGroupRemoved { class: DefectClass },
    StatusChanged { class: DefectClass, status: AgentStatus },
}

/// 批量修复时每处理一条结果回调一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixProgress {
    pub iteration: usize,
    pub class: DefectClass,
    pub result: ResultId,
    pub status: ResultStatus,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Cancel,
}

/// 单条修复的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReport {
    pub result: ResultId,
    pub class: DefectClass,
    pub status: ResultStatus,
    pub targets: Vec<EntityId>,
    pub invalidated: Vec<ResultId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub fixed: usize,
    pub failed: usize,
    pub no_fix_method: usize,
    pub invalidated: usize,
    pub rejected: usize,
    pub remaining_pending: usize,
    pub iterations: usize,
    pub cancelled: bool,
}

/// 一份文档上的拓扑检查与修复会话。
///
/// 会话持有动作注册表、代理表和当前结果集；文档本身由调用方持有，
/// 每次调用时以 `&dyn EntityStore` 或 `&mut dyn EntityStore` 传入。
pub struct TopologySession {
    workflow: String,
    registry: ActionRegistry,
    agents: AgentTable,
    selected: BTreeSet<DefectClass>,
    checked: BTreeSet<DefectClass>,
    options: SessionOptions,
    results: ResultSet,
    scope: BTreeSet<EntityId>,
    rejected_sources: BTreeSet<EntityId>,
    events: Vec<SessionEvent>,
}

impl TopologySession {
    pub fn new(
        workflow: &Workflow,
        registry: ActionRegistry,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        if let Some(missing) = workflow
            .classes()
            .into_iter()
            .find(|class| !registry.contains(*class))
        {
            return Err(EngineError::AgentNotRegistered(missing));
        }
        let agents = workflow.build_table()?;
        let selected = agents.order().into_iter().collect();
        debug!(workflow = %workflow.name, agents = workflow.agents.len(), "创建拓扑会话");
        Ok(Self {
            workflow: workflow.name.clone(),
            registry,
            agents,
            selected,
            checked: BTreeSet::new(),
            options,
            results: ResultSet::new(),
            scope: BTreeSet::new(),
            rejected_sources: BTreeSet::new(),
            events: Vec::new(),
        })
    }

    /// 只运行给定的检查项；未选中的代理在检查时直接视为已执行。
    pub fn select(&mut self, classes: &[DefectClass]) -> Result<(), EngineError> {
        if let Some(missing) = classes.iter().find(|class| !self.agents.contains(**class)) {
            return Err(EngineError::AgentNotRegistered(*missing));
        }
        self.selected = classes.iter().copied().collect();
        Ok(())
    }

    /// 以 `ids` 为范围重新检查。
    pub fn check(
        &mut self,
        store: &dyn EntityStore,
        ids: &[EntityId],
    ) -> Result<StatusCounts, EngineError> {
        self.scope = ids.iter().copied().collect();
        self.recheck(store)
    }

    /// 丢弃全部结果，按拓扑序运行已启用的代理。
    pub fn recheck(&mut self, store: &dyn EntityStore) -> Result<StatusCounts, EngineError> {
        let removed: Vec<DefectClass> = self.results.classes().collect();
        self.results.clear();
        self.checked.clear();
        for class in removed {
            self.events.push(SessionEvent::ResultGroupRemoved { class });
        }

        let ids: Vec<EntityId> = self.scope.iter().copied().collect();
        let tolerances = self.options.tolerances;
        let context = CheckContext::new(store, &ids, &tolerances)
            .with_expected_winding(self.options.expected_winding);

        for class in self.agents.order() {
            if !self.agents.is_enabled(class) {
                continue;
            }
            if !self.selected.contains(&class) {
                self.checked.insert(class);
                self.settle(class)?;
                continue;
            }
            if self.agents.status(class).is_some_and(|s| s.contains(AgentStatus::FAILED)) {
                let changes = self.agents.update(class, AgentStatus::FAILED, false)?;
                self.push_status_changes(changes);
            }
            let action = self
                .registry
                .get(class)
                .ok_or(EngineError::AgentNotRegistered(class))?;
            let found = action.check(&context);
            let count = found.len();
            let mut rejected = 0;
            for result in found {
                let carried = result
                    .source_ids
                    .iter()
                    .any(|id| self.rejected_sources.contains(id));
                let id = self.results.insert(result);
                if carried {
                    if let Some(result) = self.results.get_mut(id) {
                        result.set_status(ResultStatus::Rejected);
                        rejected += 1;
                    }
                }
            }
            debug!(class = %class, count, rejected, "检查项完成");
            if count > 0 {
                self.events
                    .push(SessionEvent::ResultGroupAdded { class, count });
            }
            self.checked.insert(class);
            self.settle(class)?;
        }

        let counts = self.results.counts();
        info!(
            workflow = %self.workflow,
            entities = ids.len(),
            results = counts.total(),
            pending = counts.pending,
            "拓扑检查完成"
        );
        Ok(counts)
    }

    /// 修复一条待处理结果。修复失败不会返回 `Err`，而是体现在报告的状态中。
    pub fn fix_one(
        &mut self,
        store: &mut dyn EntityStore,
        id: ResultId,
    ) -> Result<FixReport, EngineError> {
        let result = self
            .results
            .get(id)
            .ok_or(EngineError::ResultNotFound(id.get()))?;
        if result.status() != ResultStatus::Pending {
            return Err(EngineError::ResultNotPending(id.get()));
        }
        let report = self.apply_fix(store, id)?;
        self.settle(report.class)?;
        Ok(report)
    }

    /// 按代理顺序修复全部待处理结果；`recursive` 时修复后重新检查并继续，
    /// 直到没有进展或达到迭代上限。
    pub fn fix_all(
        &mut self,
        store: &mut dyn EntityStore,
        recursive: bool,
        tick: &mut dyn FnMut(&FixProgress) -> TickControl,
    ) -> Result<BatchSummary, EngineError> {
        let mut summary = BatchSummary::default();
        loop {
            summary.iterations += 1;
            let order = self.agents.order();
            let queue: Vec<ResultId> = order
                .iter()
                .flat_map(|class| self.results.pending_ids(*class))
                .collect();
            let total = queue.len();
            let mut progressed = false;

            for (done, id) in queue.into_iter().enumerate() {
                let pending = self
                    .results
                    .get(id)
                    .is_some_and(|result| result.status() == ResultStatus::Pending);
                if !pending {
                    continue;
                }
                let report = self.apply_fix(store, id)?;
                match report.status {
                    ResultStatus::Fixed => {
                        summary.fixed += 1;
                        progressed = true;
                    }
                    ResultStatus::Failed => summary.failed += 1,
                    ResultStatus::NoFixMethod => summary.no_fix_method += 1,
                    _ => {}
                }
                summary.invalidated += report.invalidated.len();
                let progress = FixProgress {
                    iteration: summary.iterations,
                    class: report.class,
                    result: id,
                    status: report.status,
                    done: done + 1,
                    total,
                };
                if tick(&progress) == TickControl::Cancel {
                    summary.cancelled = true;
                    break;
                }
            }

            for class in &order {
                self.settle(*class)?;
            }
            if summary.cancelled || !recursive || summary.iterations >= self.options.max_fix_iterations {
                break;
            }

            let before = self.agents.enabled();
            let counts = self.recheck(store)?;
            let newly_enabled = self.agents.enabled().difference(&before).next().is_some();
            if counts.pending == 0 || !(progressed || newly_enabled) {
                break;
            }
        }

        let counts = self.results.counts();
        summary.rejected = counts.rejected;
        summary.remaining_pending = counts.pending;
        info!(
            fixed = summary.fixed,
            failed = summary.failed,
            pending = summary.remaining_pending,
            iterations = summary.iterations,
            cancelled = summary.cancelled,
            "批量修复结束"
        );
        Ok(summary)
    }

    /// 拒绝一条结果；其源实体在之后的检查中产生的结果也会被自动拒绝。
    pub fn reject(&mut self, id: ResultId) -> Result<(), EngineError> {
        let result = self
            .results
            .get_mut(id)
            .ok_or(EngineError::ResultNotFound(id.get()))?;
        if result.status() != ResultStatus::Pending {
            return Err(EngineError::ResultNotPending(id.get()));
        }
        result.set_status(ResultStatus::Rejected);
        let class = result.class();
        self.rejected_sources.extend(result.source_ids.iter().copied());
        debug!(result = id.get(), class = %class, "结果被拒绝");
        self.settle(class)
    }

    /// 人工确认某检查项已处理完毕。
    pub fn mark_executed(&mut self, class: DefectClass) -> Result<(), EngineError> {
        let changes = self.agents.mark_executed(class)?;
        self.push_status_changes(changes);
        Ok(())
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn result(&self, id: ResultId) -> Option<&DefectResult> {
        self.results.get(id)
    }

    /// 按代理顺序列出有结果的类别及其状态统计。
    pub fn groups(&self) -> Vec<(DefectClass, StatusCounts)> {
        self.agents
            .order()
            .into_iter()
            .filter(|class| self.results.group(*class).next().is_some())
            .map(|class| (class, self.results.counts_for(class)))
            .collect()
    }

    pub fn agents(&self) -> &AgentTable {
        &self.agents
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn scope(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.scope.iter().copied()
    }

    fn apply_fix(
        &mut self,
        store: &mut dyn EntityStore,
        id: ResultId,
    ) -> Result<FixReport, EngineError> {
        let result = self
            .results
            .get(id)
            .ok_or(EngineError::ResultNotFound(id.get()))?;
        let class = result.class();
        let action = self
            .registry
            .get(class)
            .ok_or(EngineError::AgentNotRegistered(class))?;
        let sources = result.source_ids.clone();
        let tolerances = self.options.tolerances;

        let attempt = {
            let mut mutation = Mutation::begin(store);
            match action.fix(result, &mut mutation, &tolerances) {
                Ok(outcome) => Ok((outcome, mutation.commit())),
                // 守卫在此处被丢弃，全部写入回滚。
                Err(error) => Err(error),
            }
        };

        match attempt {
            Ok((outcome, log)) => {
                let mut touched = sources;
                touched.extend(log.touched());
                touched.sort();
                touched.dedup();
                if let Some(result) = self.results.get_mut(id) {
                    result.mark_fixed(outcome.targets.clone());
                }
                let invalidated = self.results.invalidate_sharing(id, &touched);
                for erased in &log.erased {
                    self.scope.remove(erased);
                }
                self.scope.extend(log.appended.iter().copied());
                debug!(
                    result = id.get(),
                    class = %class,
                    targets = outcome.targets.len(),
                    invalidated = invalidated.len(),
                    "修复完成"
                );
                Ok(FixReport {
                    result: id,
                    class,
                    status: ResultStatus::Fixed,
                    targets: outcome.targets,
                    invalidated,
                })
            }
            Err(FixError::NoFixMethod) => {
                if let Some(result) = self.results.get_mut(id) {
                    result.set_status(ResultStatus::NoFixMethod);
                }
                Ok(self.terminal_report(id, class, ResultStatus::NoFixMethod))
            }
            Err(error) => {
                warn!(result = id.get(), class = %class, error = %error, "修复失败，已回滚");
                if let Some(result) = self.results.get_mut(id) {
                    result.mark_failed(error.to_string());
                }
                let changes = self.agents.update(class, AgentStatus::FAILED, true)?;
                self.push_status_changes(changes);
                Ok(self.terminal_report(id, class, ResultStatus::Failed))
            }
        }
    }

    fn terminal_report(&self, id: ResultId, class: DefectClass, status: ResultStatus) -> FixReport {
        FixReport {
            result: id,
            class,
            status,
            targets: Vec::new(),
            invalidated: Vec::new(),
        }
    }

    /// 已检查的代理：既无待处理也无修复失败的结果时获得 `EXECUTED`，否则失去它。
    fn settle(&mut self, class: DefectClass) -> Result<(), EngineError> {
        if !self.checked.contains(&class) {
            return Ok(());
        }
        let status = self
            .agents
            .status(class)
            .ok_or(EngineError::AgentNotRegistered(class))?;
        let counts = self.results.counts_for(class);
        let blocked = counts.pending > 0 || counts.failed > 0;
        let changes = if !blocked
            && status.contains(AgentStatus::PENDING)
            && !status.contains(AgentStatus::EXECUTED)
        {
            self.agents.mark_executed(class)?
        } else if blocked && status.contains(AgentStatus::EXECUTED) {
            self.agents.update(class, AgentStatus::EXECUTED, false)?
        } else {
            Vec::new()
        };
        self.push_status_changes(changes);
        Ok(())
    }

    fn push_status_changes(&mut self, changes: Vec<(DefectClass, AgentStatus)>) {
        self.events.extend(
            changes
                .into_iter()
                .map(|(class, status)| SessionEvent::StatusChanged { class, status }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztopo_core::document::Document;
    use ztopo_core::geometry::Point2;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn session() -> TopologySession {
        TopologySession::new(
            &Workflow::line_cleanup(),
            ActionRegistry::new(),
            SessionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn clean_drawing_enables_every_agent() {
        let mut doc = Document::new();
        doc.add_polyline([p(0.0, 0.0), p(0.0, 5.0), p(5.0, 5.0), p(5.0, 0.0)], true, "0");
        let mut session = session();
        let ids = doc.entity_ids();
        let counts = session.check(&doc, &ids).unwrap();
        assert_eq!(counts.total(), 0);
        for agent in session.agents().iter() {
            assert!(agent.status.contains(AgentStatus::EXECUTED), "{}", agent.class);
        }
    }

    #[test]
    fn pending_results_block_dependents() {
        let mut doc = Document::new();
        doc.add_line(p(1.0, 1.0), p(1.0, 1.0), "0");
        doc.add_line(p(0.0, 0.0), p(4.0, 0.0), "0");
        let mut session = session();
        let ids = doc.entity_ids();
        session.check(&doc, &ids).unwrap();
        assert!(session.agents().is_enabled(DefectClass::ZeroLength));
        assert!(!session.agents().is_enabled(DefectClass::Duplicate));
        assert_eq!(session.groups().len(), 1);
        let events = session.drain_events();
        assert!(events.contains(&SessionEvent::ResultGroupAdded {
            class: DefectClass::ZeroLength,
            count: 1
        }));
        assert!(session.drain_events().is_empty());
    }

    #[test]
    fn fixing_a_terminal_result_is_an_error() {
        let mut doc = Document::new();
        doc.add_line(p(1.0, 1.0), p(1.0, 1.0), "0");
        let mut session = session();
        let ids = doc.entity_ids();
        session.check(&doc, &ids).unwrap();
        let id = session.results().pending_ids(DefectClass::ZeroLength)[0];
        let report = session.fix_one(&mut doc, id).unwrap();
        assert_eq!(report.status, ResultStatus::Fixed);
        assert!(doc.is_empty());
        assert!(matches!(
            session.fix_one(&mut doc, id),
            Err(EngineError::ResultNotPending(_))
        ));
        assert!(matches!(
            session.fix_one(&mut doc, ResultId::new(999)),
            Err(EngineError::ResultNotFound(999))
        ));
    }

    #[test]
    fn unknown_selection_is_rejected() {
        let mut session = session();
        assert!(session.select(&[DefectClass::PolygonHole]).is_err());
        assert!(session.select(&[DefectClass::Crossing]).is_ok());
    }
}
