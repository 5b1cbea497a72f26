use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;
use crate::result::DefectClass;

/// 代理状态位集合；空集即禁用。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentStatus(u8);

impl AgentStatus {
    pub const DISABLED: AgentStatus = AgentStatus(0);
    pub const PENDING: AgentStatus = AgentStatus(1);
    pub const EXECUTED: AgentStatus = AgentStatus(1 << 1);
    pub const FAILED: AgentStatus = AgentStatus(1 << 2);

    #[inline]
    pub fn contains(self, flag: AgentStatus) -> bool {
        flag.0 != 0 && self.0 & flag.0 == flag.0
    }

    #[inline]
    pub fn insert(&mut self, flag: AgentStatus) {
        self.0 |= flag.0;
    }

    #[inline]
    pub fn remove(&mut self, flag: AgentStatus) {
        self.0 &= !flag.0;
    }

    #[inline]
    pub fn is_disabled(self) -> bool {
        !self.contains(AgentStatus::PENDING)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("disabled");
        }
        let names = [
            (AgentStatus::PENDING, "pending"),
            (AgentStatus::EXECUTED, "executed"),
            (AgentStatus::FAILED, "failed"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&parts.join("|"))
    }
}

/// 一个缺陷类别在工作流中的依赖与状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAgent {
    pub class: DefectClass,
    pub dependencies: Vec<DefectClass>,
    pub status: AgentStatus,
}

impl ActionAgent {
    #[inline]
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// 按拓扑序保存的代理表。
///
/// 每次状态变化后调用方需要显式执行 [`AgentTable::re_evaluate`]：
/// 依赖全部已执行的代理获得 `PENDING`，否则清除 `PENDING` 与 `EXECUTED`。
#[derive(Debug, Clone)]
pub struct AgentTable {
    agents: Vec<ActionAgent>,
    index: HashMap<DefectClass, usize>,
}

impl AgentTable {
    /// 依赖未登记或存在环时返回错误。
    pub fn new(declarations: &[(DefectClass, Vec<DefectClass>)]) -> Result<Self, EngineError> {
        let declared: BTreeSet<DefectClass> = declarations.iter().map(|(class, _)| *class).collect();
        for (_, dependencies) in declarations {
            if let Some(missing) = dependencies.iter().find(|dep| !declared.contains(dep)) {
                return Err(EngineError::AgentNotRegistered(*missing));
            }
        }

        // Kahn 排序，同层保持声明顺序。
        let mut placed: BTreeSet<DefectClass> = BTreeSet::new();
        let mut ordered: Vec<ActionAgent> = Vec::with_capacity(declarations.len());
        while ordered.len() < declared.len() {
            let ready = declarations.iter().find(|(class, dependencies)| {
                !placed.contains(class) && dependencies.iter().all(|dep| placed.contains(dep))
            });
            let Some((class, dependencies)) = ready else {
                let blocked = declarations
                    .iter()
                    .map(|(class, _)| *class)
                    .find(|class| !placed.contains(class));
                return Err(EngineError::DependencyCycle(
                    blocked.unwrap_or(DefectClass::ZeroLength),
                ));
            };
            placed.insert(*class);
            let status = if dependencies.is_empty() {
                AgentStatus::PENDING
            } else {
                AgentStatus::DISABLED
            };
            ordered.push(ActionAgent {
                class: *class,
                dependencies: dependencies.clone(),
                status,
            });
        }

        let index = ordered
            .iter()
            .enumerate()
            .map(|(position, agent)| (agent.class, position))
            .collect();
        Ok(Self {
            agents: ordered,
            index,
        })
    }

    pub fn get(&self, class: DefectClass) -> Option<&ActionAgent> {
        self.index.get(&class).map(|&position| &self.agents[position])
    }

    pub fn status(&self, class: DefectClass) -> Option<AgentStatus> {
        self.get(class).map(|agent| agent.status)
    }

    pub fn contains(&self, class: DefectClass) -> bool {
        self.index.contains_key(&class)
    }

    pub fn is_enabled(&self, class: DefectClass) -> bool {
        self.status(class)
            .is_some_and(|status| status.contains(AgentStatus::PENDING))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionAgent> {
        self.agents.iter()
    }

    /// 拓扑序的类别列表。
    pub fn order(&self) -> Vec<DefectClass> {
        self.agents.iter().map(|agent| agent.class).collect()
    }

    pub fn enabled(&self) -> BTreeSet<DefectClass> {
        self.agents
            .iter()
            .filter(|agent| agent.status.contains(AgentStatus::PENDING))
            .map(|agent| agent.class)
            .collect()
    }

    /// 直接依赖 `class` 的代理。
    pub fn dependents(&self, class: DefectClass) -> Vec<DefectClass> {
        self.agents
            .iter()
            .filter(|agent| agent.dependencies.contains(&class))
            .map(|agent| agent.class)
            .collect()
    }

    /// 置位或清除一个状态位并重新求值，返回状态发生变化的代理。
    pub fn update(
        &mut self,
        class: DefectClass,
        flag: AgentStatus,
        set: bool,
    ) -> Result<Vec<(DefectClass, AgentStatus)>, EngineError> {
        let position = *self
            .index
            .get(&class)
            .ok_or(EngineError::AgentNotRegistered(class))?;
        let before: Vec<AgentStatus> = self.agents.iter().map(|agent| agent.status).collect();
        let agent = &mut self.agents[position];
        if set {
            agent.status.insert(flag);
        } else {
            agent.status.remove(flag);
        }
        self.propagate();
        Ok(self.changes_since(&before))
    }

    pub fn mark_executed(&mut self, class: DefectClass) -> Result<Vec<(DefectClass, AgentStatus)>, EngineError> {
        self.update(class, AgentStatus::EXECUTED, true)
    }

    /// 对全部代理做一次前向求值，返回状态发生变化的代理。
    pub fn re_evaluate(&mut self) -> Vec<(DefectClass, AgentStatus)> {
        let before: Vec<AgentStatus> = self.agents.iter().map(|agent| agent.status).collect();
        self.propagate();
        self.changes_since(&before)
    }

    fn propagate(&mut self) {
        // 拓扑序单遍即可：前驱的 EXECUTED 在本轮中已确定。
        for position in 0..self.agents.len() {
            let ready = self.agents[position]
                .dependencies
                .iter()
                .all(|dep| {
                    self.index
                        .get(dep)
                        .is_some_and(|&i| self.agents[i].status.contains(AgentStatus::EXECUTED))
                });
            let agent = &mut self.agents[position];
            if ready {
                agent.status.insert(AgentStatus::PENDING);
            } else {
                agent.status.remove(AgentStatus::PENDING);
                agent.status.remove(AgentStatus::EXECUTED);
            }
        }
    }

    fn changes_since(&self, before: &[AgentStatus]) -> Vec<(DefectClass, AgentStatus)> {
        let changes: Vec<(DefectClass, AgentStatus)> = self
            .agents
            .iter()
            .zip(before)
            .filter(|(agent, old)| agent.status != **old)
            .map(|(agent, _)| (agent.class, agent.status))
            .collect();
        for (class, status) in &changes {
            debug!(class = %class, status = %status, "代理状态变化");
        }
        changes
    }
}
