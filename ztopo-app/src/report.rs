use serde::Serialize;
use ztopo_engine::result::{DefectClass, StatusCounts};
use ztopo_engine::session::{BatchSummary, TopologySession};

/// 一类缺陷在检查后与修复后的统计。
#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    pub class: DefectClass,
    pub found: usize,
    pub after: StatusCounts,
}

/// 一次运行的完整报告，可直接序列化为 JSON。
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub entities_before: usize,
    pub entities_after: usize,
    pub groups: Vec<GroupRow>,
    pub summary: BatchSummary,
}

impl RunReport {
    /// `found` 为首次检查后的分组统计。
    pub fn new(
        session: &TopologySession,
        found: &[(DefectClass, StatusCounts)],
        entities_before: usize,
        entities_after: usize,
        summary: BatchSummary,
    ) -> Self {
        let after = session.groups();
        let mut classes: Vec<DefectClass> = found
            .iter()
            .chain(after.iter())
            .map(|(class, _)| *class)
            .collect();
        let order = session.agents().order();
        classes.sort_by_key(|class| order.iter().position(|c| c == class));
        classes.dedup();

        let groups = classes
            .into_iter()
            .map(|class| GroupRow {
                class,
                found: lookup(found, class).total(),
                after: lookup(&after, class),
            })
            .collect();
        Self {
            workflow: session.workflow().to_string(),
            entities_before,
            entities_after,
            groups,
            summary,
        }
    }

    pub fn print(&self) {
        println!("ztopo 拓扑检查报告（工作流：{}）", self.workflow);
        println!(
            "实体数量：修复前 {}，修复后 {}",
            self.entities_before, self.entities_after
        );
        if self.groups.is_empty() {
            println!("未发现任何缺陷。");
        } else {
            println!("缺陷分组：");
            for row in &self.groups {
                println!(
                    "  - {:<24} 发现 {:>3}，剩余待处理 {:>3}，修复失败 {:>3}，已拒绝 {:>3}，无法自动修复 {:>3}",
                    row.class.name(),
                    row.found,
                    row.after.pending,
                    row.after.failed,
                    row.after.rejected,
                    row.after.no_fix_method
                );
            }
        }
        let summary = &self.summary;
        println!(
            "批量修复：修复 {}，失败 {}，失效 {}，无修复方法 {}，迭代 {} 轮{}",
            summary.fixed,
            summary.failed,
            summary.invalidated,
            summary.no_fix_method,
            summary.iterations,
            if summary.cancelled { "（已取消）" } else { "" }
        );
    }
}

fn lookup(rows: &[(DefectClass, StatusCounts)], class: DefectClass) -> StatusCounts {
    rows.iter()
        .find(|(c, _)| *c == class)
        .map(|(_, counts)| *counts)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztopo_config::WorkflowChoice;
    use ztopo_core::document::EntityStore;
    use ztopo_engine::action::ActionRegistry;
    use ztopo_engine::session::SessionOptions;
    use ztopo_engine::workflow::Workflow;

    use crate::demo::sample_document;

    #[test]
    fn report_lists_groups_found_by_the_first_check() {
        let doc = sample_document(WorkflowChoice::Line);
        let mut session = TopologySession::new(
            &Workflow::line_cleanup(),
            ActionRegistry::new(),
            SessionOptions::default(),
        )
        .unwrap();
        let ids = doc.entity_ids();
        session.check(&doc, &ids).unwrap();
        let found = session.groups();
        let report = RunReport::new(&session, &found, doc.len(), doc.len(), BatchSummary::default());
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].class, DefectClass::ZeroLength);
        assert_eq!(report.groups[0].found, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["workflow"], "line_cleanup");
        assert_eq!(json["groups"][0]["class"], "zero_length");
    }
}
