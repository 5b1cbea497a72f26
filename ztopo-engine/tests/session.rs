use ztopo_core::algorithms::area::{Winding, winding};
use ztopo_core::curve::Curve;
use ztopo_core::document::{Document, EntityId, EntityStore, Mutation};
use ztopo_core::geometry::Point2;
use ztopo_core::tolerance::Tolerances;
use ztopo_engine::action::{ActionRegistry, CheckContext, FixOutcome, TopologyAction};
use ztopo_engine::agent::AgentStatus;
use ztopo_engine::checks;
use ztopo_engine::errors::FixError;
use ztopo_engine::result::{DefectClass, DefectPayload, DefectResult, ResultStatus};
use ztopo_engine::session::{SessionEvent, SessionOptions, TickControl, TopologySession};
use ztopo_engine::workflow::Workflow;

fn p(x: f64, y: f64) -> Point2 {
    Point2::new(x, y)
}

fn line_session() -> TopologySession {
    TopologySession::new(
        &Workflow::line_cleanup(),
        ActionRegistry::new(),
        SessionOptions::default(),
    )
    .unwrap()
}

fn crossing_session() -> TopologySession {
    let workflow = Workflow::custom("crossing", vec![(DefectClass::Crossing, vec![])]);
    TopologySession::new(&workflow, ActionRegistry::new(), SessionOptions::default()).unwrap()
}

fn messy_lines() -> Document {
    let mut doc = Document::new();
    doc.add_polyline([p(0.0, 0.0), p(0.0, 10.0), p(10.0, 10.0), p(10.0, 0.0)], true, "parcel");
    doc.add_line(p(-2.0, 5.0), p(12.0, 5.0), "road");
    doc.add_line(p(-2.0, 5.0), p(12.0, 5.0), "road");
    doc.add_line(p(20.0, 20.0), p(20.0, 20.0), "0");
    doc
}

type Snapshot = Vec<(DefectPayload, Vec<EntityId>, Vec<Point2>, ResultStatus)>;

/// 去掉结果 ID 后的可比较快照。
fn snapshot(session: &TopologySession) -> Snapshot {
    session
        .results()
        .iter()
        .map(|result| {
            (
                result.payload.clone(),
                result.source_ids.clone(),
                result.mark_points.clone(),
                result.status(),
            )
        })
        .collect()
}

#[test]
fn checking_twice_yields_identical_results() {
    let doc = messy_lines();
    let ids = doc.entity_ids();
    let mut session = line_session();
    session.check(&doc, &ids).unwrap();
    let first = snapshot(&session);
    session.check(&doc, &ids).unwrap();
    assert_eq!(first, snapshot(&session));

    let mut other = line_session();
    other.check(&doc, &ids).unwrap();
    assert_eq!(first, snapshot(&other));
    assert!(!first.is_empty());
}

#[test]
fn fixing_a_crossing_invalidates_results_sharing_the_entity() {
    let mut doc = Document::new();
    let road = doc.add_line(p(0.0, 5.0), p(10.0, 5.0), "road");
    doc.add_line(p(3.0, 0.0), p(3.0, 10.0), "0");
    let east = doc.add_line(p(7.0, 0.0), p(7.0, 10.0), "0");

    let mut session = crossing_session();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();
    let pending = session.results().pending_ids(DefectClass::Crossing);
    assert_eq!(pending.len(), 2);

    let report = session.fix_one(&mut doc, pending[0]).unwrap();
    assert_eq!(report.status, ResultStatus::Fixed);
    assert_eq!(report.targets[0], road);
    assert_eq!(report.invalidated, vec![pending[1]]);
    assert_eq!(
        session.result(pending[1]).map(DefectResult::status),
        Some(ResultStatus::Invalid)
    );

    // 新追加的路段进入检查范围，与东侧线的交叉重新出现。
    session.recheck(&doc).unwrap();
    let again = session.results().pending_ids(DefectClass::Crossing);
    assert_eq!(again.len(), 1);
    let result = session.result(again[0]).unwrap();
    assert!(result.source_ids.contains(&east));
    assert!(!result.source_ids.contains(&road));
}

struct EraseThenFail;

impl TopologyAction for EraseThenFail {
    fn class(&self) -> DefectClass {
        DefectClass::ZeroLength
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<DefectResult> {
        checks::lines::zero_length(context)
    }

    fn fix(
        &self,
        result: &DefectResult,
        mutation: &mut Mutation<'_>,
        _tolerances: &Tolerances,
    ) -> Result<FixOutcome, FixError> {
        mutation.erase_entity(result.source_ids[0])?;
        mutation.append_entity(Curve::line(p(0.0, 0.0), p(1.0, 0.0)).to_entity("0"));
        Err(FixError::UnsupportedGeometry("simulated failure".to_string()))
    }
}

#[test]
fn failed_fix_rolls_back_every_write() {
    let mut doc = Document::new();
    let point = doc.add_line(p(3.0, 3.0), p(3.0, 3.0), "0");
    doc.add_line(p(0.0, 0.0), p(0.0, 4.0), "0");
    let before: Vec<_> = doc.entities().cloned().collect();

    let mut registry = ActionRegistry::new();
    registry.register(EraseThenFail);
    let mut session =
        TopologySession::new(&Workflow::line_cleanup(), registry, SessionOptions::default())
            .unwrap();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();
    let id = session.results().pending_ids(DefectClass::ZeroLength)[0];

    let report = session.fix_one(&mut doc, id).unwrap();
    assert_eq!(report.status, ResultStatus::Failed);
    let after: Vec<_> = doc.entities().cloned().collect();
    assert_eq!(before, after);
    assert!(doc.entity(point).is_some());

    let result = session.result(id).unwrap();
    assert_eq!(result.status(), ResultStatus::Failed);
    assert!(result.failure().is_some_and(|reason| reason.contains("simulated failure")));
    let status = session.agents().status(DefectClass::ZeroLength).unwrap();
    assert!(status.contains(AgentStatus::FAILED));
    assert!(!status.contains(AgentStatus::EXECUTED));
}

#[test]
fn rejection_is_carried_over_a_recheck() {
    let mut doc = Document::new();
    let point = doc.add_line(p(1.0, 1.0), p(1.0, 1.0), "0");
    doc.add_line(p(0.0, 0.0), p(5.0, 0.0), "0");

    let mut session = line_session();
    session.select(&[DefectClass::ZeroLength]).unwrap();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();
    let id = session.results().pending_ids(DefectClass::ZeroLength)[0];
    session.reject(id).unwrap();
    assert!(session.agents().is_enabled(DefectClass::Duplicate));

    session.recheck(&doc).unwrap();
    let group: Vec<_> = session.results().group(DefectClass::ZeroLength).collect();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].status(), ResultStatus::Rejected);
    assert!(group[0].source_ids.contains(&point));

    let summary = session
        .fix_all(&mut doc, true, &mut |_| TickControl::Continue)
        .unwrap();
    assert_eq!(summary.fixed, 0);
    assert_eq!(summary.rejected, 1);
    assert!(doc.entity(point).is_some());
}

#[test]
fn executed_root_enables_its_dependent() {
    let mut doc = Document::new();
    doc.add_line(p(1.0, 1.0), p(1.0, 1.0), "0");
    doc.add_line(p(0.0, 0.0), p(5.0, 0.0), "0");
    doc.add_line(p(5.0, 0.0), p(0.0, 0.0), "0");

    let mut session = line_session();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();
    assert!(!session.agents().is_enabled(DefectClass::Duplicate));
    assert_eq!(session.results().group(DefectClass::Duplicate).count(), 0);
    session.drain_events();

    let id = session.results().pending_ids(DefectClass::ZeroLength)[0];
    session.fix_one(&mut doc, id).unwrap();
    assert_eq!(
        session.agents().status(DefectClass::Duplicate),
        Some(AgentStatus::PENDING)
    );
    assert!(session.drain_events().contains(&SessionEvent::StatusChanged {
        class: DefectClass::Duplicate,
        status: AgentStatus::PENDING,
    }));
    assert!(!session.agents().is_enabled(DefectClass::Clustered));

    session.recheck(&doc).unwrap();
    assert_eq!(session.results().pending_ids(DefectClass::Duplicate).len(), 1);
    assert!(!session.agents().is_enabled(DefectClass::Clustered));
}

#[test]
fn recursive_line_cleanup_converges() {
    let mut doc = messy_lines();
    let mut session = line_session();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();

    let mut ticks = 0;
    let summary = session
        .fix_all(&mut doc, true, &mut |_| {
            ticks += 1;
            TickControl::Continue
        })
        .unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.remaining_pending, 0);
    assert!(summary.fixed >= 4);
    assert!(summary.iterations >= 3);
    assert_eq!(ticks, summary.fixed + summary.failed + summary.no_fix_method);

    // 伸出地块外的路段已被修剪。
    let bounds = doc.bounds().unwrap();
    assert!(bounds.min().x() > -1e-9);
    assert!(bounds.max().x() < 10.0 + 1e-9);

    let mut fresh = line_session();
    let ids = doc.entity_ids();
    let counts = fresh.check(&doc, &ids).unwrap();
    assert_eq!(counts.pending, 0);
}

#[test]
fn recursive_polygon_cleanup_closes_and_orients() {
    let mut doc = Document::new();
    doc.add_polyline([p(0.0, 0.0), p(4.0, 0.0), p(4.0, 4.0), p(0.0, 4.0)], true, "parcel");
    doc.add_polyline(
        [p(10.0, 0.0), p(10.0, 4.0), p(14.0, 4.0), p(14.0, 0.0), p(10.002, 0.0)],
        false,
        "parcel",
    );

    let mut session = TopologySession::new(
        &Workflow::polygon_topology(),
        ActionRegistry::new(),
        SessionOptions::default(),
    )
    .unwrap();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();
    let summary = session
        .fix_all(&mut doc, true, &mut |_| TickControl::Continue)
        .unwrap();
    assert_eq!(summary.fixed, 2);
    assert_eq!(summary.remaining_pending, 0);

    let tolerances = Tolerances::default();
    for id in doc.entity_ids() {
        let curve = doc.curve(id).unwrap();
        assert!(curve.is_closed);
        assert_eq!(winding(&curve, &tolerances), Winding::Clockwise);
    }
}

#[test]
fn tick_can_cancel_a_batch() {
    let mut doc = Document::new();
    for x in [0.0, 5.0, 10.0] {
        doc.add_line(p(x, 0.0), p(x, 0.0), "0");
    }
    let mut session = line_session();
    let ids = doc.entity_ids();
    session.check(&doc, &ids).unwrap();

    let summary = session
        .fix_all(&mut doc, true, &mut |progress| {
            assert_eq!(progress.total, 3);
            TickControl::Cancel
        })
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.fixed, 1);
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.remaining_pending, 2);
    assert_eq!(doc.len(), 2);
}
