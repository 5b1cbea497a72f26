use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use ztopo_core::algorithms::intersect::{curve_intersections, self_intersections};
use ztopo_core::algorithms::points::PointGrid;
use ztopo_core::curve::Curve;
use ztopo_core::document::EntityId;
use ztopo_core::geometry::Point2;
use ztopo_core::tolerance::Tolerances;

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

/// 曲线上的一个端点或交点：只引用所属实体，不持有曲线。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveVertex {
    pub point: Point2,
    pub entity: EntityId,
    /// 在所属曲线断点序列中的序号。
    pub index: usize,
}

impl CurveVertex {
    /// 容差内重合即为同一节点。
    #[inline]
    pub fn same_node(&self, other: &CurveVertex, tolerance: f64) -> bool {
        self.point.approx_eq(other.point, tolerance)
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub point: Point2,
    pub vertices: Vec<CurveVertex>,
}

/// 曲线在两个相邻节点之间的一段，`t0..t1` 为所属曲线上的参数区间。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub entity: EntityId,
    pub t0: f64,
    pub t1: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    /// 在曲线之间及曲线自身的交点处插入节点并打断边。
    pub split_at_intersections: bool,
    pub tolerances: Tolerances,
}

impl GraphOptions {
    pub fn new(tolerances: Tolerances) -> Self {
        Self {
            split_at_intersections: false,
            tolerances,
        }
    }

    pub fn with_split(mut self, split: bool) -> Self {
        self.split_at_intersections = split;
        self
    }
}

/// 一条悬挂链：从自由端开始剪除的边序列。
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingChain {
    pub edges: Vec<usize>,
    pub entities: Vec<EntityId>,
    pub free_end: NodeId,
    pub free_point: Point2,
}

/// 一组彼此靠近但不重合的节点，修复时统一吸附到 `center`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNodesInfo {
    pub nodes: Vec<NodeId>,
    pub points: Vec<Point2>,
    pub entities: Vec<EntityId>,
    pub center: Point2,
}

/// 曲线图：节点为端点与交点，边为相邻节点之间的曲线段。每次检查重新构建。
#[derive(Debug, Clone, Default)]
pub struct CurveGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    incidence: Vec<Vec<usize>>,
}

impl CurveGraph {
    pub fn build(curves: &[(EntityId, Curve)], options: &GraphOptions) -> Self {
        let tolerances = &options.tolerances;
        let mut breaks: Vec<Vec<f64>> = curves
            .iter()
            .map(|(_, curve)| {
                if curve.is_closed {
                    vec![0.0]
                } else {
                    vec![0.0, curve.param_end()]
                }
            })
            .collect();

        if options.split_at_intersections {
            let bounds: Vec<_> = curves.iter().map(|(_, curve)| curve.bounds()).collect();
            for i in 0..curves.len() {
                for hit in self_intersections(&curves[i].1, tolerances) {
                    breaks[i].push(hit.param_a);
                    breaks[i].push(hit.param_b);
                }
                for j in (i + 1)..curves.len() {
                    let overlapping = match (&bounds[i], &bounds[j]) {
                        (Some(a), Some(b)) => a.intersects(b, tolerances.point),
                        _ => false,
                    };
                    if !overlapping {
                        continue;
                    }
                    for hit in curve_intersections(&curves[i].1, &curves[j].1, tolerances) {
                        breaks[i].push(hit.param_a);
                        breaks[j].push(hit.param_b);
                    }
                }
            }
        }

        let mut graph = CurveGraph::default();
        let mut grid = PointGrid::new(tolerances.point);
        for ((entity, curve), params) in curves.iter().zip(breaks.iter_mut()) {
            if curve.segment_count() == 0 {
                continue;
            }
            let total = curve.param_end();
            params.retain(|u| u.is_finite());
            for u in params.iter_mut() {
                *u = u.clamp(0.0, total);
                if curve.is_closed && *u >= total - 1e-12 {
                    *u = 0.0;
                }
            }
            params.sort_by(f64::total_cmp);
            params.dedup_by(|a, b| (*a - *b).abs() <= 1e-9);
            if curve.is_closed {
                params.push(total);
            }

            let mut node_ids = Vec::with_capacity(params.len());
            for (index, u) in params.iter().enumerate() {
                let Some(point) = curve.point_at(*u) else {
                    continue;
                };
                let node = graph.node_for(&mut grid, point);
                graph.nodes[node.0].vertices.push(CurveVertex {
                    point,
                    entity: *entity,
                    index,
                });
                node_ids.push((node, *u));
            }
            for pair in node_ids.windows(2) {
                let ((source, t0), (target, t1)) = (pair[0], pair[1]);
                if t1 - t0 <= 1e-12 {
                    continue;
                }
                graph.push_edge(GraphEdge {
                    source,
                    target,
                    entity: *entity,
                    t0,
                    t1,
                });
            }
        }

        debug_assert!(graph.check_invariants().is_ok());
        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            split = options.split_at_intersections,
            "已构建曲线图"
        );
        graph
    }

    fn node_for(&mut self, grid: &mut PointGrid, point: Point2) -> NodeId {
        let index = grid.snap(point);
        if index == self.nodes.len() {
            self.nodes.push(GraphNode {
                point,
                vertices: Vec::new(),
            });
            self.incidence.push(Vec::new());
        }
        NodeId(index)
    }

    fn push_edge(&mut self, edge: GraphEdge) {
        let index = self.edges.len();
        self.incidence[edge.source.0].push(index);
        self.incidence[edge.target.0].push(index);
        self.edges.push(edge);
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    pub fn edge(&self, index: usize) -> Option<&GraphEdge> {
        self.edges.get(index)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn find_node(&self, point: Point2, tolerance: f64) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.point.approx_eq(point, tolerance))
            .map(NodeId)
    }

    /// 关联边序号；自环边出现两次。
    pub fn incident_edges(&self, node: NodeId) -> &[usize] {
        self.incidence
            .get(node.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 节点度数，自环计 2。
    #[inline]
    pub fn degree(&self, node: NodeId) -> usize {
        self.incident_edges(node).len()
    }

    pub fn other_end(&self, edge: usize, node: NodeId) -> Option<NodeId> {
        let edge = self.edges.get(edge)?;
        if edge.source == node {
            Some(edge.target)
        } else if edge.target == node {
            Some(edge.source)
        } else {
            None
        }
    }

    /// 每条边的两个端点都存在，且关联表与边表一致。
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        if self.incidence.len() != self.nodes.len() {
            return Err(EngineError::InvariantViolation(format!(
                "incidence table has {} rows for {} nodes",
                self.incidence.len(),
                self.nodes.len()
            )));
        }
        for (index, edge) in self.edges.iter().enumerate() {
            for end in [edge.source, edge.target] {
                let Some(row) = self.incidence.get(end.0) else {
                    return Err(EngineError::InvariantViolation(format!(
                        "edge {index} references missing node {}",
                        end.0
                    )));
                };
                if !row.contains(&index) {
                    return Err(EngineError::InvariantViolation(format!(
                        "edge {index} missing from incidence of node {}",
                        end.0
                    )));
                }
            }
        }
        for (node, row) in self.incidence.iter().enumerate() {
            for &edge in row {
                match self.edges.get(edge) {
                    Some(e) if e.source.0 == node || e.target.0 == node => {}
                    _ => {
                        return Err(EngineError::InvariantViolation(format!(
                            "node {node} lists foreign edge {edge}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// 反复剪除度为 1 的节点及其关联边，记录被剪除的边链。
    pub fn dangling_chains(&self) -> Vec<DanglingChain> {
        let mut degree: Vec<usize> = self.incidence.iter().map(Vec::len).collect();
        let mut removed = vec![false; self.edges.len()];
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&node| degree[node] == 1)
            .collect();
        let mut chains = Vec::new();

        while let Some(leaf) = queue.pop_front() {
            if degree[leaf] != 1 {
                continue;
            }
            let mut edges = Vec::new();
            let mut current = leaf;
            while degree[current] == 1 {
                let Some(&edge) = self.incidence[current]
                    .iter()
                    .find(|&&edge| !removed[edge])
                else {
                    break;
                };
                removed[edge] = true;
                edges.push(edge);
                degree[current] -= 1;
                let Some(next) = self.other_end(edge, NodeId(current)) else {
                    break;
                };
                degree[next.0] = degree[next.0].saturating_sub(1);
                current = next.0;
            }
            if edges.is_empty() {
                continue;
            }
            let mut entities: Vec<EntityId> = Vec::new();
            for &edge in &edges {
                let entity = self.edges[edge].entity;
                if !entities.contains(&entity) {
                    entities.push(entity);
                }
            }
            chains.push(DanglingChain {
                edges,
                entities,
                free_end: NodeId(leaf),
                free_point: self.nodes[leaf].point,
            });
        }
        chains
    }

    /// 把距离不超过 `tolerance` 的不同节点并查集合并成簇，只返回含两个以上节点的簇。
    pub fn cluster_nodes(&self, tolerance: f64) -> Vec<ClusterNodesInfo> {
        let mut sets = DisjointSet::new(self.nodes.len());
        let mut grid = PointGrid::new(tolerance);
        for (index, node) in self.nodes.iter().enumerate() {
            for other in grid.neighbours(node.point) {
                if self.nodes[other].point.distance(node.point) <= tolerance {
                    sets.union(index, other);
                }
            }
            grid.push(node.point);
        }

        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for index in 0..self.nodes.len() {
            let root = sets.find(index);
            groups[root].push(index);
        }

        let mut clusters: Vec<ClusterNodesInfo> = groups
            .into_iter()
            .filter(|group| group.len() > 1)
            .map(|group| {
                let points: Vec<Point2> = group.iter().map(|&i| self.nodes[i].point).collect();
                let entities: BTreeSet<EntityId> = group
                    .iter()
                    .flat_map(|&i| self.nodes[i].vertices.iter().map(|v| v.entity))
                    .collect();
                let count = points.len() as f64;
                let (sx, sy) = points
                    .iter()
                    .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x(), sy + p.y()));
                ClusterNodesInfo {
                    nodes: group.into_iter().map(NodeId).collect(),
                    center: Point2::new(sx / count, sy / count),
                    points,
                    entities: entities.into_iter().collect(),
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.entities.cmp(&b.entities).then(a.nodes.cmp(&b.nodes)));
        clusters
    }
}

/// 并查集，带路径压缩与按大小合并。
#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count).collect(),
            size: vec![1; count],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while x != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        let (small, large) = if self.size[rx] < self.size[ry] {
            (rx, ry)
        } else {
            (ry, rx)
        };
        self.parent[small] = large;
        self.size[large] += self.size[small];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw)
    }

    fn square_with_tail() -> Vec<(EntityId, Curve)> {
        vec![
            (
                id(0),
                Curve::from_points(
                    [
                        Point2::new(0.0, 0.0),
                        Point2::new(10.0, 0.0),
                        Point2::new(10.0, 10.0),
                        Point2::new(0.0, 10.0),
                    ],
                    true,
                ),
            ),
            (id(1), Curve::line(Point2::new(5.0, 10.0), Point2::new(5.0, -5.0))),
        ]
    }

    #[test]
    fn t_junction_leaves_one_dangling_chain() {
        let options = GraphOptions::new(Tolerances::default()).with_split(true);
        let graph = CurveGraph::build(&square_with_tail(), &options);
        assert!(graph.check_invariants().is_ok());
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 5);

        let chains = graph.dangling_chains();
        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert!(chain.free_point.approx_eq(Point2::new(5.0, -5.0), 1e-9));
        assert_eq!(chain.entities, vec![id(1)]);
        assert_eq!(chain.edges.len(), 1);
        let edge = graph.edge(chain.edges[0]).unwrap();
        assert!((edge.t1 - edge.t0 - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unsplit_graph_keeps_whole_curves() {
        let options = GraphOptions::new(Tolerances::default());
        let graph = CurveGraph::build(&square_with_tail(), &options);
        // 闭合多段线只贡献接缝节点和一条自环。
        assert_eq!(graph.edge_count(), 2);
        let seam = graph.find_node(Point2::new(0.0, 0.0), 1e-9).unwrap();
        assert_eq!(graph.degree(seam), 2);
        assert_eq!(graph.other_end(0, seam), Some(seam));
        // 孤立直线两端都是自由端，但只记为一条链。
        let chains = graph.dangling_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].entities, vec![id(1)]);
    }

    #[test]
    fn open_path_is_pruned_as_one_chain() {
        let curves = vec![
            (id(0), Curve::line(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0))),
            (id(1), Curve::line(Point2::new(1.0, 0.0), Point2::new(2.0, 0.0))),
        ];
        let graph = CurveGraph::build(&curves, &GraphOptions::new(Tolerances::default()));
        let chains = graph.dangling_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].edges.len(), 2);
        assert_eq!(chains[0].entities, vec![id(0), id(1)]);
    }

    #[test]
    fn near_nodes_form_one_cluster() {
        let curves = vec![
            (id(0), Curve::line(Point2::new(0.0, 0.0), Point2::new(-5.0, 0.0))),
            (id(1), Curve::line(Point2::new(0.0004, 0.0), Point2::new(5.0, 0.0))),
            (id(2), Curve::line(Point2::new(0.0, 0.0005), Point2::new(0.0, 5.0))),
            (id(3), Curve::line(Point2::new(1.0, 0.0), Point2::new(1.0, -5.0))),
        ];
        let graph = CurveGraph::build(&curves, &GraphOptions::new(Tolerances::default()));
        let clusters = graph.cluster_nodes(1e-3);
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.nodes.len(), 3);
        assert_eq!(cluster.entities, vec![id(0), id(1), id(2)]);
        assert!(cluster.center.approx_eq(Point2::new(0.0004 / 3.0, 0.0005 / 3.0), 1e-12));
    }

    #[test]
    fn coincident_vertices_share_a_node() {
        let a = CurveVertex {
            point: Point2::new(1.0, 1.0),
            entity: id(0),
            index: 0,
        };
        let b = CurveVertex {
            point: Point2::new(1.0 + 5e-7, 1.0),
            entity: id(1),
            index: 1,
        };
        assert!(a.same_node(&b, 1e-6));
        let curves = vec![
            (id(0), Curve::line(Point2::new(0.0, 0.0), a.point)),
            (id(1), Curve::line(b.point, Point2::new(2.0, 2.0))),
        ];
        let graph = CurveGraph::build(&curves, &GraphOptions::new(Tolerances::default()));
        assert_eq!(graph.node_count(), 3);
    }
}
