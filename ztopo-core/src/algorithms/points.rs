use std::collections::HashMap;

use crate::geometry::Point2;

/// 按容差判重的点集合，成员判定为线性扫描。
#[derive(Debug, Clone, Default)]
pub struct PointSet {
    points: Vec<Point2>,
    tolerance: f64,
}

impl PointSet {
    pub fn new(tolerance: f64) -> Self {
        Self {
            points: Vec::new(),
            tolerance,
        }
    }

    pub fn contains(&self, candidate: Point2) -> bool {
        self.points
            .iter()
            .any(|point| point.approx_eq(candidate, self.tolerance))
    }

    /// 集合中没有容差内的重合点时插入，返回是否插入。
    pub fn insert_if_absent(&mut self, candidate: Point2) -> bool {
        if self.contains(candidate) {
            return false;
        }
        self.points.push(candidate);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point2> {
        self.points
    }
}

/// 去除容差内重复的点，保持首次出现的顺序。
pub fn dedup_points<I>(points: I, tolerance: f64) -> Vec<Point2>
where
    I: IntoIterator<Item = Point2>,
{
    let mut set = PointSet::new(tolerance);
    for point in points {
        set.insert_if_absent(point);
    }
    set.into_points()
}

/// 哈希网格点索引：按坐标分桶（桶宽为容差的两倍），查询时探测 3×3 邻域。
#[derive(Debug, Clone)]
pub struct PointGrid {
    cell: f64,
    tolerance: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    points: Vec<Point2>,
}

impl PointGrid {
    pub fn new(tolerance: f64) -> Self {
        let tolerance = tolerance.max(1e-12);
        Self {
            cell: tolerance * 2.0,
            tolerance,
            buckets: HashMap::new(),
            points: Vec::new(),
        }
    }

    fn key(&self, point: Point2) -> (i64, i64) {
        (
            (point.x() / self.cell).floor() as i64,
            (point.y() / self.cell).floor() as i64,
        )
    }

    /// 邻域内全部已登记点的序号（不做距离过滤）。
    pub fn neighbours(&self, point: Point2) -> Vec<usize> {
        let (kx, ky) = self.key(point);
        let mut found = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(bucket) = self.buckets.get(&(kx + dx, ky + dy)) {
                    found.extend_from_slice(bucket);
                }
            }
        }
        found
    }

    pub fn find(&self, point: Point2) -> Option<usize> {
        self.neighbours(point)
            .into_iter()
            .filter(|&index| self.points[index].approx_eq(point, self.tolerance))
            .min()
    }

    /// 返回容差内已有点的序号，没有则登记新点。
    pub fn snap(&mut self, point: Point2) -> usize {
        if let Some(index) = self.find(point) {
            return index;
        }
        self.push(point)
    }

    /// 不做合并直接登记。
    pub fn push(&mut self, point: Point2) -> usize {
        let index = self.points.len();
        let key = self.key(point);
        self.points.push(point);
        self.buckets.entry(key).or_default().push(index);
        index
    }

    #[inline]
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Point2> {
        self.points
    }
}
