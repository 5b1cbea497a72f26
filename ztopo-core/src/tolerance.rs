use serde::{Deserialize, Serialize};

/// 全部数值容差的唯一来源。
///
/// 单位约定：长度类字段与图形单位一致，面积类字段为图形单位的平方，
/// `angle` 为弧度。各检查项只从这里读取容差，不再自带魔数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// 点重合（长度）。
    pub point: f64,
    /// 节点聚簇半径（长度）。
    pub cluster: f64,
    /// 零长度曲线（长度）。
    pub zero_length: f64,
    /// 零面积回路（面积）。
    pub zero_area: f64,
    /// 小多边形面积上限（面积）。
    pub small_polygon_area: f64,
    /// 多边形缝隙与未闭合接缝（长度）。
    pub gap: f64,
    /// 多边形重叠的最小有效面积（面积）。
    pub overlap_area: f64,
    /// Douglas-Peucker 抽稀距离（长度）。
    pub simplify: f64,
    /// 圆弧角度比较（弧度）。
    pub angle: f64,
    /// 圆弧离散化弦高（长度）。
    pub arc_chord: f64,
}

impl Tolerances {
    pub const DEFAULT_POINT: f64 = 1e-6;
    pub const DEFAULT_CLUSTER: f64 = 1e-3;
    pub const DEFAULT_ZERO_LENGTH: f64 = 1e-5;
    pub const DEFAULT_ZERO_AREA: f64 = 5e-5;

    #[inline]
    pub fn points_equal(&self, a: crate::geometry::Point2, b: crate::geometry::Point2) -> bool {
        a.approx_eq(b, self.point)
    }

    #[inline]
    pub fn is_zero_length(&self, length: f64) -> bool {
        length <= self.zero_length
    }

    #[inline]
    pub fn is_zero_area(&self, area: f64) -> bool {
        area.abs() <= self.zero_area
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            point: Self::DEFAULT_POINT,
            cluster: Self::DEFAULT_CLUSTER,
            zero_length: Self::DEFAULT_ZERO_LENGTH,
            zero_area: Self::DEFAULT_ZERO_AREA,
            small_polygon_area: 1.0,
            gap: 1e-2,
            overlap_area: 1e-4,
            simplify: 1e-3,
            angle: 1e-9,
            arc_chord: 1e-3,
        }
    }
}
