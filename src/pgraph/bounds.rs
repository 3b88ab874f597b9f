use std::fmt;

use glam::{Mat4, Vec3};

use crate::config::GraphConfig;

/// 节点请求的包围体类型。`Default` 取 [`GraphConfig::default_bounds_type`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum BoundsType {
    #[default]
    Default,
    Sphere,
    Box,
    /// 球与盒各算一遍，取体积较小者。
    Best,
}

impl BoundsType {
    pub fn resolve(self) -> BoundsType {
        match self {
            BoundsType::Default => match GraphConfig::global().default_bounds_type {
                BoundsType::Default => BoundsType::Sphere,
                other => other,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Empty,
    Infinite,
    Sphere { center: Vec3, radius: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Default for BoundingVolume {
    fn default() -> Self {
        BoundingVolume::Empty
    }
}

impl BoundingVolume {
    pub fn sphere(center: Vec3, radius: f32) -> Self {
        BoundingVolume::Sphere { center, radius }
    }

    pub fn aabb(a: Vec3, b: Vec3) -> Self {
        BoundingVolume::Box {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BoundingVolume::Empty)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, BoundingVolume::Infinite)
    }

    /// 包住所有点的包围体。
    pub fn from_points(points: &[Vec3], bounds_type: BoundsType) -> Self {
        let Some((&first, rest)) = points.split_first() else {
            return BoundingVolume::Empty;
        };
        let (min, max) = rest
            .iter()
            .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        let as_box = BoundingVolume::Box { min, max };

        let sphere = || {
            let center = (min + max) * 0.5;
            let radius = points
                .iter()
                .map(|p| p.distance(center))
                .fold(0.0f32, f32::max);
            BoundingVolume::Sphere { center, radius }
        };

        match bounds_type.resolve() {
            BoundsType::Box => as_box,
            BoundsType::Best => smaller(sphere(), as_box),
            _ => sphere(),
        }
    }

    /// 包住一组包围体的包围体；空的被忽略，任一无穷则结果无穷。
    pub fn around(volumes: &[BoundingVolume], bounds_type: BoundsType) -> Self {
        let mut extent: Option<(Vec3, Vec3)> = None;
        for v in volumes {
            match v {
                BoundingVolume::Empty => {}
                BoundingVolume::Infinite => return BoundingVolume::Infinite,
                other => {
                    if let Some((lo, hi)) = other.extent() {
                        extent = Some(match extent {
                            None => (lo, hi),
                            Some((a, b)) => (a.min(lo), b.max(hi)),
                        });
                    }
                }
            }
        }
        let Some((min, max)) = extent else {
            return BoundingVolume::Empty;
        };
        let as_box = BoundingVolume::Box { min, max };

        let sphere = || {
            let center = (min + max) * 0.5;
            let radius = volumes
                .iter()
                .map(|v| v.farthest_distance(center))
                .fold(0.0f32, f32::max);
            BoundingVolume::Sphere { center, radius }
        };

        match bounds_type.resolve() {
            BoundsType::Box => as_box,
            BoundsType::Best => smaller(sphere(), as_box),
            _ => sphere(),
        }
    }

    /// 轴对齐的外接盒。
    pub fn extent(&self) -> Option<(Vec3, Vec3)> {
        match *self {
            BoundingVolume::Sphere { center, radius } => {
                Some((center - Vec3::splat(radius), center + Vec3::splat(radius)))
            }
            BoundingVolume::Box { min, max } => Some((min, max)),
            BoundingVolume::Empty | BoundingVolume::Infinite => None,
        }
    }

    fn farthest_distance(&self, from: Vec3) -> f32 {
        match *self {
            BoundingVolume::Sphere { center, radius } => center.distance(from) + radius,
            BoundingVolume::Box { min, max } => corners(min, max)
                .iter()
                .map(|c| c.distance(from))
                .fold(0.0f32, f32::max),
            BoundingVolume::Empty => 0.0,
            BoundingVolume::Infinite => f32::INFINITY,
        }
    }

    fn volume(&self) -> f32 {
        match *self {
            BoundingVolume::Sphere { radius, .. } => {
                4.0 / 3.0 * std::f32::consts::PI * radius * radius * radius
            }
            BoundingVolume::Box { min, max } => {
                let d = max - min;
                d.x * d.y * d.z
            }
            BoundingVolume::Empty => 0.0,
            BoundingVolume::Infinite => f32::INFINITY,
        }
    }

    /// 用矩阵变换；球的半径按最大轴缩放放大，盒变换 8 个角后取外接盒。
    pub fn xform(&self, mat: &Mat4) -> Self {
        match *self {
            BoundingVolume::Sphere { center, radius } => {
                let scale = mat
                    .x_axis
                    .truncate()
                    .length()
                    .max(mat.y_axis.truncate().length())
                    .max(mat.z_axis.truncate().length());
                BoundingVolume::Sphere {
                    center: mat.transform_point3(center),
                    radius: radius * scale,
                }
            }
            BoundingVolume::Box { min, max } => {
                let pts = corners(min, max).map(|c| mat.transform_point3(c));
                let (lo, hi) = pts[1..]
                    .iter()
                    .fold((pts[0], pts[0]), |(lo, hi), &p| (lo.min(p), hi.max(p)));
                BoundingVolume::Box { min: lo, max: hi }
            }
            other => other,
        }
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        match *self {
            BoundingVolume::Sphere { center, radius } => center.distance_squared(p) <= radius * radius,
            BoundingVolume::Box { min, max } => p.cmpge(min).all() && p.cmple(max).all(),
            BoundingVolume::Infinite => true,
            BoundingVolume::Empty => false,
        }
    }

    /// 两个包围体是否可能相交（保守判断）。
    pub fn intersects(&self, other: &BoundingVolume) -> bool {
        use BoundingVolume::*;
        match (*self, *other) {
            (Empty, _) | (_, Empty) => false,
            (Infinite, _) | (_, Infinite) => true,
            (Sphere { center: c1, radius: r1 }, Sphere { center: c2, radius: r2 }) => {
                c1.distance_squared(c2) <= (r1 + r2) * (r1 + r2)
            }
            (Sphere { center, radius }, Box { min, max })
            | (Box { min, max }, Sphere { center, radius }) => {
                let nearest = center.clamp(min, max);
                nearest.distance_squared(center) <= radius * radius
            }
            (Box { min: a0, max: a1 }, Box { min: b0, max: b1 }) => {
                a0.cmple(b1).all() && b0.cmple(a1).all()
            }
        }
    }
}

fn corners(min: Vec3, max: Vec3) -> [Vec3; 8] {
    [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(min.x, max.y, max.z),
        Vec3::new(max.x, max.y, max.z),
    ]
}

fn smaller(a: BoundingVolume, b: BoundingVolume) -> BoundingVolume {
    if b.volume() < a.volume() {
        b
    } else {
        a
    }
}

impl fmt::Display for BoundingVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundingVolume::Empty => f.write_str("empty"),
            BoundingVolume::Infinite => f.write_str("infinite"),
            BoundingVolume::Sphere { center, radius } => write!(
                f,
                "bsphere, c ({} {} {}), r {}",
                center.x, center.y, center.z, radius
            ),
            BoundingVolume::Box { min, max } => write!(
                f,
                "bbox, ({} {} {}) to ({} {} {})",
                min.x, min.y, min.z, max.x, max.y, max.z
            ),
        }
    }
}
