use std::fmt;
use std::sync::{Arc, OnceLock};

use glam::{EulerRot, Mat4, Quat, Vec3};

/// 节点相对父节点的变换。创建后不可变，通过 `Arc` 在节点、stage 之间共享。
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    mat: Mat4,
    identity: bool,
}

impl TransformState {
    pub fn identity() -> Arc<TransformState> {
        static IDENTITY: OnceLock<Arc<TransformState>> = OnceLock::new();
        Arc::clone(IDENTITY.get_or_init(|| {
            Arc::new(TransformState {
                mat: Mat4::IDENTITY,
                identity: true,
            })
        }))
    }

    pub fn make_mat(mat: Mat4) -> Arc<TransformState> {
        if mat == Mat4::IDENTITY {
            return Self::identity();
        }
        Arc::new(TransformState {
            mat,
            identity: false,
        })
    }

    pub fn make_pos(pos: Vec3) -> Arc<TransformState> {
        Self::make_mat(Mat4::from_translation(pos))
    }

    pub fn make_scale(scale: Vec3) -> Arc<TransformState> {
        Self::make_mat(Mat4::from_scale(scale))
    }

    /// `hpr` 以角度给出：heading 绕 Z（向上）轴，pitch 绕 X 轴，roll 绕 Y 轴。
    pub fn make_pos_hpr_scale(pos: Vec3, hpr: Vec3, scale: Vec3) -> Arc<TransformState> {
        let rot = Quat::from_euler(
            EulerRot::ZXY,
            hpr.x.to_radians(),
            hpr.y.to_radians(),
            hpr.z.to_radians(),
        );
        Self::make_mat(Mat4::from_scale_rotation_translation(scale, rot, pos))
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn get_mat(&self) -> Mat4 {
        self.mat
    }

    pub fn get_pos(&self) -> Vec3 {
        self.mat.w_axis.truncate()
    }

    pub fn get_scale(&self) -> Vec3 {
        let (scale, _, _) = self.mat.to_scale_rotation_translation();
        scale
    }

    /// `self * other`：先应用 `other`（子节点），再应用 `self`（父节点）。
    pub fn compose(self: &Arc<Self>, other: &Arc<TransformState>) -> Arc<TransformState> {
        if other.identity {
            return Arc::clone(self);
        }
        if self.identity {
            return Arc::clone(other);
        }
        Self::make_mat(self.mat * other.mat)
    }

    /// 奇异矩阵没有逆，返回 `None`。
    pub fn invert(&self) -> Option<Arc<TransformState>> {
        if self.identity {
            return Some(Self::identity());
        }
        if self.mat.determinant().abs() <= f32::EPSILON {
            return None;
        }
        Some(Self::make_mat(self.mat.inverse()))
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.mat.transform_point3(p)
    }
}

impl fmt::Display for TransformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identity {
            return f.write_str("T:(identity)");
        }
        let (scale, rot, pos) = self.mat.to_scale_rotation_translation();
        write!(f, "T:(pos {} {} {}", pos.x, pos.y, pos.z)?;
        if rot != Quat::IDENTITY {
            write!(f, " quat {} {} {} {}", rot.w, rot.x, rot.y, rot.z)?;
        }
        if scale != Vec3::ONE {
            write!(f, " scale {} {} {}", scale.x, scale.y, scale.z)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_is_shared() {
        let a = TransformState::identity();
        let b = TransformState::make_mat(Mat4::IDENTITY);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_identity());
    }

    #[test]
    fn compose_applies_child_first() {
        let parent = TransformState::make_scale(Vec3::splat(2.0));
        let child = TransformState::make_pos(Vec3::new(1.0, 0.0, 0.0));
        let net = parent.compose(&child);
        assert_eq!(net.get_pos(), Vec3::new(2.0, 0.0, 0.0));

        let id = TransformState::identity();
        assert!(Arc::ptr_eq(&id.compose(&child), &child));
    }

    #[test]
    fn invert_round_trip() {
        let t = TransformState::make_pos(Vec3::new(1.0, 2.0, 3.0));
        let inv = t.invert().unwrap();
        assert!(t.compose(&inv).get_mat().abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert!(TransformState::make_scale(Vec3::ZERO).invert().is_none());
    }

    #[test]
    fn heading_turns_about_up_axis() {
        let t = TransformState::make_pos_hpr_scale(Vec3::ZERO, Vec3::new(90.0, 0.0, 0.0), Vec3::ONE);
        let p = t.transform_point(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::Y, 1e-5), "{p:?}");
    }
}
