use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use glam::Vec4;

use super::{CullFn, PandaNode};
use crate::cull::CullTraverserData;

#[derive(Debug, Clone, PartialEq)]
pub enum AttribValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Color(Vec4),
    Name(String),
}

/// 渲染属性，按 `slot` 区分种类（例如 "color"、"transparency"），同一 slot 在一个状态里只出现一次。
#[derive(Debug, Clone, PartialEq)]
pub struct RenderAttrib {
    slot: String,
    value: AttribValue,
}

impl RenderAttrib {
    pub fn new(slot: impl Into<String>, value: AttribValue) -> Arc<RenderAttrib> {
        Arc::new(RenderAttrib {
            slot: slot.into(),
            value,
        })
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn value(&self) -> &AttribValue {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    attrib: Arc<RenderAttrib>,
    override_: i32,
}

/// 一组渲染属性。和 [`TransformState`](super::TransformState) 一样不可变、共享。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderState {
    attribs: BTreeMap<String, Entry>,
}

impl RenderState {
    pub fn empty() -> Arc<RenderState> {
        static EMPTY: OnceLock<Arc<RenderState>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| Arc::new(RenderState::default())))
    }

    pub fn make(attrib: Arc<RenderAttrib>, override_: i32) -> Arc<RenderState> {
        RenderState::empty().add_attrib(attrib, override_)
    }

    pub fn is_empty(&self) -> bool {
        self.attribs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attribs.len()
    }

    /// 返回替换（或新增）了该 slot 的新状态。
    pub fn add_attrib(&self, attrib: Arc<RenderAttrib>, override_: i32) -> Arc<RenderState> {
        let mut next = self.clone();
        next.attribs
            .insert(attrib.slot.clone(), Entry { attrib, override_ });
        Arc::new(next)
    }

    pub fn remove_attrib(&self, slot: &str) -> Arc<RenderState> {
        let mut next = self.clone();
        next.attribs.remove(slot);
        if next.attribs.is_empty() {
            return RenderState::empty();
        }
        Arc::new(next)
    }

    pub fn get_attrib(&self, slot: &str) -> Option<&Arc<RenderAttrib>> {
        self.attribs.get(slot).map(|e| &e.attrib)
    }

    pub fn get_override(&self, slot: &str) -> Option<i32> {
        self.attribs.get(slot).map(|e| e.override_)
    }

    pub fn has_attrib(&self, slot: &str) -> bool {
        self.attribs.contains_key(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.attribs.keys().map(String::as_str)
    }

    /// 父状态 `self` 与子状态 `child` 合成：子节点的属性覆盖父节点，
    /// 除非父节点该 slot 的 override 更高。
    pub fn compose(self: &Arc<Self>, child: &Arc<RenderState>) -> Arc<RenderState> {
        if child.is_empty() {
            return Arc::clone(self);
        }
        if self.is_empty() {
            return Arc::clone(child);
        }
        let mut next = (**self).clone();
        for (slot, entry) in &child.attribs {
            match next.attribs.get(slot) {
                Some(parent) if parent.override_ > entry.override_ => {}
                _ => {
                    next.attribs.insert(slot.clone(), entry.clone());
                }
            }
        }
        Arc::new(next)
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("S:")?;
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        f.write_str("(")?;
        for (i, slot) in self.attribs.keys().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(slot)?;
        }
        f.write_str(")")
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// 挂在节点上的特效。带 cull 回调的特效在 cull 阶段先于节点种类自己的回调执行。
#[derive(Clone)]
pub struct RenderEffect {
    name: String,
    cull: Option<Arc<CullFn>>,
}

impl RenderEffect {
    pub fn new(name: impl Into<String>) -> Arc<RenderEffect> {
        Arc::new(RenderEffect {
            name: name.into(),
            cull: None,
        })
    }

    /// 回调返回 false 时剪掉该节点及其子树。
    pub fn with_cull_callback(
        name: impl Into<String>,
        callback: impl Fn(&PandaNode, &mut CullTraverserData) -> bool + Send + Sync + 'static,
    ) -> Arc<RenderEffect> {
        Arc::new(RenderEffect {
            name: name.into(),
            cull: Some(Arc::new(callback)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_cull_callback(&self) -> bool {
        self.cull.is_some()
    }

    pub fn cull_callback(&self, node: &PandaNode, data: &mut CullTraverserData) -> bool {
        match &self.cull {
            Some(callback) => callback(node, data),
            None => true,
        }
    }
}

// 回调按身份比较
impl PartialEq for RenderEffect {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && match (&self.cull, &other.cull) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl Eq for RenderEffect {}

impl fmt::Debug for RenderEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderEffect")
            .field("name", &self.name)
            .field("cull_callback", &self.cull.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderEffects {
    effects: BTreeMap<String, Arc<RenderEffect>>,
}

impl RenderEffects {
    pub fn empty() -> Arc<RenderEffects> {
        static EMPTY: OnceLock<Arc<RenderEffects>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| Arc::new(RenderEffects::default())))
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn add_effect(&self, effect: Arc<RenderEffect>) -> Arc<RenderEffects> {
        let mut next = self.clone();
        next.effects.insert(effect.name.clone(), effect);
        Arc::new(next)
    }

    pub fn remove_effect(&self, name: &str) -> Arc<RenderEffects> {
        let mut next = self.clone();
        next.effects.remove(name);
        Arc::new(next)
    }

    pub fn get_effect(&self, name: &str) -> Option<&Arc<RenderEffect>> {
        self.effects.get(name)
    }

    pub fn has_effect(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    pub fn has_cull_callback(&self) -> bool {
        self.effects.values().any(|e| e.has_cull_callback())
    }

    /// 带 cull 回调的特效，按名字顺序。
    pub fn cull_effects(&self) -> impl Iterator<Item = &Arc<RenderEffect>> + '_ {
        self.effects.values().filter(|e| e.has_cull_callback())
    }
}

impl fmt::Display for RenderEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("E:(")?;
        for (i, name) in self.effects.keys().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(name)?;
        }
        f.write_str(")")
    }
}
