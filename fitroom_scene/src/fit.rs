//! Garment fitting policy: the bone-name matching ladder used for skeleton
//! binds, and the bounding-box scale/translate fallback. The ladder is an
//! explicit ordered rule list (exact match, then anatomical synonyms, then an
//! unmatched placeholder) so each rung is testable on its own.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use glam::{Quat, Vec3};
use serde::Deserialize;

use crate::bounds::Aabb;
use crate::graph::NodeId;

/// Garment-bone substring paired with the avatar-bone substring it may stand
/// in for. Checked in order after exact name matches fail.
pub const BONE_SYNONYMS: &[(&str, &str)] = &[
    ("chest", "spine"),
    ("shoulder", "clavicle"),
    ("arm", "arm"),
    ("leg", "thigh"),
];

/// Tunable fitting constants. The source application shipped with several
/// inconsistent values of these (0.63 vs 0.7 scale, stray vertical offsets, a
/// half-turn on some garments), so they are configuration rather than fixed
/// laws.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Multiplier on the avatar/garment bounding-size ratio.
    pub scale_factor: f32,
    /// Extra world-space lift applied after centering.
    pub vertical_offset: f32,
    /// Rotate the garment half a turn around Y before fitting.
    pub half_turn: bool,
    /// Minimum fraction of garment bones that must find an avatar bone for a
    /// skeleton bind to be kept; below it the bounding-box fallback wins.
    pub bind_confidence_min: f32,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            scale_factor: 0.63,
            vertical_offset: 0.0,
            half_turn: false,
            bind_confidence_min: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoneMatch {
    /// Avatar bone with the identical name.
    Exact(NodeId),
    /// Avatar bone found through the synonym table.
    Synonym(NodeId),
    /// No avatar counterpart; the garment keeps its own bone.
    Placeholder,
}

impl BoneMatch {
    pub fn is_matched(&self) -> bool {
        !matches!(self, BoneMatch::Placeholder)
    }
}

/// Outcome of matching a whole garment skeleton against the avatar's bones.
#[derive(Debug, Clone)]
pub struct BoneMapping {
    pub matches: Vec<BoneMatch>,
    /// Fraction of garment bones that found an avatar bone.
    pub confidence: f32,
}

pub fn match_bone(name: &str, avatar_bones: &BTreeMap<String, NodeId>) -> BoneMatch {
    if let Some(id) = avatar_bones.get(name) {
        return BoneMatch::Exact(*id);
    }
    let lowered = name.to_lowercase();
    for (garment_key, avatar_key) in BONE_SYNONYMS {
        if !lowered.contains(garment_key) {
            continue;
        }
        for (candidate, id) in avatar_bones {
            if candidate.to_lowercase().contains(avatar_key) {
                return BoneMatch::Synonym(*id);
            }
        }
    }
    BoneMatch::Placeholder
}

pub fn match_bones(names: &[String], avatar_bones: &BTreeMap<String, NodeId>) -> BoneMapping {
    let matches: Vec<BoneMatch> = names
        .iter()
        .map(|name| match_bone(name, avatar_bones))
        .collect();
    let matched = matches.iter().filter(|m| m.is_matched()).count();
    let confidence = if matches.is_empty() {
        0.0
    } else {
        matched as f32 / matches.len() as f32
    };
    BoneMapping {
        matches,
        confidence,
    }
}

/// Scale and translation applied to the garment root at install time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    pub scale: f32,
    pub rotation: Quat,
    pub translation: Vec3,
}

/// Bounding-box fallback: uniform scale from the size ratio, then align the
/// garment's (transformed) box center onto the avatar's. Returns `None` for a
/// degenerate garment box.
pub fn fallback_fit(avatar: &Aabb, garment: &Aabb, params: &FitParams) -> Option<FitTransform> {
    let garment_length = garment.size().length();
    if garment_length <= f32::EPSILON {
        return None;
    }
    let scale = avatar.size().length() / garment_length * params.scale_factor;
    let rotation = if params.half_turn {
        Quat::from_rotation_y(PI)
    } else {
        Quat::IDENTITY
    };
    let fitted_center = rotation * garment.center() * scale;
    let translation =
        avatar.center() - fitted_center + Vec3::new(0.0, params.vertical_offset, 0.0);
    Some(FitTransform {
        scale,
        rotation,
        translation,
    })
}
