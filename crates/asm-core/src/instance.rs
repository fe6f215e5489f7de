//! Instance kinematic model
//!
//! One loaded description placed in the scene, with runtime joint values and
//! a world pose. Forward kinematics stays within the instance; cross-instance
//! pose propagation lives in the resolver.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use glam::{DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use urdf_model::{Description, JointDescriptor, JointKind};

use crate::assembly::AssemblyError;

/// World pose of an instance root: translation, rotation and per-axis scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldTransform {
    pub translation: DVec3,
    pub rotation: DQuat,
    pub scale: DVec3,
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self {
            translation: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            scale: DVec3::ONE,
        }
    }
}

impl WorldTransform {
    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    /// Rigid part of the pose. Scale is deliberately excluded: it stretches
    /// internal joint-origin offsets, never the root frame itself.
    pub fn to_dmat4(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.rotation, self.translation)
    }
}

/// One placed description
///
/// Multiple instances may share the same `Description`.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: Uuid,
    /// Stable per-assembly prefix used to qualify emitted link/joint names
    pub label: String,
    pub description: Arc<Description>,
    pub world: WorldTransform,
    /// Current value per non-fixed internal joint; absent means zero
    pub joint_values: HashMap<String, f64>,
}

impl Instance {
    pub fn new(label: impl Into<String>, description: Arc<Description>, world: WorldTransform) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            description,
            world,
            joint_values: HashMap::new(),
        }
    }

    /// Assembly-wide unique name for a link or joint of this instance
    pub fn qualified(&self, name: &str) -> String {
        format!("{}__{}", self.label, name)
    }

    pub fn set_world_pose(&mut self, world: WorldTransform) {
        self.world = world;
    }

    /// Set the current value of a non-fixed internal joint, clamped into the
    /// declared limit when one exists.
    pub fn set_joint_value(&mut self, name: &str, value: f64) -> Result<(), AssemblyError> {
        let joint = self
            .description
            .find_joint(name)
            .ok_or_else(|| AssemblyError::JointNotFound(name.to_string()))?;
        if joint.kind == JointKind::Fixed {
            return Err(AssemblyError::FixedJoint(name.to_string()));
        }
        let value = match joint.limit {
            Some(limit) => value.clamp(limit.lower, limit.upper),
            None => value,
        };
        self.joint_values.insert(name.to_string(), value);
        Ok(())
    }

    /// Home every joint back to zero
    pub fn reset_joint_values(&mut self) {
        self.joint_values.clear();
    }

    /// World pose of one link at the current joint values
    pub fn world_pose_of(&self, link: &str) -> Option<DMat4> {
        self.link_world_map().remove(link)
    }

    /// Compute the world pose of every link from the instance's own world
    /// pose. See [`Instance::link_world_map_from`].
    pub fn link_world_map(&self) -> HashMap<String, DMat4> {
        self.link_world_map_from(self.world.to_dmat4())
    }

    /// Compute the world pose of every link, anchoring the root link at
    /// `root_world`.
    ///
    /// Walks an undirected adjacency over the internal joints so a root link
    /// that sits mid-tree still reaches everything: descending through a
    /// joint applies `origin · motion(value)`, ascending applies its inverse.
    /// The underlying graph is a tree, so visitation order cannot change the
    /// result. Joints naming a missing link are skipped with a warning, and
    /// links never reached default to the root's pose.
    pub fn link_world_map_from(&self, root_world: DMat4) -> HashMap<String, DMat4> {
        let desc = &self.description;
        let mut map = HashMap::with_capacity(desc.links.len());
        let Some(root) = desc.root_link_name() else {
            return map;
        };

        // joint index + direction (true = parent -> child)
        let mut adjacency: HashMap<&str, Vec<(usize, bool)>> = HashMap::new();
        for (idx, joint) in desc.joints.iter().enumerate() {
            if !desc.contains_link(&joint.parent) || !desc.contains_link(&joint.child) {
                warn!(
                    instance = %self.label,
                    joint = %joint.name,
                    "joint references a missing link, skipping"
                );
                continue;
            }
            adjacency.entry(joint.parent.as_str()).or_default().push((idx, true));
            adjacency.entry(joint.child.as_str()).or_default().push((idx, false));
        }

        map.insert(root.to_string(), root_world);
        let mut visited: HashSet<&str> = HashSet::from([root]);
        let mut queue: VecDeque<&str> = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            let current_world = map[current];
            for &(idx, down) in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                let joint = &desc.joints[idx];
                let next = if down {
                    joint.child.as_str()
                } else {
                    joint.parent.as_str()
                };
                if !visited.insert(next) {
                    continue;
                }
                let step = self.joint_step(joint);
                let world = if down {
                    current_world * step
                } else {
                    current_world * step.inverse()
                };
                map.insert(next.to_string(), world);
                queue.push_back(next);
            }
        }

        for link in &desc.links {
            map.entry(link.name.clone()).or_insert(root_world);
        }
        map
    }

    /// Parent-to-child transform of one internal joint at its current value
    fn joint_step(&self, joint: &JointDescriptor) -> DMat4 {
        let origin = joint.origin.to_dmat4_scaled(self.world.scale);
        origin * joint_motion(joint, self.joint_value(&joint.name))
    }

    pub fn joint_value(&self, name: &str) -> f64 {
        self.joint_values.get(name).copied().unwrap_or(0.0)
    }
}

/// Motion transform of a joint at `value`
fn joint_motion(joint: &JointDescriptor, value: f64) -> DMat4 {
    match joint.kind {
        JointKind::Fixed => DMat4::IDENTITY,
        JointKind::Revolute | JointKind::Continuous => {
            DMat4::from_quat(DQuat::from_axis_angle(unit_axis(joint.axis), value))
        }
        JointKind::Prismatic => DMat4::from_translation(unit_axis(joint.axis) * value),
    }
}

/// Unit axis with the documented [1,0,0] fallback for degenerate input
fn unit_axis(axis: DVec3) -> DVec3 {
    let len = axis.length();
    if len < 1e-12 { DVec3::X } else { axis / len }
}
