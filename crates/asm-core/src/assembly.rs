//! Assembly state: the instance set plus the snap-edge forest
//!
//! The state is an explicit value passed to the resolver and exporter, not a
//! shared table. Each user action mutates it through the operations below;
//! `snapshot` freezes it for one export pass.

use std::sync::Arc;

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use urdf_model::Description;

use crate::instance::{Instance, WorldTransform};

/// Relative transform frozen into a snap edge at creation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapTransform {
    pub translation: DVec3,
    pub rotation: DQuat,
}

impl Default for SnapTransform {
    fn default() -> Self {
        Self {
            translation: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
        }
    }
}

impl SnapTransform {
    /// An identity transform defers entirely to the measured pose delta
    pub fn is_identity(&self) -> bool {
        self.translation.x.abs() < 1e-12
            && self.translation.y.abs() < 1e-12
            && self.translation.z.abs() < 1e-12
            && self.rotation.x.abs() < 1e-12
            && self.rotation.y.abs() < 1e-12
            && self.rotation.z.abs() < 1e-12
            && (self.rotation.w - 1.0).abs() < 1e-12
    }
}

/// A snap joint between two instances
///
/// `None` for a link means "that instance's root link". The joint kind is
/// always fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentEdge {
    pub name: String,
    pub parent_instance: Uuid,
    pub parent_link: Option<String>,
    pub child_instance: Uuid,
    pub child_link: Option<String>,
    pub relative: SnapTransform,
}

/// Mutable assembly under edit
#[derive(Debug, Clone, Default)]
pub struct AssemblyState {
    instances: Vec<Instance>,
    edges: Vec<AttachmentEdge>,
    next_label: u64,
}

/// Frozen view of the assembly for one resolve/export pass
///
/// Instances stay in insertion order so repeated exports of an unchanged
/// assembly are byte-identical.
#[derive(Debug, Clone)]
pub struct AssemblySnapshot {
    pub instances: Vec<Instance>,
    pub edges: Vec<AttachmentEdge>,
}

impl AssemblySnapshot {
    pub fn instance(&self, id: Uuid) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// The incoming snap edge of an instance, if any
    pub fn incoming_edge(&self, child: Uuid) -> Option<&AttachmentEdge> {
        self.edges.iter().find(|e| e.child_instance == child)
    }
}

impl AssemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn edges(&self) -> &[AttachmentEdge] {
        &self.edges
    }

    pub fn instance(&self, id: Uuid) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instance_mut(&mut self, id: Uuid) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Place a loaded description in the scene
    pub fn add_instance(&mut self, description: Arc<Description>, world: WorldTransform) -> Uuid {
        let label = format!("inst_{}", self.next_label);
        self.next_label += 1;
        let instance = Instance::new(label, description, world);
        let id = instance.id;
        self.instances.push(instance);
        id
    }

    /// Remove an instance. Edges touching it are dropped; formerly attached
    /// children keep their own pose and children (no cascade).
    pub fn remove_instance(&mut self, id: Uuid) -> Result<Instance, AssemblyError> {
        let idx = self
            .instances
            .iter()
            .position(|i| i.id == id)
            .ok_or(AssemblyError::InstanceNotFound(id))?;
        self.edges
            .retain(|e| e.parent_instance != id && e.child_instance != id);
        Ok(self.instances.remove(idx))
    }

    /// Snap `child` onto `parent`.
    ///
    /// The relative transform is frozen now; resolution happens at export.
    /// Attachments form a forest: a child may have at most one incoming edge
    /// and the parent chain may never loop back.
    pub fn attach(
        &mut self,
        parent: Uuid,
        parent_link: Option<&str>,
        child: Uuid,
        child_link: Option<&str>,
        relative: SnapTransform,
    ) -> Result<&AttachmentEdge, AssemblyError> {
        if parent == child {
            return Err(AssemblyError::SelfAttachment(parent));
        }
        let parent_label = self
            .instance(parent)
            .ok_or(AssemblyError::InstanceNotFound(parent))?
            .label
            .clone();
        let child_label = self
            .instance(child)
            .ok_or(AssemblyError::InstanceNotFound(child))?
            .label
            .clone();

        self.check_link(parent, parent_link)?;
        self.check_link(child, child_link)?;

        if self.edges.iter().any(|e| e.child_instance == child) {
            return Err(AssemblyError::AlreadyAttached(child));
        }
        if self.would_create_cycle(parent, child) {
            return Err(AssemblyError::WouldCreateCycle);
        }

        self.edges.push(AttachmentEdge {
            name: format!("snap_{parent_label}_to_{child_label}"),
            parent_instance: parent,
            parent_link: parent_link.map(str::to_string),
            child_instance: child,
            child_link: child_link.map(str::to_string),
            relative,
        });
        Ok(self.edges.last().expect("edge just pushed"))
    }

    /// Remove the incoming snap edge of `child`
    pub fn detach(&mut self, child: Uuid) -> Result<AttachmentEdge, AssemblyError> {
        let idx = self
            .edges
            .iter()
            .position(|e| e.child_instance == child)
            .ok_or(AssemblyError::NotAttached(child))?;
        Ok(self.edges.remove(idx))
    }

    pub fn set_joint_value(
        &mut self,
        id: Uuid,
        joint: &str,
        value: f64,
    ) -> Result<(), AssemblyError> {
        self.instance_mut(id)
            .ok_or(AssemblyError::InstanceNotFound(id))?
            .set_joint_value(joint, value)
    }

    pub fn set_world_pose(&mut self, id: Uuid, world: WorldTransform) -> Result<(), AssemblyError> {
        self.instance_mut(id)
            .ok_or(AssemblyError::InstanceNotFound(id))?
            .set_world_pose(world);
        Ok(())
    }

    /// The incoming snap edge of an instance, if any
    pub fn incoming_edge(&self, child: Uuid) -> Option<&AttachmentEdge> {
        self.edges.iter().find(|e| e.child_instance == child)
    }

    /// Freeze the current state for one export pass
    pub fn snapshot(&self) -> AssemblySnapshot {
        AssemblySnapshot {
            instances: self.instances.clone(),
            edges: self.edges.clone(),
        }
    }

    fn check_link(&self, id: Uuid, link: Option<&str>) -> Result<(), AssemblyError> {
        if let Some(link) = link {
            let instance = self
                .instance(id)
                .ok_or(AssemblyError::InstanceNotFound(id))?;
            if !instance.description.contains_link(link) {
                return Err(AssemblyError::LinkNotFound {
                    instance: id,
                    link: link.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check if attaching child under parent would loop the parent chain
    fn would_create_cycle(&self, parent: Uuid, child: Uuid) -> bool {
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return true;
            }
            current = self.incoming_edge(id).map(|e| e.parent_instance);
        }
        false
    }
}

/// Assembly-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssemblyError {
    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),
    #[error("instance {instance} has no link named '{link}'")]
    LinkNotFound { instance: Uuid, link: String },
    #[error("cannot attach an instance to itself: {0}")]
    SelfAttachment(Uuid),
    #[error("instance already has a parent attachment: {0}")]
    AlreadyAttached(Uuid),
    #[error("attachment would create a cycle")]
    WouldCreateCycle,
    #[error("instance is not attached: {0}")]
    NotAttached(Uuid),
    #[error("joint not found: {0}")]
    JointNotFound(String),
    #[error("joint '{0}' is fixed and has no value")]
    FixedJoint(String),
}
