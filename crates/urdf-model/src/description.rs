//! Typed model for one kinematic description

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::pose::Pose;

/// Joint kind
///
/// Closed set so motion application and axis handling are exhaustively
/// checked; anything else in the input is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JointKind {
    #[default]
    Fixed,
    Revolute,
    Continuous,
    Prismatic,
}

impl JointKind {
    /// Check if this joint kind has an axis
    pub fn has_axis(&self) -> bool {
        matches!(
            self,
            JointKind::Revolute | JointKind::Continuous | JointKind::Prismatic
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JointKind::Fixed => "fixed",
            JointKind::Revolute => "revolute",
            JointKind::Continuous => "continuous",
            JointKind::Prismatic => "prismatic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(JointKind::Fixed),
            "revolute" => Some(JointKind::Revolute),
            "continuous" => Some(JointKind::Continuous),
            "prismatic" => Some(JointKind::Prismatic),
            _ => None,
        }
    }
}

/// Mesh reference on a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRef {
    pub filename: String,
    /// Non-uniform scale; None means the declared-scale default applies
    pub scale: Option<[f64; 3]>,
}

/// A link in a description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub name: String,
    /// Derived from the presence of a <visual> child element
    pub has_visual: bool,
    /// Derived from the presence of a <collision> child element
    pub has_collision: bool,
    pub visual_origin: Pose,
    pub meshes: Vec<MeshRef>,
}

impl LinkDescriptor {
    /// Create a bare attachment-point link
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_visual: false,
            has_collision: false,
            visual_origin: Pose::default(),
            meshes: Vec::new(),
        }
    }

    /// A link with neither visual nor collision geometry is attachment-only
    pub fn is_placeholder(&self) -> bool {
        !self.has_visual && !self.has_collision
    }
}

/// Position limit of a joint (radians or meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub lower: f64,
    pub upper: f64,
}

/// A joint connecting two links within one description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointDescriptor {
    pub name: String,
    pub kind: JointKind,
    /// Parent link name
    pub parent: String,
    /// Child link name
    pub child: String,
    /// Transform from parent link to joint origin
    pub origin: Pose,
    /// Unit joint axis (for revolute/continuous/prismatic)
    pub axis: DVec3,
    pub limit: Option<JointLimit>,
}

/// One parsed kinematic description: a named tree of links and joints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Description {
    pub name: String,
    pub links: Vec<LinkDescriptor>,
    pub joints: Vec<JointDescriptor>,
}

impl Description {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            joints: Vec::new(),
        }
    }

    /// The root link: the first link that is no joint's child.
    ///
    /// Falls back to the first declared link when every link has an
    /// incoming joint (malformed input; keeps traversal anchored).
    pub fn root_link_name(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| !self.joints.iter().any(|j| j.child == l.name))
            .or_else(|| self.links.first())
            .map(|l| l.name.as_str())
    }

    pub fn find_link(&self, name: &str) -> Option<&LinkDescriptor> {
        self.links.iter().find(|l| l.name == name)
    }

    pub fn find_joint(&self, name: &str) -> Option<&JointDescriptor> {
        self.joints.iter().find(|j| j.name == name)
    }

    pub fn contains_link(&self, name: &str) -> bool {
        self.find_link(name).is_some()
    }

    /// Joints whose child is `name` (at most one in a well-formed tree)
    pub fn parent_joint_of(&self, name: &str) -> Option<&JointDescriptor> {
        self.joints.iter().find(|j| j.child == name)
    }

    /// Joints whose parent is `name`
    pub fn child_joints_of<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a JointDescriptor> {
        self.joints.iter().filter(move |j| j.parent == name)
    }
}
