//! Attachment resolver
//!
//! Consumes a frozen assembly snapshot and produces a globally consistent
//! pose map: placeholder attach links resolved to real geometry, one joint
//! origin per valid snap edge, and child instances rebased so the resolved
//! attach link lands exactly where the edge dictates.

use std::collections::{HashMap, HashSet, VecDeque};

use glam::DMat4;
use tracing::warn;
use uuid::Uuid;

use urdf_model::canonicalize_quat;

use crate::assembly::{AssemblySnapshot, AttachmentEdge};
use crate::instance::Instance;

/// A snap edge that survived resolution, with its computed joint origin
#[derive(Debug, Clone)]
pub struct ResolvedSnapJoint {
    pub name: String,
    pub parent_instance: Uuid,
    /// Resolved (unqualified) parent link name
    pub parent_link: String,
    pub child_instance: Uuid,
    /// Resolved (unqualified) child link name
    pub child_link: String,
    pub origin: DMat4,
}

/// Diagnostic for an edge dropped during resolution
#[derive(Debug, Clone)]
pub struct SkippedEdge {
    pub name: String,
    pub reason: String,
}

/// Output of one resolution pass over a snapshot
#[derive(Debug, Clone, Default)]
pub struct ResolvedAssembly {
    /// Per instance: world pose of every link
    pub link_world: HashMap<Uuid, HashMap<String, DMat4>>,
    pub snap_joints: Vec<ResolvedSnapJoint>,
    /// True when at least one edge was dropped as invalid
    pub had_invalid_attachment: bool,
    pub skipped: Vec<SkippedEdge>,
}

impl ResolvedAssembly {
    /// World pose of one link, falling back to the instance root pose
    pub fn link_pose(&self, instance: &Instance, link: &str) -> Option<DMat4> {
        let map = self.link_world.get(&instance.id)?;
        map.get(link)
            .or_else(|| instance.description.root_link_name().and_then(|r| map.get(r)))
            .copied()
    }
}

/// Resolve a snapshot into a consistent assembly-wide pose map.
///
/// Instances with no incoming edge seed the traversal; when every instance
/// has one (malformed input) all of them do, which still yields a forest.
/// Each edge is processed at most once.
pub fn resolve(snapshot: &AssemblySnapshot) -> ResolvedAssembly {
    let mut resolved = ResolvedAssembly::default();

    for instance in &snapshot.instances {
        resolved
            .link_world
            .insert(instance.id, instance.link_world_map());
    }

    let mut edges_by_parent: HashMap<Uuid, Vec<&AttachmentEdge>> = HashMap::new();
    for edge in &snapshot.edges {
        edges_by_parent
            .entry(edge.parent_instance)
            .or_default()
            .push(edge);
    }

    let mut roots: Vec<Uuid> = snapshot
        .instances
        .iter()
        .filter(|i| snapshot.incoming_edge(i.id).is_none())
        .map(|i| i.id)
        .collect();
    if roots.is_empty() {
        roots = snapshot.instances.iter().map(|i| i.id).collect();
    }

    let mut queue: VecDeque<Uuid> = roots.iter().copied().collect();
    let mut queued: HashSet<Uuid> = roots.into_iter().collect();
    let mut processed: HashSet<(Uuid, String, Uuid, String, String)> = HashSet::new();

    while let Some(parent_id) = queue.pop_front() {
        for edge in edges_by_parent.get(&parent_id).map(Vec::as_slice).unwrap_or(&[]) {
            let key = (
                edge.parent_instance,
                edge.parent_link.clone().unwrap_or_default(),
                edge.child_instance,
                edge.child_link.clone().unwrap_or_default(),
                edge.name.clone(),
            );
            if !processed.insert(key) {
                continue;
            }
            if edge.parent_instance == edge.child_instance {
                continue;
            }
            let (Some(parent), Some(child)) = (
                snapshot.instance(edge.parent_instance),
                snapshot.instance(edge.child_instance),
            ) else {
                continue;
            };

            let parent_link = resolve_attach_link(parent, edge.parent_link.as_deref());
            let child_link = resolve_attach_link(child, edge.child_link.as_deref());

            // Two non-root endpoints would stack two attachment offsets with
            // no unique answer for the child root pose.
            let parent_is_offset = Some(parent_link.as_str()) != parent.description.root_link_name();
            let child_is_offset = Some(child_link.as_str()) != child.description.root_link_name();
            if parent_is_offset && child_is_offset {
                warn!(edge = %edge.name, "both endpoints resolved off-root, skipping snap edge");
                resolved.had_invalid_attachment = true;
                resolved.skipped.push(SkippedEdge {
                    name: edge.name.clone(),
                    reason: format!(
                        "both endpoints resolved to non-root links ('{parent_link}' and '{child_link}')"
                    ),
                });
                continue;
            }

            let Some(parent_world) = resolved.link_pose(parent, &parent_link) else {
                continue;
            };
            let Some(child_world) = resolved.link_pose(child, &child_link) else {
                continue;
            };

            // Nominal origin is the measured delta at snap time. An explicit
            // relative rotation overrides the orientation only; translation
            // always stays measured.
            let measured = parent_world.inverse() * child_world;
            let origin = if edge.relative.is_identity() {
                measured
            } else {
                DMat4::from_rotation_translation(
                    canonicalize_quat(edge.relative.rotation),
                    measured.w_axis.truncate(),
                )
            };

            rebase_child(&mut resolved, child, &child_link, parent_world * origin);

            resolved.snap_joints.push(ResolvedSnapJoint {
                name: edge.name.clone(),
                parent_instance: parent.id,
                parent_link,
                child_instance: child.id,
                child_link,
                origin,
            });

            if queued.insert(child.id) {
                queue.push_back(child.id);
            }
        }
    }

    resolved
}

/// Move a child instance so its resolved attach link lands exactly at
/// `attach_world`, rigidly carrying every other link with it.
fn rebase_child(
    resolved: &mut ResolvedAssembly,
    child: &Instance,
    attach_link: &str,
    attach_world: DMat4,
) {
    let Some(root) = child.description.root_link_name() else {
        return;
    };
    let new_root_world = match resolved.link_world.get(&child.id) {
        Some(map) => match (map.get(root), map.get(attach_link)) {
            (Some(old_root), Some(old_attach)) => {
                let root_to_attach = old_root.inverse() * *old_attach;
                attach_world * root_to_attach.inverse()
            }
            _ => attach_world,
        },
        None => attach_world,
    };
    resolved
        .link_world
        .insert(child.id, child.link_world_map_from(new_root_world));
}

/// Resolve the link named by one side of a snap edge.
///
/// `None` means the instance root. A placeholder resolves to the nearest
/// link with real geometry by breadth-first search outward through the
/// internal joint tree, parent direction first; the visited set guarantees
/// termination even on malformed graphs. Unknown names and unreachable
/// placeholders fall back to the instance root link.
pub fn resolve_attach_link(instance: &Instance, target: Option<&str>) -> String {
    let desc = &instance.description;
    let root = desc.root_link_name().unwrap_or_default().to_string();
    let Some(target) = target else {
        return root;
    };
    let Some(link) = desc.find_link(target) else {
        warn!(instance = %instance.label, link = target, "unknown attach link, using root");
        return root;
    };
    if !link.is_placeholder() {
        return target.to_string();
    }

    let mut visited: HashSet<&str> = HashSet::from([target]);
    let mut queue: VecDeque<&str> = VecDeque::from([target]);
    while let Some(current) = queue.pop_front() {
        let mut neighbors: Vec<&str> = Vec::new();
        if let Some(joint) = desc.parent_joint_of(current) {
            neighbors.push(joint.parent.as_str());
        }
        neighbors.extend(desc.child_joints_of(current).map(|j| j.child.as_str()));

        for next in neighbors {
            if !visited.insert(next) {
                continue;
            }
            match desc.find_link(next) {
                Some(l) if !l.is_placeholder() => return next.to_string(),
                Some(_) => queue.push_back(next),
                None => {}
            }
        }
    }

    warn!(
        instance = %instance.label,
        link = target,
        "placeholder reaches no real geometry, using root"
    );
    root
}
