//! Merged description serialization
//!
//! Flattens a resolved assembly into one document: every real link under
//! qualified names, one fixed joint per snap edge, and the internal joints
//! re-expressed from the resolved world poses. Output is deterministic so
//! exporting an unchanged assembly twice yields identical bytes.

use std::collections::HashSet;

use urdf_model::{Pose, rotate_axis};

use crate::assembly::AssemblySnapshot;
use crate::instance::Instance;
use crate::resolver::{self, ResolvedAssembly, SkippedEdge};

/// Mass and inertia stamped on every exported link. Consumers that need real
/// dynamics are expected to post-process; geometry and kinematics are what
/// this tool guarantees.
const EXPORT_MASS: &str = "0.0001";
const EXPORT_INERTIA: &str = "1e-06";

/// Declared mesh scale used when a mesh carries none (millimeter assets)
const DEFAULT_MESH_SCALE: [f64; 3] = [0.001, 0.001, 0.001];

/// Result of one export pass
#[derive(Debug, Clone)]
pub struct UrdfExport {
    pub urdf: String,
    /// Mesh basenames referenced by the document, first-reference order
    pub mesh_files: Vec<String>,
    /// True when at least one snap edge was dropped as invalid
    pub had_invalid_attachment: bool,
    pub skipped: Vec<SkippedEdge>,
}

/// Export-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExportError {
    #[error("cannot export an empty assembly")]
    EmptyAssembly,
}

/// Serialize a snapshot into a single merged document.
///
/// Joints are homed to zero first so internal joint origins come out as
/// declared rather than at whatever pose the user left them in. Invalid
/// snap edges never abort the export; they are dropped and reported.
pub fn export_assembly(snapshot: &AssemblySnapshot) -> Result<UrdfExport, ExportError> {
    if snapshot.instances.is_empty() {
        return Err(ExportError::EmptyAssembly);
    }

    let mut homed = snapshot.clone();
    for instance in &mut homed.instances {
        instance.reset_joint_values();
    }
    let resolved = resolver::resolve(&homed);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\"?>\n");
    out.push_str("<robot name=\"robot_assembly\">\n\n");

    for instance in &homed.instances {
        write_links(&mut out, instance);
    }
    write_snap_joints(&mut out, &homed, &resolved);
    write_internal_joints(&mut out, &homed, &resolved);

    if resolved.had_invalid_attachment {
        out.push_str(
            "  <!-- ERROR: one or more invalid AP-to-child-child attachments were detected and skipped. -->\n",
        );
    }
    out.push_str("</robot>\n");

    Ok(UrdfExport {
        urdf: out,
        mesh_files: collect_mesh_files(&homed),
        had_invalid_attachment: resolved.had_invalid_attachment,
        skipped: resolved.skipped,
    })
}

/// Mesh basenames referenced by real links, deduplicated in first-reference
/// order. These are the files a consumer must ship next to the document.
fn collect_mesh_files(snapshot: &AssemblySnapshot) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for instance in &snapshot.instances {
        for link in &instance.description.links {
            if link.is_placeholder() {
                continue;
            }
            for mesh in &link.meshes {
                let name = mesh_basename(&mesh.filename);
                if seen.insert(name.to_string()) {
                    files.push(name.to_string());
                }
            }
        }
    }
    files
}

fn write_links(out: &mut String, instance: &Instance) {
    let scale = instance.world.scale;
    for link in &instance.description.links {
        if link.is_placeholder() {
            continue;
        }
        out.push_str(&format!("  <link name=\"{}\">\n", instance.qualified(&link.name)));
        out.push_str("    <inertial>\n");
        out.push_str("      <origin xyz=\"0 0 0\" rpy=\"0 0 0\"/>\n");
        out.push_str(&format!("      <mass value=\"{EXPORT_MASS}\"/>\n"));
        out.push_str(&format!(
            "      <inertia ixx=\"{EXPORT_INERTIA}\" iyy=\"{EXPORT_INERTIA}\" izz=\"{EXPORT_INERTIA}\" ixy=\"0\" iyz=\"0\" ixz=\"0\"/>\n"
        ));
        out.push_str("    </inertial>\n");

        if let Some(mesh) = link.meshes.first() {
            let origin_xyz = [
                link.visual_origin.xyz[0] * scale.x,
                link.visual_origin.xyz[1] * scale.y,
                link.visual_origin.xyz[2] * scale.z,
            ];
            let declared = mesh.scale.unwrap_or(DEFAULT_MESH_SCALE);
            let mesh_scale = [
                declared[0] * scale.x,
                declared[1] * scale.y,
                declared[2] * scale.z,
            ];
            let geometry = format!(
                "        <mesh filename=\"meshes/{}\" scale=\"{}\"/>\n",
                mesh_basename(&mesh.filename),
                fmt3(mesh_scale),
            );
            let origin = format!(
                "      <origin xyz=\"{}\" rpy=\"{}\"/>\n",
                fmt3(origin_xyz),
                fmt3(link.visual_origin.rpy),
            );
            if link.has_visual {
                out.push_str("    <visual>\n");
                out.push_str(&origin);
                out.push_str("      <geometry>\n");
                out.push_str(&geometry);
                out.push_str("      </geometry>\n");
                out.push_str("    </visual>\n");
            }
            if link.has_collision {
                out.push_str("    <collision>\n");
                out.push_str(&origin);
                out.push_str("      <geometry>\n");
                out.push_str(&geometry);
                out.push_str("      </geometry>\n");
                out.push_str("    </collision>\n");
            }
        }

        out.push_str("  </link>\n\n");
    }
}

fn write_snap_joints(out: &mut String, snapshot: &AssemblySnapshot, resolved: &ResolvedAssembly) {
    out.push_str("  <!-- Snap joints -->\n");
    for joint in &resolved.snap_joints {
        let (Some(parent), Some(child)) = (
            snapshot.instance(joint.parent_instance),
            snapshot.instance(joint.child_instance),
        ) else {
            continue;
        };
        // A resolved endpoint can still be a placeholder when the whole
        // instance carries no geometry; such a joint would dangle.
        let placeholder_endpoint = parent
            .description
            .find_link(&joint.parent_link)
            .is_none_or(|l| l.is_placeholder())
            || child
                .description
                .find_link(&joint.child_link)
                .is_none_or(|l| l.is_placeholder());
        if placeholder_endpoint {
            continue;
        }

        let pose = Pose::from_dmat4(&joint.origin).normalized_rpy();
        out.push_str(&format!("  <joint name=\"{}\" type=\"fixed\">\n", joint.name));
        out.push_str(&format!(
            "    <origin xyz=\"{}\" rpy=\"{}\"/>\n",
            fmt3(pose.xyz),
            fmt3(pose.rpy),
        ));
        out.push_str(&format!(
            "    <parent link=\"{}\"/>\n",
            parent.qualified(&joint.parent_link)
        ));
        out.push_str(&format!(
            "    <child link=\"{}\"/>\n",
            child.qualified(&joint.child_link)
        ));
        out.push_str("  </joint>\n\n");
    }
}

fn write_internal_joints(
    out: &mut String,
    snapshot: &AssemblySnapshot,
    resolved: &ResolvedAssembly,
) {
    out.push_str("  <!-- Internal joints -->\n");
    for instance in &snapshot.instances {
        let Some(map) = resolved.link_world.get(&instance.id) else {
            continue;
        };
        let desc = &instance.description;
        for joint in &desc.joints {
            let emitted = |name: &str| desc.find_link(name).is_some_and(|l| !l.is_placeholder());
            if !emitted(&joint.parent) || !emitted(&joint.child) {
                continue;
            }
            let (Some(parent_world), Some(child_world)) =
                (map.get(&joint.parent), map.get(&joint.child))
            else {
                continue;
            };
            // Re-derive the origin from resolved world poses; with joints
            // homed this equals the declared origin under instance scale.
            let origin = parent_world.inverse() * *child_world;
            let pose = Pose::from_dmat4(&origin).normalized_rpy();

            out.push_str(&format!(
                "  <joint name=\"{}\" type=\"{}\">\n",
                instance.qualified(&joint.name),
                joint.kind.as_str(),
            ));
            out.push_str(&format!(
                "    <origin xyz=\"{}\" rpy=\"{}\"/>\n",
                fmt3(pose.xyz),
                fmt3(pose.rpy),
            ));
            out.push_str(&format!(
                "    <parent link=\"{}\"/>\n",
                instance.qualified(&joint.parent)
            ));
            out.push_str(&format!(
                "    <child link=\"{}\"/>\n",
                instance.qualified(&joint.child)
            ));

            if joint.kind.has_axis() {
                let axis = rotate_axis(&origin, joint.axis);
                out.push_str(&format!(
                    "    <axis xyz=\"{}\"/>\n",
                    fmt3([axis.x, axis.y, axis.z]),
                ));
                if let Some(limit) = joint.limit {
                    out.push_str(&format!(
                        "    <limit upper=\"{}\" lower=\"{}\" effort=\"100\" velocity=\"100\"/>\n",
                        format_number(limit.upper),
                        format_number(limit.lower),
                    ));
                }
            }

            out.push_str("  </joint>\n\n");
        }
    }
}

/// Fixed six-decimal formatting; anything below 1e-12 in magnitude (and any
/// non-finite value) collapses to a clean zero so negative zeros and float
/// dust never reach the document.
pub fn format_number(v: f64) -> String {
    if !v.is_finite() || v.abs() < 1e-12 {
        "0.000000".to_string()
    } else {
        format!("{v:.6}")
    }
}

fn fmt3(v: [f64; 3]) -> String {
    format!(
        "{} {} {}",
        format_number(v[0]),
        format_number(v[1]),
        format_number(v[2])
    )
}

/// Final path component, tolerating both separator styles
fn mesh_basename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    use glam::DVec3;
    use urdf_model::{Description, parse_description};

    use crate::assembly::{AssemblyState, SnapTransform};
    use crate::instance::WorldTransform;

    fn bracket() -> Arc<Description> {
        Arc::new(
            parse_description(
                r#"<robot name="bracket">
                  <link name="base">
                    <visual>
                      <origin xyz="0.1 0 0"/>
                      <geometry><mesh filename="parts/base.stl"/></geometry>
                    </visual>
                    <collision><geometry><mesh filename="parts/base.stl"/></geometry></collision>
                  </link>
                  <link name="arm"><visual><geometry><mesh filename="arm.stl"/></geometry></visual></link>
                  <link name="AP1"/>
                  <joint name="base_to_arm" type="revolute">
                    <parent link="base"/><child link="arm"/>
                    <origin xyz="0 0 0.5"/><axis xyz="0 0 1"/>
                    <limit lower="-1.5" upper="1.5"/>
                  </joint>
                  <joint name="arm_to_ap1" type="fixed">
                    <parent link="arm"/><child link="AP1"/>
                    <origin xyz="0.2 0 0"/>
                  </joint>
                </robot>"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_empty_assembly_is_an_error() {
        let state = AssemblyState::new();
        assert!(matches!(
            export_assembly(&state.snapshot()),
            Err(ExportError::EmptyAssembly)
        ));
    }

    #[test]
    fn test_single_instance_document_shape() {
        let mut state = AssemblyState::new();
        state.add_instance(bracket(), WorldTransform::default());
        let export = export_assembly(&state.snapshot()).unwrap();
        let urdf = &export.urdf;

        assert!(urdf.starts_with("<?xml version=\"1.0\"?>\n<robot name=\"robot_assembly\">\n"));
        assert!(urdf.ends_with("</robot>\n"));
        assert!(urdf.contains("<link name=\"inst_0__base\">"));
        assert!(urdf.contains("<link name=\"inst_0__arm\">"));
        // Attachment-only links never reach the document.
        assert!(!urdf.contains("AP1"));
        assert!(urdf.contains("<mass value=\"0.0001\"/>"));
        assert!(urdf.contains(
            "<inertia ixx=\"1e-06\" iyy=\"1e-06\" izz=\"1e-06\" ixy=\"0\" iyz=\"0\" ixz=\"0\"/>"
        ));
        assert!(urdf.contains("<!-- Snap joints -->"));
        assert!(urdf.contains("<!-- Internal joints -->"));
        assert!(!urdf.contains("ERROR"));
    }

    #[test]
    fn test_mesh_reference_and_scale() {
        let mut state = AssemblyState::new();
        state.add_instance(bracket(), WorldTransform::default());
        let export = export_assembly(&state.snapshot()).unwrap();

        // Path stripped to basename, default millimeter scale applied.
        assert!(export.urdf.contains(
            "<mesh filename=\"meshes/base.stl\" scale=\"0.001000 0.001000 0.001000\"/>"
        ));
        // Visual origin carried through.
        assert!(export
            .urdf
            .contains("<origin xyz=\"0.100000 0.000000 0.000000\" rpy=\"0.000000 0.000000 0.000000\"/>"));
        assert_eq!(export.mesh_files, vec!["base.stl", "arm.stl"]);
    }

    #[test]
    fn test_instance_scale_multiplies_mesh_and_visual_origin() {
        let mut state = AssemblyState::new();
        let world = WorldTransform {
            translation: DVec3::ZERO,
            rotation: glam::DQuat::IDENTITY,
            scale: DVec3::new(2.0, 2.0, 2.0),
        };
        state.add_instance(bracket(), world);
        let export = export_assembly(&state.snapshot()).unwrap();

        assert!(export.urdf.contains("scale=\"0.002000 0.002000 0.002000\"/>"));
        assert!(export
            .urdf
            .contains("<origin xyz=\"0.200000 0.000000 0.000000\" rpy=\"0.000000 0.000000 0.000000\"/>"));
        // Internal joint origin stretched by the instance scale too.
        assert!(export
            .urdf
            .contains("<origin xyz=\"0.000000 0.000000 1.000000\" rpy=\"0.000000 0.000000 0.000000\"/>"));
    }

    #[test]
    fn test_internal_joint_axis_and_limit() {
        let mut state = AssemblyState::new();
        state.add_instance(bracket(), WorldTransform::default());
        let export = export_assembly(&state.snapshot()).unwrap();

        assert!(export.urdf.contains("<joint name=\"inst_0__base_to_arm\" type=\"revolute\">"));
        assert!(export.urdf.contains("<axis xyz=\"0.000000 0.000000 1.000000\"/>"));
        assert!(export
            .urdf
            .contains("<limit upper=\"1.500000\" lower=\"-1.500000\" effort=\"100\" velocity=\"100\"/>"));
        // Joints touching the attachment-only link are dropped entirely.
        assert!(!export.urdf.contains("arm_to_ap1"));
    }

    #[test]
    fn test_joints_homed_before_export() {
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        state.set_joint_value(a, "base_to_arm", 1.2).unwrap();
        let export = export_assembly(&state.snapshot()).unwrap();

        // Origin reflects the declared offset, not the posed one.
        assert!(export
            .urdf
            .contains("<origin xyz=\"0.000000 0.000000 0.500000\" rpy=\"0.000000 0.000000 0.000000\"/>"));
    }

    #[test]
    fn test_snap_joint_emission() {
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        let b = state.add_instance(
            bracket(),
            WorldTransform::from_translation(DVec3::new(2.0, 0.0, 0.0)),
        );
        state.attach(a, Some("AP1"), b, None, SnapTransform::default()).unwrap();
        let export = export_assembly(&state.snapshot()).unwrap();

        // AP1 resolves to the arm link; origin is the measured delta from the
        // arm at (0,0,0.5) to the second base at (2,0,0).
        assert!(export.urdf.contains("<joint name=\"snap_inst_0_to_inst_1\" type=\"fixed\">"));
        assert!(export.urdf.contains("<parent link=\"inst_0__arm\"/>"));
        assert!(export.urdf.contains("<child link=\"inst_1__base\"/>"));
        assert!(export
            .urdf
            .contains("<origin xyz=\"2.000000 0.000000 -0.500000\" rpy=\"0.000000 0.000000 0.000000\"/>"));
    }

    #[test]
    fn test_snap_to_geometryless_instance_dropped() {
        let empty = Arc::new(
            parse_description(
                r#"<robot name="frame">
                  <link name="a"/><link name="b"/>
                  <joint name="j" type="fixed"><parent link="a"/><child link="b"/></joint>
                </robot>"#,
            )
            .unwrap(),
        );
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        let b = state.add_instance(empty, WorldTransform::default());
        state.attach(a, None, b, None, SnapTransform::default()).unwrap();
        let export = export_assembly(&state.snapshot()).unwrap();

        assert!(!export.urdf.contains("snap_inst_0_to_inst_1"));
        assert!(!export.had_invalid_attachment);
    }

    #[test]
    fn test_invalid_attachment_flagged_in_document() {
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        let b = state.add_instance(bracket(), WorldTransform::default());
        state.attach(a, Some("AP1"), b, Some("arm"), SnapTransform::default()).unwrap();
        let export = export_assembly(&state.snapshot()).unwrap();

        assert!(export.had_invalid_attachment);
        assert_eq!(export.skipped.len(), 1);
        assert!(export.urdf.contains(
            "<!-- ERROR: one or more invalid AP-to-child-child attachments were detected and skipped. -->"
        ));
    }

    #[test]
    fn test_export_is_deterministic() {
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        let b = state.add_instance(
            bracket(),
            WorldTransform::from_translation(DVec3::new(1.0, 2.0, 3.0)),
        );
        state.set_joint_value(b, "base_to_arm", FRAC_PI_2).unwrap();
        state.attach(a, Some("AP1"), b, None, SnapTransform::default()).unwrap();

        let first = export_assembly(&state.snapshot()).unwrap();
        let second = export_assembly(&state.snapshot()).unwrap();
        assert_eq!(first.urdf, second.urdf);
        assert_eq!(first.mesh_files, second.mesh_files);
    }

    #[test]
    fn test_exported_document_parses_back() {
        let mut state = AssemblyState::new();
        let a = state.add_instance(bracket(), WorldTransform::default());
        let b = state.add_instance(
            bracket(),
            WorldTransform::from_translation(DVec3::new(0.0, 1.0, 0.0)),
        );
        state.attach(a, Some("AP1"), b, None, SnapTransform::default()).unwrap();

        let export = export_assembly(&state.snapshot()).unwrap();
        let merged = parse_description(&export.urdf).unwrap();

        assert_eq!(merged.name, "robot_assembly");
        // Two instances, two real links each, one snap joint plus one
        // internal joint per instance.
        assert_eq!(merged.links.len(), 4);
        assert_eq!(merged.joints.len(), 3);
        assert_eq!(merged.root_link_name(), Some("inst_0__base"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.2), "0.200000");
        assert_eq!(format_number(-1.5), "-1.500000");
        assert_eq!(format_number(1e-13), "0.000000");
        assert_eq!(format_number(-0.0), "0.000000");
        assert_eq!(format_number(f64::NAN), "0.000000");
    }
}
