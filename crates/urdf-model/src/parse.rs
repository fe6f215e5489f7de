//! URDF-subset parser
//!
//! Streams the XML with quick-xml rather than deserializing the whole
//! document: a malformed link or joint is skipped with a warning while the
//! rest of the description still loads. Only a missing <robot> element (or
//! broken XML) is fatal.

use glam::DVec3;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use crate::description::{
    Description, JointDescriptor, JointKind, JointLimit, LinkDescriptor, MeshRef,
};
use crate::pose::Pose;

/// Errors that are fatal to loading a description
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("no <robot> root element found")]
    MissingRobotElement,

    #[error("malformed XML: {0}")]
    Xml(String),
}

/// Parse one serialized description.
///
/// Missing optional attributes default to zero translation/rotation, unit
/// axis [1,0,0] and no limit. Visual/collision presence is derived from the
/// child elements, not declared.
pub fn parse_description(xml: &str) -> Result<Description, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"robot" => {
                return parse_robot(&mut reader, e);
            }
            Ok(Event::Eof) => return Err(ParseError::MissingRobotElement),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }
}

fn parse_robot(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Description, ParseError> {
    let name = attribute(start, "name").unwrap_or_else(|| "robot".to_string());
    let mut description = Description::new(name);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"link" => match attribute(e, "name") {
                    Some(link_name) => {
                        let link = parse_link(reader, link_name)?;
                        push_link(&mut description, link);
                    }
                    None => {
                        warn!("skipping <link> without a name attribute");
                        skip_element(reader, b"link")?;
                    }
                },
                b"joint" => {
                    if let Some(joint) = parse_joint(reader, e)? {
                        description.joints.push(joint);
                    }
                }
                other => {
                    skip_element(reader, other)?;
                }
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"link" => match attribute(e, "name") {
                    Some(link_name) => {
                        push_link(&mut description, LinkDescriptor::placeholder(link_name));
                    }
                    None => warn!("skipping <link/> without a name attribute"),
                },
                b"joint" => {
                    warn!("skipping self-closing <joint/> (no parent/child)");
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"robot" => break,
            Ok(Event::Eof) => return Err(ParseError::Xml("unexpected EOF in <robot>".into())),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }

    Ok(description)
}

fn push_link(description: &mut Description, link: LinkDescriptor) {
    if description.contains_link(&link.name) {
        warn!(link = %link.name, "skipping duplicate link name");
        return;
    }
    description.links.push(link);
}

/// Parse the body of a <link>, tolerating anything it does not understand.
fn parse_link(reader: &mut Reader<&[u8]>, name: String) -> Result<LinkDescriptor, ParseError> {
    let mut link = LinkDescriptor::placeholder(name);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"visual" => {
                    link.has_visual = true;
                    parse_geometry_block(reader, b"visual", &mut link, true)?;
                }
                b"collision" => {
                    link.has_collision = true;
                    parse_geometry_block(reader, b"collision", &mut link, false)?;
                }
                other => skip_element(reader, other)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"link" => break,
            Ok(Event::Eof) => return Err(ParseError::Xml("unexpected EOF in <link>".into())),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }

    Ok(link)
}

/// Collect origin and mesh references from a <visual> or <collision> block.
///
/// Only the visual origin is recorded on the link; both blocks contribute
/// mesh references.
fn parse_geometry_block(
    reader: &mut Reader<&[u8]>,
    end_tag: &[u8],
    link: &mut LinkDescriptor,
    capture_origin: bool,
) -> Result<(), ParseError> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"origin" if capture_origin => {
                    link.visual_origin = parse_origin(e);
                }
                b"mesh" => {
                    if let Some(filename) = attribute(e, "filename") {
                        let scale = attribute(e, "scale").and_then(|s| parse_vec3(&s));
                        link.meshes.push(MeshRef {
                            filename,
                            scale: scale.map(|v| [v.x, v.y, v.z]),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == end_tag => break,
            Ok(Event::Eof) => {
                return Err(ParseError::Xml(format!(
                    "unexpected EOF in <{}>",
                    String::from_utf8_lossy(end_tag)
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }
    Ok(())
}

/// Parse a <joint>; returns None (with a warning) when the element is
/// malformed. The element is consumed either way so parsing can continue.
fn parse_joint(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<JointDescriptor>, ParseError> {
    let name = attribute(start, "name");
    let kind = attribute(start, "type").as_deref().and_then(JointKind::from_str);

    let mut parent: Option<String> = None;
    let mut child: Option<String> = None;
    let mut origin = Pose::default();
    let mut axis = DVec3::X;
    let mut limit: Option<JointLimit> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"parent" => parent = attribute(e, "link"),
                b"child" => child = attribute(e, "link"),
                b"origin" => origin = parse_origin(e),
                b"axis" => {
                    if let Some(v) = attribute(e, "xyz").and_then(|s| parse_vec3(&s)) {
                        axis = sanitize_axis(v);
                    }
                }
                b"limit" => {
                    limit = Some(JointLimit {
                        lower: float_attribute(e, "lower").unwrap_or(0.0),
                        upper: float_attribute(e, "upper").unwrap_or(0.0),
                    });
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"joint" => break,
            Ok(Event::Eof) => return Err(ParseError::Xml("unexpected EOF in <joint>".into())),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }

    match (name, kind, parent, child) {
        (Some(name), Some(kind), Some(parent), Some(child)) => Ok(Some(JointDescriptor {
            name,
            kind,
            parent,
            child,
            origin,
            axis,
            limit,
        })),
        (name, kind, ..) => {
            warn!(
                joint = name.as_deref().unwrap_or("<unnamed>"),
                known_kind = kind.is_some(),
                "skipping malformed <joint>"
            );
            Ok(None)
        }
    }
}

/// Unit axis, falling back to X when the declared axis is degenerate
fn sanitize_axis(v: DVec3) -> DVec3 {
    let len = v.length();
    if len < 1e-12 { DVec3::X } else { v / len }
}

fn parse_origin(e: &BytesStart) -> Pose {
    let xyz = attribute(e, "xyz")
        .and_then(|s| parse_vec3(&s))
        .unwrap_or(DVec3::ZERO);
    let rpy = attribute(e, "rpy")
        .and_then(|s| parse_vec3(&s))
        .unwrap_or(DVec3::ZERO);
    Pose::new([xyz.x, xyz.y, xyz.z], [rpy.x, rpy.y, rpy.z])
}

fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

fn float_attribute(e: &BytesStart, name: &str) -> Option<f64> {
    attribute(e, name).and_then(|s| s.trim().parse().ok())
}

fn parse_vec3(s: &str) -> Option<DVec3> {
    let parts: Vec<f64> = s
        .split_whitespace()
        .map_while(|p| p.parse::<f64>().ok())
        .collect();
    if parts.len() == 3 {
        Some(DVec3::new(parts[0], parts[1], parts[2]))
    } else {
        None
    }
}

/// Skip an element and all its children
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<(), ParseError> {
    let mut depth = 1usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == name => depth += 1,
            Ok(Event::End(ref e)) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Ok(Event::Eof) => {
                return Err(ParseError::Xml(format!(
                    "unexpected EOF while skipping <{}>",
                    String::from_utf8_lossy(name)
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM: &str = r#"<?xml version="1.0"?>
<robot name="arm">
  <link name="base">
    <visual>
      <origin xyz="0.1 0 0.2" rpy="0 0 1.5707963"/>
      <geometry>
        <mesh filename="meshes/base.stl" scale="0.001 0.001 0.001"/>
      </geometry>
    </visual>
    <collision>
      <geometry>
        <mesh filename="meshes/base_col.stl"/>
      </geometry>
    </collision>
  </link>
  <link name="AP1"/>
  <link name="upper">
    <visual>
      <geometry>
        <mesh filename="meshes/upper.stl"/>
      </geometry>
    </visual>
  </link>
  <joint name="shoulder" type="revolute">
    <parent link="base"/>
    <child link="upper"/>
    <origin xyz="0 0 0.5" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-1.57" upper="1.57"/>
  </joint>
  <joint name="base_to_ap1" type="fixed">
    <parent link="base"/>
    <child link="AP1"/>
    <origin xyz="0 0.2 0"/>
  </joint>
</robot>
"#;

    #[test]
    fn test_parse_basic() {
        let desc = parse_description(ARM).unwrap();
        assert_eq!(desc.name, "arm");
        assert_eq!(desc.links.len(), 3);
        assert_eq!(desc.joints.len(), 2);
        assert_eq!(desc.root_link_name(), Some("base"));
    }

    #[test]
    fn test_structural_visual_collision() {
        let desc = parse_description(ARM).unwrap();
        let base = desc.find_link("base").unwrap();
        assert!(base.has_visual);
        assert!(base.has_collision);
        assert_eq!(base.meshes.len(), 2);
        assert_eq!(base.meshes[0].scale, Some([0.001, 0.001, 0.001]));
        assert_eq!(base.meshes[1].scale, None);

        let ap = desc.find_link("AP1").unwrap();
        assert!(ap.is_placeholder());
    }

    #[test]
    fn test_joint_defaults() {
        let desc = parse_description(ARM).unwrap();
        let fixed = desc.find_joint("base_to_ap1").unwrap();
        assert_eq!(fixed.kind, JointKind::Fixed);
        assert_eq!(fixed.axis, DVec3::X);
        assert!(fixed.limit.is_none());
        assert_eq!(fixed.origin.rpy, [0.0; 3]);

        let shoulder = desc.find_joint("shoulder").unwrap();
        assert_eq!(shoulder.kind, JointKind::Revolute);
        assert_eq!(shoulder.axis, DVec3::Z);
        assert_eq!(
            shoulder.limit,
            Some(JointLimit {
                lower: -1.57,
                upper: 1.57
            })
        );
    }

    #[test]
    fn test_missing_robot_is_fatal() {
        let err = parse_description("<not_a_robot/>").unwrap_err();
        assert!(matches!(err, ParseError::MissingRobotElement));
    }

    #[test]
    fn test_malformed_joint_skipped() {
        let xml = r#"<robot name="r">
          <link name="a"><visual><geometry><mesh filename="a.stl"/></geometry></visual></link>
          <link name="b"><visual><geometry><mesh filename="b.stl"/></geometry></visual></link>
          <joint name="no_child" type="fixed">
            <parent link="a"/>
          </joint>
          <joint name="bad_kind" type="floating">
            <parent link="a"/>
            <child link="b"/>
          </joint>
          <joint name="ok" type="fixed">
            <parent link="a"/>
            <child link="b"/>
          </joint>
        </robot>"#;
        let desc = parse_description(xml).unwrap();
        assert_eq!(desc.joints.len(), 1);
        assert_eq!(desc.joints[0].name, "ok");
    }

    #[test]
    fn test_duplicate_link_skipped() {
        let xml = r#"<robot name="r">
          <link name="a"/>
          <link name="a"><visual><geometry><mesh filename="a.stl"/></geometry></visual></link>
        </robot>"#;
        let desc = parse_description(xml).unwrap();
        assert_eq!(desc.links.len(), 1);
        assert!(desc.links[0].is_placeholder());
    }

    #[test]
    fn test_zero_axis_defaults_to_unit_x() {
        let xml = r#"<robot name="r">
          <link name="a"/>
          <link name="b"/>
          <joint name="j" type="revolute">
            <parent link="a"/>
            <child link="b"/>
            <axis xyz="0 0 0"/>
          </joint>
        </robot>"#;
        let desc = parse_description(xml).unwrap();
        assert_eq!(desc.joints[0].axis, DVec3::X);
    }

    #[test]
    fn test_unknown_elements_ignored() {
        let xml = r#"<robot name="r">
          <material name="grey"><color rgba="0.5 0.5 0.5 1"/></material>
          <link name="a">
            <inertial><mass value="1.0"/></inertial>
            <visual><geometry><box size="1 1 1"/></geometry></visual>
          </link>
          <gazebo><plugin name="x"/></gazebo>
        </robot>"#;
        let desc = parse_description(xml).unwrap();
        assert_eq!(desc.links.len(), 1);
        assert!(desc.links[0].has_visual);
        assert!(desc.links[0].meshes.is_empty());
    }
}
