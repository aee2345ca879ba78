//! Body topology: the static description of a jointed ragdoll.
//!
//! A body file is a JSON document of the form
//!
//! ```json
//! {
//!   "root": "torso",
//!   "pos": [0.0, 1.6],
//!   "body": {
//!     "torso": {
//!       "vertices": [[-4, -12], [4, -12], [4, 12], [-4, 12]],
//!       "color": 0,
//!       "children": {
//!         "head": { "anchorA": [0, 12], "anchorB": [0, -5], "angle": { "min": -20, "max": 20 } }
//!       }
//!     },
//!     "head": { "vertices": [[-5, -5], [5, -5], [5, 5], [-5, 5]], "color": 1 }
//!   }
//! }
//! ```
//!
//! Vertices and anchors are expressed in drawing units and divided by `scale`
//! (default [`DEFAULT_BODY_SCALE`]) on load. Angle limits are degrees in the
//! file and radians in memory.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Drawing units per world unit used when the body file has no `scale`.
pub const DEFAULT_BODY_SCALE: f32 = 21.0;

/// A 2D vector in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Rotate counter-clockwise by `angle` radians.
    #[inline]
    pub fn rotate(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }

    #[inline]
    pub fn scale(self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<[f32; 2]> for Vec2 {
    fn from(v: [f32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<Vec2> for [f32; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

/// Color category of a part (only used by renderers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartColor {
    Primary,
    Secondary,
}

/// Geometry of a single body part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartDef {
    /// Convex polygon in the part's local frame (world units).
    pub vertices: Vec<Vec2>,
    pub color: PartColor,
}

/// Revolute joint angle range, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleLimits {
    pub min: f32,
    pub max: f32,
}

/// A revolute joint between a parent and a child part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointDef {
    /// `"{parent}-{child}"`.
    pub id: String,
    pub parent: String,
    pub child: String,
    /// Anchor in the parent's local frame.
    pub anchor_parent: Vec2,
    /// Anchor in the child's local frame.
    pub anchor_child: Vec2,
    pub limits: Option<AngleLimits>,
}

/// Validated, immutable description of a jointed body.
///
/// The joint set is guaranteed to form a tree rooted at [`BodyTopology::root`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyTopology {
    root: String,
    initial_position: Vec2,
    parts: BTreeMap<String, PartDef>,
    joints: BTreeMap<String, JointDef>,
    /// Joint ids in breadth-first order from the root.
    order: Vec<String>,
}

/// Errors describing why a body definition was rejected.
#[derive(Debug, thiserror::Error)]
pub enum MalformedBodyError {
    #[error("Invalid body document: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("Root part '{0}' is not defined")]
    MissingRoot(String),
    #[error("Joint '{joint}' references undefined part '{part}'")]
    UnknownPart { joint: String, part: String },
    #[error("Part '{part}' has more than one parent ('{first}' and '{second}')")]
    MultipleParents {
        part: String,
        first: String,
        second: String,
    },
    #[error("Root part '{root}' is the child of joint '{joint}'")]
    RootHasParent { root: String, joint: String },
    #[error("Part '{0}' is not reachable from the root (cycle or orphan)")]
    Unreachable(String),
    #[error("Joint id '{0}' is produced by more than one parent/child pair")]
    DuplicateJointId(String),
    #[error("Part '{0}' needs at least 3 vertices")]
    DegeneratePolygon(String),
    #[error("Joint '{0}' has min angle greater than max angle")]
    InvertedLimits(String),
    #[error("Body scale must be positive")]
    InvalidScale,
}

/// Errors from [`BodyTopology::load`].
#[derive(Debug, thiserror::Error)]
pub enum BodyLoadError {
    #[error("Failed to read body file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Malformed(#[from] MalformedBodyError),
}

#[derive(Debug, Deserialize)]
struct RawBody {
    root: String,
    pos: [f32; 2],
    body: BTreeMap<String, RawPart>,
    #[serde(default)]
    scale: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    vertices: Vec<[f32; 2]>,
    color: u8,
    #[serde(default)]
    children: BTreeMap<String, RawJoint>,
}

#[derive(Debug, Deserialize)]
struct RawJoint {
    #[serde(rename = "anchorA")]
    anchor_a: [f32; 2],
    #[serde(rename = "anchorB")]
    anchor_b: [f32; 2],
    #[serde(default)]
    angle: Option<RawAngle>,
}

#[derive(Debug, Deserialize)]
struct RawAngle {
    min: f32,
    max: f32,
}

impl BodyTopology {
    /// Load and validate a body file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BodyLoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| BodyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json_str(&content)?)
    }

    /// Parse and validate a body definition from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self, MalformedBodyError> {
        let raw: RawBody = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawBody) -> Result<Self, MalformedBodyError> {
        let scale = raw.scale.unwrap_or(DEFAULT_BODY_SCALE);
        if !(scale > 0.0) {
            return Err(MalformedBodyError::InvalidScale);
        }
        let to_world = |v: [f32; 2]| Vec2::from(v).scale(1.0 / scale);

        if !raw.body.contains_key(&raw.root) {
            return Err(MalformedBodyError::MissingRoot(raw.root));
        }

        let mut parts = BTreeMap::new();
        let mut joints: BTreeMap<String, JointDef> = BTreeMap::new();
        let mut parent_of: BTreeMap<String, String> = BTreeMap::new();

        for (part_id, part) in &raw.body {
            if part.vertices.len() < 3 {
                return Err(MalformedBodyError::DegeneratePolygon(part_id.clone()));
            }

            for (child_id, joint) in &part.children {
                let id = format!("{part_id}-{child_id}");

                if !raw.body.contains_key(child_id) {
                    return Err(MalformedBodyError::UnknownPart {
                        joint: id,
                        part: child_id.clone(),
                    });
                }
                if *child_id == raw.root {
                    return Err(MalformedBodyError::RootHasParent {
                        root: raw.root.clone(),
                        joint: id,
                    });
                }
                if let Some(first) = parent_of.get(child_id) {
                    return Err(MalformedBodyError::MultipleParents {
                        part: child_id.clone(),
                        first: first.clone(),
                        second: part_id.clone(),
                    });
                }
                if joints.contains_key(&id) {
                    return Err(MalformedBodyError::DuplicateJointId(id));
                }

                let limits = match &joint.angle {
                    Some(angle) if angle.min > angle.max => {
                        return Err(MalformedBodyError::InvertedLimits(id));
                    }
                    Some(angle) => Some(AngleLimits {
                        min: angle.min.to_radians(),
                        max: angle.max.to_radians(),
                    }),
                    None => None,
                };

                parent_of.insert(child_id.clone(), part_id.clone());
                joints.insert(
                    id.clone(),
                    JointDef {
                        id,
                        parent: part_id.clone(),
                        child: child_id.clone(),
                        anchor_parent: to_world(joint.anchor_a),
                        anchor_child: to_world(joint.anchor_b),
                        limits,
                    },
                );
            }

            parts.insert(
                part_id.clone(),
                PartDef {
                    vertices: part.vertices.iter().copied().map(to_world).collect(),
                    color: if part.color == 0 {
                        PartColor::Primary
                    } else {
                        PartColor::Secondary
                    },
                },
            );
        }

        // Breadth-first walk from the root; with single parents, anything not
        // reached is either orphaned or sits on a cycle.
        let mut children_of: BTreeMap<&str, Vec<&JointDef>> = BTreeMap::new();
        for joint in joints.values() {
            children_of.entry(joint.parent.as_str()).or_default().push(joint);
        }

        let mut order = Vec::with_capacity(joints.len());
        let mut reached: BTreeSet<&str> = BTreeSet::new();
        let mut queue = VecDeque::from([raw.root.as_str()]);
        reached.insert(raw.root.as_str());
        while let Some(part_id) = queue.pop_front() {
            for joint in children_of.get(part_id).into_iter().flatten() {
                if reached.insert(joint.child.as_str()) {
                    order.push(joint.id.clone());
                    queue.push_back(joint.child.as_str());
                }
            }
        }

        if let Some(orphan) = parts.keys().find(|id| !reached.contains(id.as_str())) {
            return Err(MalformedBodyError::Unreachable(orphan.clone()));
        }

        Ok(Self {
            root: raw.root,
            initial_position: Vec2::from(raw.pos),
            parts,
            joints,
            order,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn initial_position(&self) -> Vec2 {
        self.initial_position
    }

    pub fn parts(&self) -> &BTreeMap<String, PartDef> {
        &self.parts
    }

    pub fn part(&self, id: &str) -> Option<&PartDef> {
        self.parts.get(id)
    }

    pub fn joints(&self) -> &BTreeMap<String, JointDef> {
        &self.joints
    }

    pub fn joint(&self, id: &str) -> Option<&JointDef> {
        self.joints.get(id)
    }

    /// Joint ids in sorted order.
    pub fn joint_ids(&self) -> impl Iterator<Item = &str> {
        self.joints.keys().map(String::as_str)
    }

    /// Joints ordered so that every parent part is placed before its children.
    pub fn joints_root_first(&self) -> impl Iterator<Item = &JointDef> {
        self.order.iter().filter_map(|id| self.joints.get(id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Three-part body with two limited hip joints, in world units.
    pub(crate) const TWO_JOINT_BODY: &str = r#"{
        "root": "torso",
        "pos": [0.0, 2.0],
        "scale": 1.0,
        "body": {
            "torso": {
                "vertices": [[-0.2, -0.5], [0.2, -0.5], [0.2, 0.5], [-0.2, 0.5]],
                "color": 0,
                "children": {
                    "leg_f": { "anchorA": [0.1, -0.5], "anchorB": [0.0, 0.4], "angle": { "min": -45, "max": 45 } },
                    "leg_b": { "anchorA": [-0.1, -0.5], "anchorB": [0.0, 0.4], "angle": { "min": -45, "max": 45 } }
                }
            },
            "leg_f": { "vertices": [[-0.1, -0.4], [0.1, -0.4], [0.1, 0.4], [-0.1, 0.4]], "color": 0 },
            "leg_b": { "vertices": [[-0.1, -0.4], [0.1, -0.4], [0.1, 0.4], [-0.1, 0.4]], "color": 1 }
        }
    }"#;

    pub(crate) fn two_joint_body() -> BodyTopology {
        BodyTopology::from_json_str(TWO_JOINT_BODY).unwrap()
    }

    fn square(extra: &str) -> String {
        format!(r#"{{ "vertices": [[0, 0], [1, 0], [1, 1], [0, 1]], "color": 0 {extra} }}"#)
    }

    #[test]
    fn test_load_two_joint_body() {
        let body = two_joint_body();
        assert_eq!(body.root(), "torso");
        assert_eq!(body.parts().len(), 3);
        let ids: Vec<_> = body.joint_ids().collect();
        assert_eq!(ids, vec!["torso-leg_b", "torso-leg_f"]);

        let joint = body.joint("torso-leg_f").unwrap();
        assert_eq!(joint.parent, "torso");
        assert_eq!(joint.child, "leg_f");
        let limits = joint.limits.unwrap();
        assert!((limits.max - 45f32.to_radians()).abs() < 1e-6);
        assert_eq!(body.part("leg_b").unwrap().color, PartColor::Secondary);
    }

    #[test]
    fn test_default_scale_applies_to_vertices_and_anchors() {
        let json = format!(
            r#"{{ "root": "a", "pos": [1, 2], "body": {{
                "a": {{ "vertices": [[0, 0], [21, 0], [21, 42]], "color": 0,
                        "children": {{ "b": {{ "anchorA": [21, 0], "anchorB": [0, 0] }} }} }},
                "b": {} }} }}"#,
            square("")
        );
        let body = BodyTopology::from_json_str(&json).unwrap();
        assert_eq!(body.initial_position(), Vec2::new(1.0, 2.0));
        assert_eq!(body.part("a").unwrap().vertices[2], Vec2::new(1.0, 2.0));
        assert_eq!(body.joint("a-b").unwrap().anchor_parent, Vec2::new(1.0, 0.0));
        assert!(body.joint("a-b").unwrap().limits.is_none());
    }

    #[test]
    fn test_child_with_two_parents_is_rejected() {
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{
                "a": {},
                "b": {},
                "c": {} }} }}"#,
            square(r#", "children": { "b": { "anchorA": [0, 0], "anchorB": [0, 0] }, "c": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(r#", "children": { "c": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(""),
        );
        let err = BodyTopology::from_json_str(&json).unwrap_err();
        assert!(
            matches!(err, MalformedBodyError::MultipleParents { ref part, .. } if part == "c"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_unknown_child_is_rejected() {
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{ "a": {} }} }}"#,
            square(r#", "children": { "ghost": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
        );
        let err = BodyTopology::from_json_str(&json).unwrap_err();
        assert!(matches!(err, MalformedBodyError::UnknownPart { ref part, .. } if part == "ghost"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{ "a": {}, "b": {}, "c": {} }} }}"#,
            square(""),
            square(r#", "children": { "c": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(r#", "children": { "b": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
        );
        let err = BodyTopology::from_json_str(&json).unwrap_err();
        assert!(matches!(err, MalformedBodyError::Unreachable(_)));
    }

    #[test]
    fn test_joint_into_root_is_rejected() {
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{ "a": {}, "b": {} }} }}"#,
            square(r#", "children": { "b": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(r#", "children": { "a": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
        );
        let err = BodyTopology::from_json_str(&json).unwrap_err();
        assert!(matches!(err, MalformedBodyError::RootHasParent { .. }));
    }

    #[test]
    fn test_colliding_joint_ids_are_rejected() {
        // "a" + "b-c" and "a-b" + "c" both concatenate to "a-b-c".
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{ "a": {}, "a-b": {}, "b-c": {}, "c": {} }} }}"#,
            square(
                r#", "children": { "b-c": { "anchorA": [0, 0], "anchorB": [0, 0] }, "a-b": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#
            ),
            square(r#", "children": { "c": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(""),
            square(""),
        );
        let err = BodyTopology::from_json_str(&json).unwrap_err();
        assert!(matches!(err, MalformedBodyError::DuplicateJointId(ref id) if id == "a-b-c"));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = BodyTopology::from_json_str(r#"{ "root": "a", "body": {} }"#).unwrap_err();
        assert!(matches!(err, MalformedBodyError::Syntax(_)));

        let err = BodyTopology::from_json_str(r#"{ "root": "a", "pos": [0, 0], "body": {} }"#)
            .unwrap_err();
        assert!(matches!(err, MalformedBodyError::MissingRoot(_)));
    }

    #[test]
    fn test_root_first_order() {
        let json = format!(
            r#"{{ "root": "a", "pos": [0, 0], "body": {{ "a": {}, "b": {}, "c": {} }} }}"#,
            square(r#", "children": { "c": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
            square(""),
            square(r#", "children": { "b": { "anchorA": [0, 0], "anchorB": [0, 0] } }"#),
        );
        let body = BodyTopology::from_json_str(&json).unwrap();
        let order: Vec<_> = body.joints_root_first().map(|j| j.id.as_str()).collect();
        assert_eq!(order, vec!["a-c", "c-b"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_JOINT_BODY.as_bytes()).unwrap();
        let body = BodyTopology::load(file.path()).unwrap();
        assert_eq!(body.joints().len(), 2);

        let missing = BodyTopology::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(missing, BodyLoadError::Io { .. }));
    }
}
