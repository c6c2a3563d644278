//! # Change Events
//!
//! The single message type exchanged between peers. A `ChangeEvent` names
//! an entity by its unique id, says which field changed, and carries the new
//! value as a kind-dependent string payload:
//!
//! - `transform`, `rotate`, `scale`: a vector triple `"x,y,z"`
//! - `material`: the material name, verbatim
//! - `create`: three triples joined by `|`, `"pos|rot|scale"`
//!
//! Events may also carry a [`SpawnDescriptor`] so a receiver that has never
//! seen the entity knows what to instantiate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Rotator, Vector3};

/// Which field (or fields) an event updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Full state of a newly introduced entity
    Create,

    /// Position
    Transform,

    /// Rotation, in Euler degrees
    #[serde(alias = "rotation")]
    Rotate,

    /// Scale
    Scale,

    /// Material name
    Material,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Transform => "transform",
            ChangeKind::Rotate => "rotate",
            ChangeKind::Scale => "scale",
            ChangeKind::Material => "material",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in shapes a peer can construct without any asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveShape {
    Cube,
    Sphere,
    Capsule,
    Cylinder,
    Plane,
    Quad,
}

impl PrimitiveShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveShape::Cube => "Cube",
            PrimitiveShape::Sphere => "Sphere",
            PrimitiveShape::Capsule => "Capsule",
            PrimitiveShape::Cylinder => "Cylinder",
            PrimitiveShape::Plane => "Plane",
            PrimitiveShape::Quad => "Quad",
        }
    }
}

impl FromStr for PrimitiveShape {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cube" => Ok(PrimitiveShape::Cube),
            "sphere" => Ok(PrimitiveShape::Sphere),
            "capsule" => Ok(PrimitiveShape::Capsule),
            "cylinder" => Ok(PrimitiveShape::Cylinder),
            "plane" => Ok(PrimitiveShape::Plane),
            "quad" => Ok(PrimitiveShape::Quad),
            _ => Err(ProtocolError::UnknownShape(s.to_string())),
        }
    }
}

impl fmt::Display for PrimitiveShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ASSET_PREFIX: &str = "asset:";
const PRIMITIVE_PREFIX: &str = "primitive:";
const LEGACY_PRIMITIVE: &str = "PRIMITIVE";

/// What a receiver should instantiate for an entity id it does not know
///
/// Encoded on the wire as `asset:<path>` or `primitive:<shape>`. Older
/// peers sent a bare `PRIMITIVE` (meaning a cube) or a bare asset path;
/// both still decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpawnDescriptor {
    /// Asset reference, resolved by the receiver's asset library
    Asset(String),

    /// A primitive shape. `Err` keeps shape names this peer does not know,
    /// so the receiver can still fall back to a placeholder.
    Primitive(Result<PrimitiveShape, String>),
}

impl SpawnDescriptor {
    pub fn asset(path: impl Into<String>) -> Self {
        SpawnDescriptor::Asset(path.into())
    }

    pub fn primitive(shape: PrimitiveShape) -> Self {
        SpawnDescriptor::Primitive(Ok(shape))
    }

    /// Label used when naming a placeholder for an unresolvable descriptor
    pub fn label(&self) -> String {
        match self {
            SpawnDescriptor::Asset(path) => path.clone(),
            SpawnDescriptor::Primitive(Ok(shape)) => shape.to_string(),
            SpawnDescriptor::Primitive(Err(name)) => format!("{}{}", PRIMITIVE_PREFIX, name),
        }
    }
}

impl fmt::Display for SpawnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnDescriptor::Asset(path) => write!(f, "{}{}", ASSET_PREFIX, path),
            SpawnDescriptor::Primitive(Ok(shape)) => write!(f, "{}{}", PRIMITIVE_PREFIX, shape),
            SpawnDescriptor::Primitive(Err(name)) => write!(f, "{}{}", PRIMITIVE_PREFIX, name),
        }
    }
}

impl FromStr for SpawnDescriptor {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProtocolError::EmptyField("spawnDescriptor"));
        }
        if s == LEGACY_PRIMITIVE {
            return Ok(SpawnDescriptor::primitive(PrimitiveShape::Cube));
        }
        if let Some(shape) = s.strip_prefix(PRIMITIVE_PREFIX) {
            return Ok(SpawnDescriptor::Primitive(
                shape.parse::<PrimitiveShape>().map_err(|_| shape.to_string()),
            ));
        }
        let path = s.strip_prefix(ASSET_PREFIX).unwrap_or(s);
        if path.is_empty() {
            return Err(ProtocolError::EmptyField("spawnDescriptor"));
        }
        Ok(SpawnDescriptor::Asset(path.to_string()))
    }
}

impl TryFrom<String> for SpawnDescriptor {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpawnDescriptor> for String {
    fn from(value: SpawnDescriptor) -> Self {
        value.to_string()
    }
}

/// Wire message for one replicated change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What changed
    pub kind: ChangeKind,

    /// Unique id of the entity this event targets
    #[serde(rename = "entityID")]
    pub entity_id: String,

    /// What to instantiate if the receiver lacks the entity
    #[serde(rename = "spawnDescriptor", default, skip_serializing_if = "Option::is_none")]
    pub spawn_descriptor: Option<SpawnDescriptor>,

    /// Kind-dependent encoded value
    pub payload: String,

    /// Sender-local monotonic counter, informational only
    #[serde(default)]
    pub timestamp: i64,

    /// Peer that produced the event, used by polling transports to skip
    /// their own echoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl ChangeEvent {
    /// A single-field update event
    pub fn field(kind: ChangeKind, entity_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            spawn_descriptor: None,
            payload: payload.into(),
            timestamp: 0,
            sender: None,
        }
    }

    /// A `create` event bundling the full transform
    pub fn create(
        entity_id: impl Into<String>,
        descriptor: SpawnDescriptor,
        position: Vector3,
        rotation: Rotator,
        scale: Vector3,
    ) -> Self {
        let payload = Payload::Composite { position, rotation, scale }.encode();
        Self {
            kind: ChangeKind::Create,
            entity_id: entity_id.into(),
            spawn_descriptor: Some(descriptor),
            payload,
            timestamp: 0,
            sender: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: Option<SpawnDescriptor>) -> Self {
        self.spawn_descriptor = descriptor;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Decode the payload according to `kind`
    pub fn decode_payload(&self) -> ProtocolResult<Payload> {
        Payload::decode(self.kind, &self.payload)
    }
}

/// Decoded form of [`ChangeEvent::payload`]
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Position(Vector3),
    Rotation(Rotator),
    Scale(Vector3),
    Material(String),
    Composite {
        position: Vector3,
        rotation: Rotator,
        scale: Vector3,
    },
}

impl Payload {
    pub fn decode(kind: ChangeKind, raw: &str) -> ProtocolResult<Payload> {
        match kind {
            ChangeKind::Transform => parse_vector(raw).map(Payload::Position),
            ChangeKind::Rotate => parse_vector(raw).map(|v| Payload::Rotation(Rotator::from_vector(v))),
            ChangeKind::Scale => parse_vector(raw).map(Payload::Scale),
            ChangeKind::Material => {
                if raw.is_empty() {
                    Err(ProtocolError::EmptyField("payload"))
                } else {
                    Ok(Payload::Material(raw.to_string()))
                }
            }
            ChangeKind::Create => {
                let parts: Vec<&str> = raw.split('|').collect();
                if parts.len() != 3 {
                    return Err(ProtocolError::InvalidComposite(raw.to_string()));
                }
                Ok(Payload::Composite {
                    position: parse_vector(parts[0])?,
                    rotation: Rotator::from_vector(parse_vector(parts[1])?),
                    scale: parse_vector(parts[2])?,
                })
            }
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Payload::Position(v) | Payload::Scale(v) => format_vector(v),
            Payload::Rotation(r) => format_vector(&r.as_vector()),
            Payload::Material(name) => name.clone(),
            Payload::Composite { position, rotation, scale } => format!(
                "{}|{}|{}",
                format_vector(position),
                format_vector(&rotation.as_vector()),
                format_vector(scale)
            ),
        }
    }
}

/// Format a vector as `x,y,z`
pub fn format_vector(v: &Vector3) -> String {
    format!("{},{},{}", v.x, v.y, v.z)
}

/// Parse `x,y,z`, or the JSON object form `{"x":..,"y":..,"z":..}`
pub fn parse_vector(raw: &str) -> ProtocolResult<Vector3> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        return serde_json::from_str::<Vector3>(raw)
            .map_err(|_| ProtocolError::InvalidVector(raw.to_string()));
    }
    let mut components = raw.split(',').map(|c| c.trim().parse::<f32>());
    match (components.next(), components.next(), components.next(), components.next()) {
        (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) if x.is_finite() && y.is_finite() && z.is_finite() => {
            Ok(Vector3::new(x, y, z))
        }
        _ => Err(ProtocolError::InvalidVector(raw.to_string())),
    }
}
