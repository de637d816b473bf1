//! Output data model
//!
//! The fully materialized model as it is serialized: a flattened,
//! parent-indexed node list where every node owns its vertex attribute
//! buffers, per-material index buckets and baked animation tracks.
//!
//! Vertex attributes use a generic typed-property scheme: each channel is an
//! independently packed little-endian f32 buffer tagged with a name and a
//! scalar dimension. Channels a node does not carry are omitted entirely,
//! never zero padded.

use bytemuck::cast_slice;
use glam::{Quat, Vec2, Vec3, Vec4};

/// Scalar element type of a vertex property buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScalarType {
    Float = 1,
}

impl ScalarType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ScalarType::Float),
            _ => None,
        }
    }
}

/// A named, typed, tightly packed vertex attribute buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexProperty {
    pub name: String,
    pub scalar_type: ScalarType,
    pub dimension: u8,
    pub data: Vec<u8>,
}

impl VertexProperty {
    fn from_floats(name: &str, dimension: u8, floats: &[f32]) -> Self {
        Self {
            name: name.to_string(),
            scalar_type: ScalarType::Float,
            dimension,
            data: cast_slice(floats).to_vec(),
        }
    }

    /// Pack a Vec2 array as a dimension-2 float property.
    pub fn from_vec2(name: &str, values: &[Vec2]) -> Self {
        let mut floats = Vec::with_capacity(values.len() * 2);
        for v in values {
            floats.extend_from_slice(&v.to_array());
        }
        Self::from_floats(name, 2, &floats)
    }

    /// Pack a Vec3 array as a dimension-3 float property.
    pub fn from_vec3(name: &str, values: &[Vec3]) -> Self {
        let mut floats = Vec::with_capacity(values.len() * 3);
        for v in values {
            floats.extend_from_slice(&v.to_array());
        }
        Self::from_floats(name, 3, &floats)
    }

    /// Pack a Vec4 array as a dimension-4 float property.
    pub fn from_vec4(name: &str, values: &[Vec4]) -> Self {
        let mut floats = Vec::with_capacity(values.len() * 4);
        for v in values {
            floats.extend_from_slice(&v.to_array());
        }
        Self::from_floats(name, 4, &floats)
    }

    /// Number of elements (vertices) in the buffer.
    pub fn len(&self) -> usize {
        self.data.len() / (self.dimension as usize * 4)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-material triangle index bucket.
///
/// Buckets are pre-created for every material referenced by a node's
/// contributing objects, so a bucket may legitimately hold zero indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBucket {
    pub material: String,
    pub indices: Vec<u32>,
}

/// Rigid per-frame transform sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrsFrame {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

/// Rigid animation track: one TRS sample per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAnimation {
    pub name: String,
    pub framerate: f32,
    pub frames: Vec<TrsFrame>,
}

/// One frame of dense per-vertex animation: packed offset and rotation
/// buffers sized to the owning node's animated vertex count.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexFrame {
    pub properties: Vec<VertexProperty>,
}

/// Dense per-vertex animation track.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAnimation {
    pub name: String,
    pub framerate: f32,
    pub animated_vertex_count: u32,
    pub frames: Vec<VertexFrame>,
}

/// A flattened export node.
///
/// `parent` indexes into [`Model::nodes`]; -1 marks the tree root. Parents
/// always precede their children in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelNode {
    pub name: String,
    pub parent: i32,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub vertex_count: u32,
    pub vertex_properties: Vec<VertexProperty>,
    pub meshes: Vec<MeshBucket>,
    pub vertex_animations: Vec<VertexAnimation>,
    pub node_animations: Vec<NodeAnimation>,
}

impl ModelNode {
    pub fn new(name: String, parent: i32) -> Self {
        Self {
            name,
            parent,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            vertex_count: 0,
            vertex_properties: Vec::new(),
            meshes: Vec::new(),
            vertex_animations: Vec::new(),
            node_animations: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&VertexProperty> {
        self.vertex_properties.iter().find(|p| p.name == name)
    }
}

/// The complete export result: an ordered node list forming a
/// parent-indexed tree, with animation records embedded per node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub nodes: Vec<ModelNode>,
}
