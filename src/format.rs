//! Arbormesh binary format (.arbormesh)
//!
//! A versioned structured message, zlib-compressed as a whole. There is no
//! container beyond the compression envelope. All integers and floats are
//! little-endian; strings are a u16 length followed by UTF-8 bytes.
//!
//! # Layout (decompressed)
//! ```text
//! magic "ARBM" | version u16 | node_count u32 | nodes...
//!
//! Node:
//!   name | parent i32 | position f32x3 | rotation f32x4 | scale f32x3
//!   vertex_count u32
//!   property_count u16 | properties...
//!   mesh_count u16     | { material name | index_count u32 | indices u32... }
//!   vertex_animation_count u16
//!     | { name | framerate f32 | animated_vertex_count u32
//!       | frame_count u32 | { property_count u16 | properties... }... }
//!   node_animation_count u16
//!     | { name | framerate f32 | frame_count u32
//!       | { position f32x3 | rotation f32x4 | scale f32x3 }... }
//!
//! Property:
//!   name | scalar_type u8 | dimension u8 | byte_len u32 | bytes
//! ```

use anyhow::{bail, Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use glam::{Quat, Vec3};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::model::{
    MeshBucket, Model, ModelNode, NodeAnimation, ScalarType, TrsFrame, VertexAnimation,
    VertexFrame, VertexProperty,
};

/// File magic of the decompressed message.
pub const MODEL_MAGIC: [u8; 4] = *b"ARBM";
/// Current format version.
pub const MODEL_VERSION: u16 = 1;
/// Conventional file extension.
pub const MODEL_EXT: &str = "arbormesh";

// ============================================================================
// Encoding
// ============================================================================

/// Encode `model` into the uncompressed structured message.
pub fn encode_model(model: &Model) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MODEL_MAGIC);
    out.extend_from_slice(&MODEL_VERSION.to_le_bytes());
    out.extend_from_slice(&(model.nodes.len() as u32).to_le_bytes());
    for node in &model.nodes {
        encode_node(&mut out, node);
    }
    out
}

/// Encode, compress and atomically write `model` to `path`.
pub fn write_model_file(model: &Model, path: &Path) -> Result<()> {
    let encoded = encode_model(model);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&encoded)
        .context("Failed to compress model")?;
    let compressed = encoder.finish().context("Failed to compress model")?;

    // Stage next to the destination so the final rename stays on one
    // filesystem and the output path never holds a partial file.
    let staged = path.with_extension("arbormesh.tmp");
    fs::write(&staged, &compressed)
        .with_context(|| format!("Failed to write output: {:?}", staged))?;
    fs::rename(&staged, path)
        .with_context(|| format!("Failed to move output into place: {:?}", path))?;

    tracing::info!(
        "Wrote {:?}: {} node(s), {} bytes ({} compressed)",
        path,
        model.nodes.len(),
        encoded.len(),
        compressed.len()
    );
    Ok(())
}

fn encode_node(out: &mut Vec<u8>, node: &ModelNode) {
    encode_string(out, &node.name);
    out.extend_from_slice(&node.parent.to_le_bytes());
    encode_vec3(out, node.position);
    encode_quat(out, node.rotation);
    encode_vec3(out, node.scale);
    out.extend_from_slice(&node.vertex_count.to_le_bytes());

    out.extend_from_slice(&(node.vertex_properties.len() as u16).to_le_bytes());
    for property in &node.vertex_properties {
        encode_property(out, property);
    }

    out.extend_from_slice(&(node.meshes.len() as u16).to_le_bytes());
    for mesh in &node.meshes {
        encode_string(out, &mesh.material);
        out.extend_from_slice(&(mesh.indices.len() as u32).to_le_bytes());
        for index in &mesh.indices {
            out.extend_from_slice(&index.to_le_bytes());
        }
    }

    out.extend_from_slice(&(node.vertex_animations.len() as u16).to_le_bytes());
    for animation in &node.vertex_animations {
        encode_string(out, &animation.name);
        out.extend_from_slice(&animation.framerate.to_le_bytes());
        out.extend_from_slice(&animation.animated_vertex_count.to_le_bytes());
        out.extend_from_slice(&(animation.frames.len() as u32).to_le_bytes());
        for frame in &animation.frames {
            out.extend_from_slice(&(frame.properties.len() as u16).to_le_bytes());
            for property in &frame.properties {
                encode_property(out, property);
            }
        }
    }

    out.extend_from_slice(&(node.node_animations.len() as u16).to_le_bytes());
    for animation in &node.node_animations {
        encode_string(out, &animation.name);
        out.extend_from_slice(&animation.framerate.to_le_bytes());
        out.extend_from_slice(&(animation.frames.len() as u32).to_le_bytes());
        for frame in &animation.frames {
            encode_vec3(out, frame.position);
            encode_quat(out, frame.rotation);
            encode_vec3(out, frame.scale);
        }
    }
}

fn encode_property(out: &mut Vec<u8>, property: &VertexProperty) {
    encode_string(out, &property.name);
    out.push(property.scalar_type as u8);
    out.push(property.dimension);
    out.extend_from_slice(&(property.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&property.data);
}

fn encode_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn encode_vec3(out: &mut Vec<u8>, value: Vec3) {
    for f in value.to_array() {
        out.extend_from_slice(&f.to_le_bytes());
    }
}

fn encode_quat(out: &mut Vec<u8>, value: Quat) {
    for f in [value.x, value.y, value.z, value.w] {
        out.extend_from_slice(&f.to_le_bytes());
    }
}

// ============================================================================
// Decoding
// ============================================================================
//
// The decoder backs the `info` command and the round-trip tests; importing
// models back into a scene is not an export-tool concern.

/// Decode an uncompressed structured message.
pub fn decode_model(bytes: &[u8]) -> Result<Model> {
    let mut reader = MessageReader { bytes, offset: 0 };

    let magic = reader.take(4)?;
    if magic != MODEL_MAGIC {
        bail!("Invalid magic bytes (expected 'ARBM')");
    }
    let version = reader.u16()?;
    if version != MODEL_VERSION {
        bail!("Unsupported format version: {}", version);
    }

    let node_count = reader.u32()? as usize;
    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        nodes.push(decode_node(&mut reader)?);
    }
    Ok(Model { nodes })
}

/// Read, decompress and decode a model file.
pub fn read_model_file(path: &Path) -> Result<Model> {
    let compressed =
        fs::read(path).with_context(|| format!("Failed to read model file: {:?}", path))?;
    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to decompress model file: {:?}", path))?;
    decode_model(&bytes)
}

fn decode_node(reader: &mut MessageReader) -> Result<ModelNode> {
    let name = reader.string()?;
    let parent = reader.i32()?;
    let position = reader.vec3()?;
    let rotation = reader.quat()?;
    let scale = reader.vec3()?;
    let vertex_count = reader.u32()?;

    let property_count = reader.u16()?;
    let mut vertex_properties = Vec::with_capacity(property_count as usize);
    for _ in 0..property_count {
        vertex_properties.push(decode_property(reader)?);
    }

    let mesh_count = reader.u16()?;
    let mut meshes = Vec::with_capacity(mesh_count as usize);
    for _ in 0..mesh_count {
        let material = reader.string()?;
        let index_count = reader.u32()? as usize;
        let mut indices = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            indices.push(reader.u32()?);
        }
        meshes.push(MeshBucket { material, indices });
    }

    let vertex_animation_count = reader.u16()?;
    let mut vertex_animations = Vec::with_capacity(vertex_animation_count as usize);
    for _ in 0..vertex_animation_count {
        let name = reader.string()?;
        let framerate = reader.f32()?;
        let animated_vertex_count = reader.u32()?;
        let frame_count = reader.u32()? as usize;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let property_count = reader.u16()?;
            let mut properties = Vec::with_capacity(property_count as usize);
            for _ in 0..property_count {
                properties.push(decode_property(reader)?);
            }
            frames.push(VertexFrame { properties });
        }
        vertex_animations.push(VertexAnimation {
            name,
            framerate,
            animated_vertex_count,
            frames,
        });
    }

    let node_animation_count = reader.u16()?;
    let mut node_animations = Vec::with_capacity(node_animation_count as usize);
    for _ in 0..node_animation_count {
        let name = reader.string()?;
        let framerate = reader.f32()?;
        let frame_count = reader.u32()? as usize;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(TrsFrame {
                position: reader.vec3()?,
                rotation: reader.quat()?,
                scale: reader.vec3()?,
            });
        }
        node_animations.push(NodeAnimation {
            name,
            framerate,
            frames,
        });
    }

    Ok(ModelNode {
        name,
        parent,
        position,
        rotation,
        scale,
        vertex_count,
        vertex_properties,
        meshes,
        vertex_animations,
        node_animations,
    })
}

fn decode_property(reader: &mut MessageReader) -> Result<VertexProperty> {
    let name = reader.string()?;
    let scalar_type = reader.u8()?;
    let scalar_type = ScalarType::from_u8(scalar_type)
        .with_context(|| format!("Unknown scalar type: {}", scalar_type))?;
    let dimension = reader.u8()?;
    let byte_len = reader.u32()? as usize;
    let data = reader.take(byte_len)?.to_vec();
    Ok(VertexProperty {
        name,
        scalar_type,
        dimension,
        data,
    })
}

struct MessageReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> MessageReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.bytes.len() {
            bail!("Unexpected end of message");
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).context("Invalid UTF-8 in string field")
    }

    fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn quat(&mut self) -> Result<Quat> {
        Ok(Quat::from_xyzw(
            self.f32()?,
            self.f32()?,
            self.f32()?,
            self.f32()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn sample_model() -> Model {
        let mut root = ModelNode::new("model".to_string(), -1);
        root.vertex_properties = vec![
            VertexProperty::from_vec3("position", &[]),
            VertexProperty::from_vec3("normal", &[]),
        ];

        let mut node = ModelNode::new("#Part".to_string(), 0);
        node.position = Vec3::new(-1.0, 3.0, -2.0);
        node.rotation = Quat::from_xyzw(0.0, 0.0, 0.7071, 0.7071);
        node.vertex_count = 3;
        node.vertex_properties = vec![
            VertexProperty::from_vec3(
                "position",
                &[Vec3::ZERO, Vec3::X, Vec3::Y],
            ),
            VertexProperty::from_vec2("uv0", &[Vec2::ZERO, Vec2::X, Vec2::Y]),
        ];
        node.meshes = vec![
            MeshBucket {
                material: "bark".to_string(),
                indices: vec![0, 1, 2],
            },
            MeshBucket {
                material: String::new(),
                indices: vec![],
            },
        ];
        node.vertex_animations = vec![VertexAnimation {
            name: "Default".to_string(),
            framerate: 30.0,
            animated_vertex_count: 3,
            frames: vec![VertexFrame {
                properties: vec![VertexProperty::from_vec3(
                    "offset",
                    &[Vec3::ZERO, Vec3::ZERO, Vec3::Z],
                )],
            }],
        }];
        node.node_animations = vec![NodeAnimation {
            name: "Default".to_string(),
            framerate: 30.0,
            frames: vec![TrsFrame {
                position: Vec3::X,
                rotation: Quat::IDENTITY,
                scale: Vec3::ONE,
            }],
        }];

        Model {
            nodes: vec![root, node],
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let model = sample_model();
        let decoded = decode_model(&encode_model(&model)).unwrap();
        assert_eq!(decoded, model);
    }

    #[test]
    fn message_header_is_versioned() {
        let encoded = encode_model(&Model::default());
        assert_eq!(&encoded[0..4], b"ARBM");
        assert_eq!(u16::from_le_bytes([encoded[4], encoded[5]]), MODEL_VERSION);

        let mut bad = encoded.clone();
        bad[4] = 0xFF;
        assert!(decode_model(&bad).is_err());

        let mut wrong_magic = encoded;
        wrong_magic[0] = b'X';
        assert!(decode_model(&wrong_magic).is_err());
    }

    #[test]
    fn truncated_message_fails_cleanly() {
        let encoded = encode_model(&sample_model());
        assert!(decode_model(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn file_round_trip_preserves_property_buffers() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("sample.arbormesh");

        let model = sample_model();
        write_model_file(&model, &path).unwrap();

        // The staging file must be gone and the output in place.
        assert!(path.exists());
        assert!(!path.with_extension("arbormesh.tmp").exists());

        let read_back = read_model_file(&path).unwrap();
        assert_eq!(read_back, model);

        // Byte-identical attribute buffers after the compression round trip.
        for (a, b) in model.nodes.iter().zip(&read_back.nodes) {
            for (pa, pb) in a.vertex_properties.iter().zip(&b.vertex_properties) {
                assert_eq!(pa.data, pb.data);
            }
        }
    }

    #[test]
    fn output_is_a_zlib_stream() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("sample.arbormesh");
        write_model_file(&sample_model(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // zlib header: deflate method, 32K window.
        assert_eq!(bytes[0], 0x78);
    }
}
