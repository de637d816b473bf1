//! Export node construction
//!
//! For every hierarchy node, merges the contributing objects' triangulated
//! geometry into per-material index buckets over one deduplicated vertex
//! list, and captures the rest-pose data animation baking needs later
//! (node matrices, inverted world matrices, per-object vertex ranges).
//!
//! Objects that are animated in the current scene state are processed last,
//! so their vertices form a contiguous tail of the node's vertex list and
//! baking can address them purely by count.

use anyhow::Result;
use glam::{Mat4, Vec2, Vec3, Vec4};
use hashbrown::HashMap;
use std::ops::Range;

use crate::convert;
use crate::geometry;
use crate::hierarchy::{Hierarchy, NodeId};
use crate::model::{MeshBucket, Model, ModelNode, VertexProperty};
use crate::scene::{
    is_animated_in_hierarchy, with_evaluated, EvaluatedMesh, ObjectId, ObjectKind, PlaybackState,
    PoseEvaluator, Scene,
};

/// One deduplicated logical vertex, in node space before axis conversion.
///
/// `source_index` ties the vertex to its originating geometry vertex;
/// `source_loop` is the corner whose attributes it carries, kept so baking
/// can re-sample the normal and tangent of the same corner on a reposed
/// evaluation.
#[derive(Debug, Clone)]
pub struct BuildVertex {
    pub source_index: u32,
    pub source_loop: u32,
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec4,
    pub uv: [Vec2; 3],
    pub color: Vec4,
}

/// Rest-pose capture of one contributing mesh object.
#[derive(Debug, Clone)]
pub struct SourceCapture {
    pub object: ObjectId,
    /// The object's transform relative to the node at build time.
    pub node_matrix: Mat4,
    /// Inverse of the object's rest world transform.
    pub world_inverse: Mat4,
    /// This object's slice of the node vertex list.
    pub range: Range<usize>,
    /// Animated (directly or via an ancestor) at build time.
    pub animated: bool,
}

/// Build-time state of one export node, index-aligned with the model's
/// node list. Holds everything animation baking reads after construction.
#[derive(Debug, Clone)]
pub struct BuiltNode {
    pub node: NodeId,
    pub objects: Vec<SourceCapture>,
    pub vertices: Vec<BuildVertex>,
    pub buckets: Vec<MeshBucket>,
    pub animated_vertex_count: usize,
    pub has_colors: bool,
    pub has_uv: [bool; 3],
}

impl BuiltNode {
    /// The trailing vertex run covered by dense animation baking.
    pub fn animated_range(&self) -> Range<usize> {
        self.vertices.len() - self.animated_vertex_count..self.vertices.len()
    }
}

/// Flatten the hierarchy into the model node list and build every node's
/// mesh data. Returns the model alongside the per-node build state.
pub fn build_nodes<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
) -> Result<(Model, Vec<BuiltNode>)> {
    let order = hierarchy.flatten();
    let model_index: HashMap<usize, i32> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.0, i as i32))
        .collect();

    let mut model = Model::default();
    let mut built_nodes = Vec::with_capacity(order.len());

    for &node_id in &order {
        let hierarchy_node = hierarchy.node(node_id);
        let parent = hierarchy_node
            .parent
            .map(|p| model_index[&p.0])
            .unwrap_or(-1);

        let built = build_node_mesh(scene, evaluator, playback, hierarchy, node_id)?;

        let mut node = ModelNode::new(hierarchy_node.name.clone(), parent);
        let transform = match hierarchy_node.source_object {
            Some(object) => evaluator.local_transform(scene, object, playback)?,
            None => Mat4::IDENTITY,
        };
        save_node_transform(&mut node, transform);
        save_node_vertices(&mut node, &built);

        model.nodes.push(node);
        built_nodes.push(built);
    }

    Ok((model, built_nodes))
}

fn build_node_mesh<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
    node_id: NodeId,
) -> Result<BuiltNode> {
    let hierarchy_node = hierarchy.node(node_id);

    // Every referenced material gets its bucket up front, so materials
    // that end up with zero triangles are still emitted.
    let materials = used_materials(scene, hierarchy_node.entries.iter().map(|e| e.object));
    let bucket_index: HashMap<String, usize> = materials
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect();
    let mut buckets: Vec<MeshBucket> = materials
        .into_iter()
        .map(|material| MeshBucket {
            material,
            indices: Vec::new(),
        })
        .collect();

    // Animated objects last: their vertices must form the tail of the list.
    let mut objects: Vec<ObjectId> = hierarchy_node.entries.iter().map(|e| e.object).collect();
    objects.sort_by_key(|&object| is_animated_in_hierarchy(scene, playback, object));

    let mut built = BuiltNode {
        node: node_id,
        objects: Vec::new(),
        vertices: Vec::new(),
        buckets: Vec::new(),
        animated_vertex_count: 0,
        has_colors: false,
        has_uv: [false; 3],
    };

    for object in objects {
        let scene_object = scene.object(object);
        if scene_object.kind != ObjectKind::Mesh {
            continue;
        }
        let has_vertices = scene_object
            .mesh
            .as_ref()
            .is_some_and(|m| !m.positions.is_empty());
        if !has_vertices {
            // Zero-vertex contributors are silently skipped.
            continue;
        }

        let node_matrix = sampled_object_matrix(scene, evaluator, playback, hierarchy, node_id, object)?;
        let animated = is_animated_in_hierarchy(scene, playback, object);

        let (world_inverse, range) =
            with_evaluated(evaluator, scene, object, playback, |mesh| {
                let range = merge_object_vertices(
                    &mut built,
                    &mut buckets,
                    &bucket_index,
                    mesh,
                    node_matrix,
                );
                Ok((mesh.world_transform.inverse(), range))
            })?;

        if animated {
            built.animated_vertex_count += range.len();
        }
        built.objects.push(SourceCapture {
            object,
            node_matrix,
            world_inverse,
            range,
            animated,
        });
    }

    // Buckets are stored on the model node at save time; stash them in the
    // build state until then.
    built.buckets = buckets;
    Ok(built)
}

/// The object's transform relative to its node at the current playback
/// state: the matrix stack composed through the evaluator, so keyframed
/// stack members contribute their pose at the pinned rest frame rather
/// than their authored rest transform.
fn sampled_object_matrix<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
    node_id: NodeId,
    object: ObjectId,
) -> Result<Mat4> {
    let mut matrix = Mat4::IDENTITY;
    if let Some(entry) = hierarchy.node(node_id).entry(object) {
        for &stacked in &entry.stack {
            matrix *= evaluator.local_transform(scene, stacked, playback)?;
        }
    }
    Ok(matrix)
}

/// Merge one evaluated object into the node: triangulate, then emit every
/// triangle corner in reversed winding (compensating the handedness flip of
/// the axis conversion), deduplicating vertices per source index on the
/// bit-exact attribute tuple.
fn merge_object_vertices(
    built: &mut BuiltNode,
    buckets: &mut [MeshBucket],
    bucket_index: &HashMap<String, usize>,
    mesh: &EvaluatedMesh,
    node_matrix: Mat4,
) -> Range<usize> {
    let prepared = geometry::prepare(mesh, node_matrix);

    let has_uv = [
        !mesh.uv_layers.is_empty(),
        mesh.uv_layers.len() > 1,
        mesh.uv_layers.len() > 2,
    ];
    let has_colors = mesh.colors.is_some();
    built.has_colors |= has_colors;
    for (flag, present) in built.has_uv.iter_mut().zip(has_uv) {
        *flag |= present;
    }

    let start = built.vertices.len();
    let mut dedup: HashMap<(u32, [u32; 17]), u32> = HashMap::new();

    for triangle in &prepared.triangles {
        let material = mesh
            .materials
            .get(triangle.material_slot as usize)
            .map(String::as_str)
            .unwrap_or("");
        let bucket = bucket_index[material];

        for corner in (0..3).rev() {
            let source_index = triangle.vertices[corner];
            let source_loop = triangle.loops[corner];

            let normal = prepared.normals[source_loop as usize];
            let tangent = prepared.tangents[source_loop as usize];
            let uv = [0, 1, 2].map(|layer| {
                mesh.uv_layers
                    .get(layer)
                    .map(|uvs| uvs[source_loop as usize])
                    .unwrap_or(Vec2::ZERO)
            });
            let color = mesh
                .colors
                .as_ref()
                .map(|colors| colors[source_loop as usize])
                .unwrap_or(Vec4::ONE);

            let key = (source_index, attribute_key(normal, tangent, &uv, color));
            let index = *dedup.entry(key).or_insert_with(|| {
                let index = built.vertices.len() as u32;
                built.vertices.push(BuildVertex {
                    source_index,
                    source_loop,
                    position: prepared.positions[source_index as usize],
                    normal,
                    tangent,
                    uv,
                    color,
                });
                index
            });
            buckets[bucket].indices.push(index);
        }
    }

    start..built.vertices.len()
}

/// Bit pattern of the dedup attribute tuple. Position is deliberately
/// excluded: for a static vertex it is fully determined by the source
/// index.
fn attribute_key(normal: Vec3, tangent: Vec4, uv: &[Vec2; 3], color: Vec4) -> [u32; 17] {
    let mut key = [0u32; 17];
    let mut cursor = 0;
    let mut push = |value: f32| {
        key[cursor] = value.to_bits();
        cursor += 1;
    };
    for v in normal.to_array() {
        push(v);
    }
    for v in tangent.to_array() {
        push(v);
    }
    for layer in uv {
        push(layer.x);
        push(layer.y);
    }
    for v in color.to_array() {
        push(v);
    }
    key
}

/// Distinct material names referenced by the contributing objects, in
/// first-reference order. The empty string stands in for "no material
/// slot".
fn used_materials(scene: &Scene, objects: impl Iterator<Item = ObjectId>) -> Vec<String> {
    let mut materials: Vec<String> = Vec::new();
    for object in objects {
        let scene_object = scene.object(object);
        if scene_object.kind != ObjectKind::Mesh {
            continue;
        }
        let Some(mesh) = scene_object.mesh.as_ref() else {
            continue;
        };
        if mesh.materials.is_empty() {
            if !materials.iter().any(String::is_empty) {
                materials.push(String::new());
            }
        } else {
            for polygon in &mesh.polygons {
                let name = mesh
                    .materials
                    .get(polygon.material_slot as usize)
                    .cloned()
                    .unwrap_or_default();
                if !materials.contains(&name) {
                    materials.push(name);
                }
            }
        }
    }
    materials
}

fn save_node_transform(node: &mut ModelNode, transform: Mat4) {
    let (scale, rotation, translation) = transform.to_scale_rotation_translation();
    node.position = convert::convert_vector(translation);
    node.rotation = convert::convert_quat(rotation);
    node.scale = convert::convert_scale(scale);
}

fn save_node_vertices(node: &mut ModelNode, built: &BuiltNode) {
    let positions: Vec<Vec3> = built
        .vertices
        .iter()
        .map(|v| convert::convert_vector(v.position))
        .collect();
    let normals: Vec<Vec3> = built
        .vertices
        .iter()
        .map(|v| convert::convert_vector(v.normal))
        .collect();
    let tangents: Vec<Vec4> = built
        .vertices
        .iter()
        .map(|v| convert::convert_tangent(v.tangent))
        .collect();

    node.vertex_count = built.vertices.len() as u32;
    node.vertex_properties
        .push(VertexProperty::from_vec3("position", &positions));
    node.vertex_properties
        .push(VertexProperty::from_vec3("normal", &normals));
    node.vertex_properties
        .push(VertexProperty::from_vec4("tangent", &tangents));

    if built.has_colors {
        let colors: Vec<Vec4> = built.vertices.iter().map(|v| v.color).collect();
        node.vertex_properties
            .push(VertexProperty::from_vec4("color", &colors));
    }
    for layer in 0..3 {
        if built.has_uv[layer] {
            let uvs: Vec<Vec2> = built.vertices.iter().map(|v| v.uv[layer]).collect();
            node.vertex_properties
                .push(VertexProperty::from_vec2(&format!("uv{layer}"), &uvs));
        }
    }

    node.meshes = built.buckets.clone();
}
