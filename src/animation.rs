//! Animation baking
//!
//! Samples animation into the model's per-node tracks, one pass per clip.
//! A node gets at most one track per clip, of one of two kinds:
//!
//! - **Vertex tracks** (dense baking): per-frame, per-vertex positional
//!   offsets from the rest pose plus an orientation quaternion rebuilt from
//!   the reposed normal/tangent frame. Only the node's trailing animated
//!   vertex run is baked.
//! - **Node tracks** (rigid baking): per-frame local translation, rotation
//!   and scale of the node's source object.
//!
//! Baking mutates the shared playback state frame by frame; the export
//! driver snapshots it beforehand and restores it unconditionally
//! afterwards.

use anyhow::Result;
use glam::{Mat3, Quat, Vec4};

use crate::builder::BuiltNode;
use crate::convert;
use crate::export::ExportSettings;
use crate::geometry;
use crate::hierarchy::Hierarchy;
use crate::model::{
    Model, NodeAnimation, TrsFrame, VertexAnimation, VertexFrame, VertexProperty,
};
use crate::scene::{
    is_animated_in_hierarchy, with_evaluated, ObjectKind, PlaybackState, PoseEvaluator, Scene,
};

/// One baking pass: a clip name, an inclusive frame range, and optionally
/// the stored clip to assign to every armature before sampling.
struct BakeClip {
    name: String,
    frame_start: i32,
    frame_end: i32,
    assign: Option<usize>,
}

/// Bake animation tracks into `model`.
///
/// With `single_animation` set, one synthesized clip spans the scene frame
/// range and armatures keep whatever clip they currently play. Otherwise
/// every stored clip is assigned to all armatures in turn and sampled over
/// its own frame range.
pub fn bake_animations<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &mut PlaybackState,
    hierarchy: &Hierarchy,
    built: &[BuiltNode],
    model: &mut Model,
    settings: &ExportSettings,
) -> Result<()> {
    if settings.single_animation {
        let clip = BakeClip {
            name: "Default".to_string(),
            frame_start: scene.frame_start,
            frame_end: scene.frame_end,
            assign: None,
        };
        bake_clip(scene, evaluator, playback, hierarchy, built, model, settings, &clip)?;
    } else {
        for (index, stored) in scene.clips.iter().enumerate() {
            let clip = BakeClip {
                name: stored.name.clone(),
                frame_start: stored.frame_start,
                frame_end: stored.frame_end,
                assign: Some(index),
            };
            bake_clip(scene, evaluator, playback, hierarchy, built, model, settings, &clip)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn bake_clip<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &mut PlaybackState,
    hierarchy: &Hierarchy,
    built: &[BuiltNode],
    model: &mut Model,
    settings: &ExportSettings,
    clip: &BakeClip,
) -> Result<()> {
    if let Some(stored) = clip.assign {
        playback.assign_to_armatures(scene, stored);
    }

    // Qualify nodes under the clip's playback state. A node with no
    // animated geometry for this clip produces no record at all.
    let mut vertex_nodes = Vec::new();
    let mut rigid_nodes = Vec::new();
    for (index, node) in built.iter().enumerate() {
        if !any_entry_animated(scene, playback, hierarchy, node) {
            continue;
        }
        if settings.use_vertex_animations && node.animated_vertex_count > 0 {
            model.nodes[index].vertex_animations.push(VertexAnimation {
                name: clip.name.clone(),
                framerate: scene.frame_rate,
                animated_vertex_count: node.animated_vertex_count as u32,
                frames: Vec::new(),
            });
            vertex_nodes.push(index);
        } else if qualifies_for_rigid_track(scene, playback, hierarchy, node) {
            model.nodes[index].node_animations.push(NodeAnimation {
                name: clip.name.clone(),
                framerate: scene.frame_rate,
                frames: Vec::new(),
            });
            rigid_nodes.push(index);
        }
    }

    if vertex_nodes.is_empty() && rigid_nodes.is_empty() {
        return Ok(());
    }

    tracing::info!(
        "Baking clip '{}': frames {}..={}, {} vertex track(s), {} node track(s)",
        clip.name,
        clip.frame_start,
        clip.frame_end,
        vertex_nodes.len(),
        rigid_nodes.len()
    );

    for frame in clip.frame_start..=clip.frame_end {
        playback.set_frame(frame);

        for &index in &vertex_nodes {
            let baked = bake_vertex_frame(scene, evaluator, playback, &built[index])?;
            if let Some(track) = model.nodes[index].vertex_animations.last_mut() {
                track.frames.push(baked);
            }
        }
        for &index in &rigid_nodes {
            let baked = bake_rigid_frame(scene, evaluator, playback, hierarchy, &built[index])?;
            if let Some((track, frame)) =
                model.nodes[index].node_animations.last_mut().zip(baked)
            {
                track.frames.push(frame);
            }
        }
    }

    Ok(())
}

/// Whether any contributing object of `node` is animated under the current
/// playback state, directly or through an ancestor.
fn any_entry_animated(
    scene: &Scene,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
    node: &BuiltNode,
) -> bool {
    hierarchy
        .node(node.node)
        .entries
        .iter()
        .any(|entry| is_animated_in_hierarchy(scene, playback, entry.object))
}

/// Rigid tracks apply to node roots backed by a non-armature object that is
/// keyframed (directly or through an ancestor) or bone-parented.
fn qualifies_for_rigid_track(
    scene: &Scene,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
    node: &BuiltNode,
) -> bool {
    let hierarchy_node = hierarchy.node(node.node);
    let Some(source) = hierarchy_node.source_object else {
        return false;
    };
    hierarchy_node.is_node_root
        && scene.object(source).kind != ObjectKind::Armature
        && (is_animated_in_hierarchy(scene, playback, source)
            || scene.object(source).bone_parented)
}

/// Bake one dense frame: re-evaluate every animated contributor, transform
/// its posed world-space geometry back into node space through the rest
/// captures, and record per-vertex offset and orientation.
fn bake_vertex_frame<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &PlaybackState,
    built: &BuiltNode,
) -> Result<VertexFrame> {
    let mut offsets = Vec::with_capacity(built.animated_vertex_count);
    let mut rotations = Vec::with_capacity(built.animated_vertex_count);

    for capture in &built.objects {
        if !capture.animated {
            continue;
        }

        with_evaluated(evaluator, scene, capture.object, playback, |mesh| {
            let prepared = geometry::prepare(mesh, mesh.world_transform);

            // Rest world space -> node space, captured at build time.
            let to_node = capture.node_matrix * capture.world_inverse;
            let (_, to_node_rotation, _) = to_node.to_scale_rotation_translation();

            for vertex in &built.vertices[capture.range.clone()] {
                let posed = prepared.positions[vertex.source_index as usize];
                let node_space = to_node.transform_point3(posed);
                let offset = node_space - vertex.position;

                let normal = to_node_rotation * prepared.normals[vertex.source_loop as usize];
                let tangent =
                    to_node_rotation * prepared.tangents[vertex.source_loop as usize].truncate();
                let bitangent = normal.cross(tangent);
                let rotation = Quat::from_mat3(&Mat3::from_cols(normal, tangent, bitangent));

                offsets.push(convert::convert_vector(offset));
                let rotation = convert::convert_quat(rotation);
                rotations.push(Vec4::new(rotation.x, rotation.y, rotation.z, rotation.w));
            }
            Ok(())
        })?;
    }

    Ok(VertexFrame {
        properties: vec![
            VertexProperty::from_vec3("offset", &offsets),
            VertexProperty::from_vec4("rotation", &rotations),
        ],
    })
}

/// Bake one rigid frame: the source object's posed local TRS.
fn bake_rigid_frame<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &PlaybackState,
    hierarchy: &Hierarchy,
    built: &BuiltNode,
) -> Result<Option<TrsFrame>> {
    let Some(source) = hierarchy.node(built.node).source_object else {
        return Ok(None);
    };
    let local = evaluator.local_transform(scene, source, playback)?;
    let (scale, rotation, translation) = local.to_scale_rotation_translation();
    Ok(Some(TrsFrame {
        position: convert::convert_vector(translation),
        rotation: convert::convert_quat(rotation),
        scale: convert::convert_scale(scale),
    }))
}
