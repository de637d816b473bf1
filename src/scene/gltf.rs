//! glTF scene loading
//!
//! Builds a [`Scene`] from a glTF/GLB file: node hierarchy, mesh primitives
//! (positions, first UV set, vertex colors, material names) and animation
//! clips resampled to frame-indexed TRS channels.
//!
//! Skins and morph targets are not mapped; glTF files drive the exporter as
//! rigid scenes posed by the keyframe host.

use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use hashbrown::HashMap;
use std::path::Path;

use super::{
    ChannelKeys, Clip, ClipChannel, MeshSource, ObjectId, ObjectKind, Scene, SceneObject,
};

/// Default sample rate for resampled clips (frames per second).
const DEFAULT_FRAME_RATE: f32 = 30.0;

/// Load a glTF/GLB file as a scene.
pub fn load_scene(input: &Path) -> Result<Scene> {
    let (document, buffers, _images) =
        gltf::import(input).with_context(|| format!("Failed to load glTF: {:?}", input))?;

    let mut scene = Scene::new();
    scene.frame_rate = DEFAULT_FRAME_RATE;

    // glTF node index -> scene object id, filled during traversal.
    let mut object_ids: HashMap<usize, ObjectId> = HashMap::new();

    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .context("No scenes found in glTF file")?;
    for node in gltf_scene.nodes() {
        add_node(&mut scene, &mut object_ids, &buffers, &node, None)?;
    }

    for (index, animation) in document.animations().enumerate() {
        let clip = convert_clip(&animation, &buffers, &object_ids, index, scene.frame_rate)?;
        if clip.channels.is_empty() {
            continue;
        }
        scene.frame_end = scene.frame_end.max(clip.frame_end);
        scene.frame_start = scene.frame_start.min(clip.frame_start);
        let clip_index = scene.clips.len();
        // Rest assignment: every targeted object plays its first clip.
        for channel in &clip.channels {
            let object = &mut scene.objects[channel.target.index()];
            if object.action.is_none() {
                object.action = Some(clip_index);
            }
        }
        scene.clips.push(clip);
    }

    tracing::info!(
        "Loaded {:?}: {} object(s), {} clip(s)",
        input,
        scene.objects.len(),
        scene.clips.len()
    );
    Ok(scene)
}

/// List the animation clips of a glTF file.
pub fn list_clips(input: &Path) -> Result<()> {
    let scene = load_scene(input)?;
    if scene.clips.is_empty() {
        tracing::info!("No clips found in {:?}", input);
        return Ok(());
    }

    tracing::info!("Clips in {:?}:", input);
    for (i, clip) in scene.clips.iter().enumerate() {
        tracing::info!(
            "  [{}] '{}': frames {}..={}, {} channel(s)",
            i,
            clip.name,
            clip.frame_start,
            clip.frame_end,
            clip.channels.len()
        );
    }
    Ok(())
}

fn add_node(
    scene: &mut Scene,
    object_ids: &mut HashMap<usize, ObjectId>,
    buffers: &[gltf::buffer::Data],
    node: &gltf::Node,
    parent: Option<ObjectId>,
) -> Result<()> {
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node{}", node.index()));

    let (translation, rotation, scale) = node.transform().decomposed();
    let local_transform = Mat4::from_scale_rotation_translation(
        Vec3::from_array(scale),
        Quat::from_array(rotation),
        Vec3::from_array(translation),
    );

    let mesh = node
        .mesh()
        .map(|mesh| convert_mesh(&mesh, buffers))
        .transpose()?;

    let mut object = SceneObject::new(
        name,
        if mesh.is_some() {
            ObjectKind::Mesh
        } else {
            ObjectKind::Empty
        },
    );
    object.parent = parent;
    object.local_transform = local_transform;
    object.mesh = mesh;

    let id = scene.add(object);
    object_ids.insert(node.index(), id);

    for child in node.children() {
        add_node(scene, object_ids, buffers, &child, Some(id))?;
    }
    Ok(())
}

/// Convert a glTF mesh: primitives concatenate into one vertex array, each
/// primitive mapped to a material slot named after its material.
fn convert_mesh(mesh: &gltf::Mesh, buffers: &[gltf::buffer::Data]) -> Result<MeshSource> {
    let mut source = MeshSource::new(Vec::new());
    let mut loop_uvs: Vec<Vec2> = Vec::new();
    let mut loop_colors: Vec<Vec4> = Vec::new();
    let mut loop_normals: Vec<Vec3> = Vec::new();
    let mut any_uvs = false;
    let mut any_colors = false;
    let mut any_normals = false;

    for primitive in mesh.primitives() {
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .context("No positions in mesh primitive")?
            .collect();
        let uvs: Option<Vec<[f32; 2]>> = reader
            .read_tex_coords(0)
            .map(|iter| iter.into_f32().collect());
        let colors: Option<Vec<[f32; 4]>> = reader
            .read_colors(0)
            .map(|iter| iter.into_rgba_f32().collect());
        let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|iter| iter.collect());

        let indices: Vec<u32> = reader
            .read_indices()
            .map(|iter| iter.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());

        let material_name = primitive
            .material()
            .name()
            .unwrap_or_default()
            .to_string();
        let slot = match source.materials.iter().position(|m| *m == material_name) {
            Some(slot) => slot as u32,
            None => {
                source.materials.push(material_name);
                (source.materials.len() - 1) as u32
            }
        };

        any_uvs |= uvs.is_some();
        any_colors |= colors.is_some();
        any_normals |= normals.is_some();

        let base = source.positions.len() as u32;
        source
            .positions
            .extend(positions.iter().map(|p| Vec3::from_array(*p)));

        for triangle in indices.chunks_exact(3) {
            let ring: Vec<u32> = triangle.iter().map(|i| base + i).collect();
            for &corner in triangle {
                let corner = corner as usize;
                loop_uvs.push(
                    uvs.as_ref()
                        .map(|uv| Vec2::from_array(uv[corner]))
                        .unwrap_or(Vec2::ZERO),
                );
                loop_colors.push(
                    colors
                        .as_ref()
                        .map(|c| Vec4::from_array(c[corner]))
                        .unwrap_or(Vec4::ONE),
                );
                loop_normals.push(
                    normals
                        .as_ref()
                        .map(|n| Vec3::from_array(n[corner]).normalize_or_zero())
                        .unwrap_or(Vec3::ZERO),
                );
            }
            source.push_polygon(slot, ring);
        }
    }

    if any_uvs {
        source.uv_layers.push(loop_uvs);
    }
    if any_colors {
        source.colors = Some(loop_colors);
    }
    if any_normals {
        source.normals = Some(loop_normals);
    }
    Ok(source)
}

/// Resample one glTF animation into a frame-indexed clip.
fn convert_clip(
    animation: &gltf::Animation,
    buffers: &[gltf::buffer::Data],
    object_ids: &HashMap<usize, ObjectId>,
    index: usize,
    frame_rate: f32,
) -> Result<Clip> {
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("clip{}", index));

    let mut channels = Vec::new();
    let mut frame_start = i32::MAX;
    let mut frame_end = i32::MIN;

    for channel in animation.channels() {
        let Some(&target) = object_ids.get(&channel.target().node().index()) else {
            continue;
        };

        let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
        let frames: Vec<f32> = reader
            .read_inputs()
            .context("Animation channel has no input accessor")?
            .map(|t| t * frame_rate)
            .collect();
        if frames.is_empty() {
            continue;
        }
        frame_start = frame_start.min(frames[0].floor() as i32);
        frame_end = frame_end.max(frames[frames.len() - 1].ceil() as i32);

        let keys = match reader
            .read_outputs()
            .context("Animation channel has no output accessor")?
        {
            gltf::animation::util::ReadOutputs::Translations(values) => ChannelKeys::Translations(
                frames
                    .iter()
                    .copied()
                    .zip(values.map(|v| Vec3::from_array(v)))
                    .collect(),
            ),
            gltf::animation::util::ReadOutputs::Rotations(values) => ChannelKeys::Rotations(
                frames
                    .iter()
                    .copied()
                    .zip(values.into_f32().map(Quat::from_array))
                    .collect(),
            ),
            gltf::animation::util::ReadOutputs::Scales(values) => ChannelKeys::Scales(
                frames
                    .iter()
                    .copied()
                    .zip(values.map(|v| Vec3::from_array(v)))
                    .collect(),
            ),
            // Morph target weights have no rigid equivalent here.
            gltf::animation::util::ReadOutputs::MorphTargetWeights(_) => continue,
        };

        channels.push(ClipChannel { target, keys });
    }

    if channels.is_empty() {
        frame_start = 0;
        frame_end = 0;
    }
    Ok(Clip {
        name,
        frame_start,
        frame_end,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposed_trs_rebuilds_the_node_transform() {
        let translation = Vec3::new(1.0, 2.0, 3.0);
        let rotation = Quat::from_rotation_y(0.5);
        let scale = Vec3::new(2.0, 2.0, 2.0);
        let matrix = Mat4::from_scale_rotation_translation(scale, rotation, translation);

        let (s, r, t) = matrix.to_scale_rotation_translation();
        let rebuilt = Mat4::from_scale_rotation_translation(s, r, t);
        assert!(matrix.abs_diff_eq(rebuilt, 1e-5));
    }

    #[test]
    fn missing_file_surfaces_an_error() {
        let result = load_scene(Path::new("/nonexistent/model.glb"));
        assert!(result.is_err());
    }
}
