//! Shared scene fixtures for the integration suite.

use arbor_export::scene::{
    ChannelKeys, Clip, ClipChannel, MeshSource, ObjectId, ObjectKind, Scene, SceneObject,
};
use glam::{Vec2, Vec3};

/// A unit quad in the XY plane with one UV layer and a single material.
pub fn quad_mesh(material: &str) -> MeshSource {
    let mut mesh = MeshSource::new(vec![
        Vec3::ZERO,
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ]);
    mesh.push_polygon(0, vec![0, 1, 2, 3]);
    mesh.materials.push(material.to_string());
    mesh.uv_layers.push(vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(0.0, 1.0),
    ]);
    mesh
}

/// Parent "#Root" empty with one child quad; the scenario scene of the
/// export pipeline tests.
pub fn root_and_quad() -> (Scene, ObjectId, ObjectId) {
    let mut scene = Scene::new();
    scene.frame_end = 10;
    let root = scene.add(SceneObject::new("#Root", ObjectKind::Empty));
    let mut child = SceneObject::new("quad", ObjectKind::Mesh);
    child.parent = Some(root);
    child.mesh = Some(quad_mesh("leaves"));
    let child = scene.add(child);
    (scene, root, child)
}

/// Keyframe `target` sliding along +X over `frame_start..=frame_end`.
pub fn slide_clip(name: &str, target: ObjectId, frame_start: i32, frame_end: i32) -> Clip {
    Clip {
        name: name.to_string(),
        frame_start,
        frame_end,
        channels: vec![ClipChannel {
            target,
            keys: ChannelKeys::Translations(vec![
                (frame_start as f32, Vec3::ZERO),
                (frame_end as f32, Vec3::new((frame_end - frame_start) as f32, 0.0, 0.0)),
            ]),
        }],
    }
}
