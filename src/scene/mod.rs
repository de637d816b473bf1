//! Scene graph and host collaborator contracts
//!
//! The exporter core consumes the host scene through three surfaces:
//!
//! - [`Scene`]: an index-addressed object arena (identity, type, parent and
//!   child links, rest transforms, mesh geometry, rest action) plus the
//!   scene frame range and the stored clip list.
//! - [`PlaybackState`]: the explicit animation-sampling context - current
//!   frame and per-armature active clip. Baking mutates it to sample each
//!   frame and the export driver snapshots/restores it around the whole
//!   baking pass.
//! - [`PoseEvaluator`]: the posed-mesh evaluation service. Evaluated meshes
//!   are host-managed temporaries; [`with_evaluated`] scopes one evaluation
//!   and guarantees the release call even when the consumer fails.
//!
//! [`KeyframeEvaluator`] is the built-in host implementation: it poses
//! objects rigidly by sampling clip TRS channels.

pub mod gltf;

use anyhow::{bail, Result};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use hashbrown::HashMap;

/// Index of an object in its [`Scene`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scene object type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Mesh,
    Empty,
    Armature,
}

/// A polygon of a [`MeshSource`]: a material slot plus an ordered vertex
/// ring. Corner ("loop") indices are assigned sequentially across the mesh;
/// `loop_start` is this polygon's first corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub material_slot: u32,
    pub vertices: Vec<u32>,
    pub loop_start: u32,
}

impl Polygon {
    /// Corner index range of this polygon.
    pub fn loops(&self) -> std::ops::Range<u32> {
        self.loop_start..self.loop_start + self.vertices.len() as u32
    }
}

/// Rest geometry of a mesh object.
///
/// Per-corner attribute layers (normals, UVs, colors) are indexed by loop
/// index. Normals are optional; hosts without authored normals let the
/// evaluator derive flat polygon normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshSource {
    pub positions: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
    /// Material slot table; a polygon's `material_slot` indexes this.
    pub materials: Vec<String>,
    pub normals: Option<Vec<Vec3>>,
    pub uv_layers: Vec<Vec<Vec2>>,
    pub colors: Option<Vec<Vec4>>,
    loop_count: u32,
}

impl MeshSource {
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    /// Append a polygon, assigning its corner range.
    pub fn push_polygon(&mut self, material_slot: u32, vertices: Vec<u32>) {
        let loop_start = self.loop_count;
        self.loop_count += vertices.len() as u32;
        self.polygons.push(Polygon {
            material_slot,
            vertices,
            loop_start,
        });
    }

    /// Total number of polygon corners.
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }
}

/// Keyframe tracks of one clip channel, separated per transform component.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelKeys {
    Translations(Vec<(f32, Vec3)>),
    Rotations(Vec<(f32, Quat)>),
    Scales(Vec<(f32, Vec3)>),
}

/// One animated object within a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipChannel {
    pub target: ObjectId,
    pub keys: ChannelKeys,
}

/// A named, frame-ranged animation unit. The range is inclusive on both
/// ends; key times are expressed in frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub name: String,
    pub frame_start: i32,
    pub frame_end: i32,
    pub channels: Vec<ClipChannel>,
}

/// A scene object. `children` preserves authoring order; `action` is the
/// clip assigned to the object at rest.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    pub local_transform: Mat4,
    /// Parented to a bone of an armature rather than to the object itself.
    pub bone_parented: bool,
    pub action: Option<usize>,
    pub mesh: Option<MeshSource>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            children: Vec::new(),
            local_transform: Mat4::IDENTITY,
            bone_parented: false,
            action: None,
            mesh: None,
        }
    }
}

/// The scene graph arena plus frame-range and clip configuration.
#[derive(Debug, Clone)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub clips: Vec<Clip>,
    pub frame_start: i32,
    pub frame_end: i32,
    pub frame_rate: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            clips: Vec::new(),
            frame_start: 0,
            frame_end: 0,
            frame_rate: 30.0,
        }
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, linking it into its parent's child list.
    pub fn add(&mut self, object: SceneObject) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        if let Some(parent) = object.parent {
            self.objects[parent.index()].children.push(id);
        }
        self.objects.push(object);
        id
    }

    pub fn object(&self, id: ObjectId) -> &SceneObject {
        &self.objects[id.index()]
    }

    /// All object ids, in arena order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.objects.len() as u32).map(ObjectId)
    }

    pub fn armatures(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.ids()
            .filter(|id| self.object(*id).kind == ObjectKind::Armature)
    }

    /// Number of ancestors above `id`.
    pub fn ancestor_depth(&self, id: ObjectId) -> usize {
        let mut depth = 0;
        let mut current = self.object(id).parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.object(parent).parent;
        }
        depth
    }

    /// Rest-pose world transform (composed local transforms).
    pub fn rest_world(&self, id: ObjectId) -> Mat4 {
        let object = self.object(id);
        match object.parent {
            Some(parent) => self.rest_world(parent) * object.local_transform,
            None => object.local_transform,
        }
    }

    /// Rest local transform as composed during export: bone-parented
    /// objects report their transform relative to the owning armature
    /// object rather than to the bone.
    pub fn export_local(&self, id: ObjectId) -> Mat4 {
        let object = self.object(id);
        if object.bone_parented {
            if let Some(parent) = object.parent {
                return self.rest_world(parent).inverse() * self.rest_world(id);
            }
        }
        object.local_transform
    }
}

/// Snapshot of the playback state, restored after baking.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    frame: i32,
    active_clips: HashMap<ObjectId, Option<usize>>,
}

/// The animation-sampling context: current frame plus the active clip of
/// every armature. Non-armature objects always play their rest action.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub frame: i32,
    active_clips: HashMap<ObjectId, Option<usize>>,
}

impl PlaybackState {
    /// Build the rest playback state: every armature plays its rest action
    /// at the current frame.
    pub fn new(scene: &Scene) -> Self {
        let active_clips = scene
            .armatures()
            .map(|id| (id, scene.object(id).action))
            .collect();
        Self {
            frame: scene.frame_start,
            active_clips,
        }
    }

    pub fn set_frame(&mut self, frame: i32) {
        self.frame = frame;
    }

    /// Assign `clip` as the active clip of every armature.
    pub fn assign_to_armatures(&mut self, scene: &Scene, clip: usize) {
        for id in scene.armatures() {
            self.active_clips.insert(id, Some(clip));
        }
    }

    /// The clip currently driving `id`: the armature's active clip, or the
    /// object's rest action for everything else.
    pub fn effective_clip(&self, scene: &Scene, id: ObjectId) -> Option<usize> {
        let object = scene.object(id);
        if object.kind == ObjectKind::Armature {
            self.active_clips.get(&id).copied().flatten()
        } else {
            object.action
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            frame: self.frame,
            active_clips: self.active_clips.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: PlaybackSnapshot) {
        self.frame = snapshot.frame;
        self.active_clips = snapshot.active_clips;
    }
}

/// Whether `id` is driven by a clip in the current playback state.
pub fn is_object_animated(scene: &Scene, playback: &PlaybackState, id: ObjectId) -> bool {
    playback.effective_clip(scene, id).is_some()
}

/// Whether `id` or any of its ancestors is driven by a clip.
pub fn is_animated_in_hierarchy(scene: &Scene, playback: &PlaybackState, id: ObjectId) -> bool {
    let mut current = Some(id);
    while let Some(object) = current {
        if is_object_animated(scene, playback, object) {
            return true;
        }
        current = scene.object(object).parent;
    }
    false
}

/// Posed, object-space geometry of one object at one playback state,
/// produced and owned by the host evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatedMesh {
    pub object: ObjectId,
    pub positions: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
    /// Per-corner normals.
    pub normals: Vec<Vec3>,
    pub uv_layers: Vec<Vec<Vec2>>,
    pub colors: Option<Vec<Vec4>>,
    pub materials: Vec<String>,
    /// The object's world transform at the evaluated playback state.
    pub world_transform: Mat4,
}

/// Posed-mesh evaluation service provided by the host.
///
/// Every mesh returned by [`evaluate`](Self::evaluate) must be handed back
/// through [`release`](Self::release); the buffers are host managed.
pub trait PoseEvaluator {
    /// Evaluate `object` at `playback`, returning posed object-space
    /// geometry reflecting all active animation.
    fn evaluate(
        &mut self,
        scene: &Scene,
        object: ObjectId,
        playback: &PlaybackState,
    ) -> Result<EvaluatedMesh>;

    /// Release a mesh previously returned by `evaluate`.
    fn release(&mut self, scene: &Scene, mesh: EvaluatedMesh);

    /// The posed local transform of `object` relative to its parent (for
    /// bone-parented objects: relative to the owning armature object).
    fn local_transform(
        &mut self,
        scene: &Scene,
        object: ObjectId,
        playback: &PlaybackState,
    ) -> Result<Mat4>;
}

/// Evaluate `object`, run `f` on the result, and release the mesh whether
/// or not `f` succeeds.
pub fn with_evaluated<E, T>(
    evaluator: &mut E,
    scene: &Scene,
    object: ObjectId,
    playback: &PlaybackState,
    f: impl FnOnce(&EvaluatedMesh) -> Result<T>,
) -> Result<T>
where
    E: PoseEvaluator + ?Sized,
{
    let mesh = evaluator.evaluate(scene, object, playback)?;
    let result = f(&mesh);
    evaluator.release(scene, mesh);
    result
}

/// The built-in rigid scene host: poses objects by sampling clip TRS
/// channels with linear interpolation and shortest-path slerp.
///
/// Evaluation counters make the acquire/release discipline observable.
#[derive(Debug, Default)]
pub struct KeyframeEvaluator {
    pub evaluated_count: usize,
    pub released_count: usize,
}

impl KeyframeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn sampled_local(&self, scene: &Scene, id: ObjectId, playback: &PlaybackState) -> Mat4 {
        let object = scene.object(id);
        let (mut scale, mut rotation, mut translation) =
            object.local_transform.to_scale_rotation_translation();

        if let Some(clip) = playback.effective_clip(scene, id) {
            let frame = playback.frame as f32;
            for channel in &scene.clips[clip].channels {
                if channel.target != id {
                    continue;
                }
                match &channel.keys {
                    ChannelKeys::Translations(keys) => {
                        translation = interpolate_vec3(keys, frame, translation);
                    }
                    ChannelKeys::Rotations(keys) => {
                        rotation = interpolate_quat(keys, frame, rotation);
                    }
                    ChannelKeys::Scales(keys) => {
                        scale = interpolate_vec3(keys, frame, scale);
                    }
                }
            }
        }

        Mat4::from_scale_rotation_translation(scale, rotation, translation)
    }

    fn posed_world(&self, scene: &Scene, id: ObjectId, playback: &PlaybackState) -> Mat4 {
        let local = self.sampled_local(scene, id, playback);
        match scene.object(id).parent {
            Some(parent) => self.posed_world(scene, parent, playback) * local,
            None => local,
        }
    }
}

impl PoseEvaluator for KeyframeEvaluator {
    fn evaluate(
        &mut self,
        scene: &Scene,
        object: ObjectId,
        playback: &PlaybackState,
    ) -> Result<EvaluatedMesh> {
        let Some(source) = scene.object(object).mesh.as_ref() else {
            bail!("object '{}' has no mesh geometry", scene.object(object).name);
        };

        let normals = match &source.normals {
            Some(normals) => normals.clone(),
            None => flat_loop_normals(source),
        };

        self.evaluated_count += 1;
        Ok(EvaluatedMesh {
            object,
            positions: source.positions.clone(),
            polygons: source.polygons.clone(),
            normals,
            uv_layers: source.uv_layers.clone(),
            colors: source.colors.clone(),
            materials: source.materials.clone(),
            world_transform: self.posed_world(scene, object, playback),
        })
    }

    fn release(&mut self, _scene: &Scene, mesh: EvaluatedMesh) {
        self.released_count += 1;
        drop(mesh);
    }

    fn local_transform(
        &mut self,
        scene: &Scene,
        object: ObjectId,
        playback: &PlaybackState,
    ) -> Result<Mat4> {
        let obj = scene.object(object);
        if obj.bone_parented {
            if let Some(parent) = obj.parent {
                // Relative to the owning armature object, not the bone.
                let parent_world = self.posed_world(scene, parent, playback);
                let world = self.posed_world(scene, object, playback);
                return Ok(parent_world.inverse() * world);
            }
        }
        Ok(self.sampled_local(scene, object, playback))
    }
}

/// Flat per-corner normals derived from polygon geometry.
fn flat_loop_normals(source: &MeshSource) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; source.loop_count() as usize];
    for polygon in &source.polygons {
        let normal = polygon_normal(source, polygon);
        for loop_index in polygon.loops() {
            normals[loop_index as usize] = normal;
        }
    }
    normals
}

/// Newell's method; robust for non-convex and slightly non-planar rings.
fn polygon_normal(source: &MeshSource, polygon: &Polygon) -> Vec3 {
    let mut normal = Vec3::ZERO;
    let n = polygon.vertices.len();
    for i in 0..n {
        let a = source.positions[polygon.vertices[i] as usize];
        let b = source.positions[polygon.vertices[(i + 1) % n] as usize];
        normal += Vec3::new(
            (a.y - b.y) * (a.z + b.z),
            (a.z - b.z) * (a.x + b.x),
            (a.x - b.x) * (a.y + b.y),
        );
    }
    normal.normalize_or_zero()
}

/// Sample a keyframe track at `frame`, clamping outside the key range.
fn interpolate_vec3(keys: &[(f32, Vec3)], frame: f32, fallback: Vec3) -> Vec3 {
    if keys.is_empty() {
        return fallback;
    }
    let (i, factor) = keyframe_span(keys.len(), |k| keys[k].0, frame);
    keys[i].1.lerp(keys[i + 1].1, factor)
}

fn interpolate_quat(keys: &[(f32, Quat)], frame: f32, fallback: Quat) -> Quat {
    if keys.is_empty() {
        return fallback;
    }
    let (i, factor) = keyframe_span(keys.len(), |k| keys[k].0, frame);
    // glam's slerp takes the shortest path.
    keys[i].1.slerp(keys[i + 1].1, factor)
}

/// Find the keyframe pair spanning `t` and the interpolation factor within
/// it. Returns the last span with factor 1.0 when `t` runs past the end.
fn keyframe_span(len: usize, time: impl Fn(usize) -> f32, t: f32) -> (usize, f32) {
    if len == 1 {
        return (0, 0.0);
    }
    let mut i = 0;
    while i < len - 2 && time(i + 1) < t {
        i += 1;
    }
    let t0 = time(i);
    let t1 = time(i + 1);
    let factor = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
    (i, factor.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_key_translation(target: ObjectId) -> Clip {
        Clip {
            name: "move".to_string(),
            frame_start: 0,
            frame_end: 10,
            channels: vec![ClipChannel {
                target,
                keys: ChannelKeys::Translations(vec![
                    (0.0, Vec3::ZERO),
                    (10.0, Vec3::new(10.0, 0.0, 0.0)),
                ]),
            }],
        }
    }

    #[test]
    fn keyframe_sampling_interpolates_and_clamps() {
        let keys = vec![(0.0, Vec3::ZERO), (10.0, Vec3::new(10.0, 0.0, 0.0))];
        assert_eq!(interpolate_vec3(&keys, 5.0, Vec3::ZERO).x, 5.0);
        assert_eq!(interpolate_vec3(&keys, -3.0, Vec3::ZERO).x, 0.0);
        assert_eq!(interpolate_vec3(&keys, 20.0, Vec3::ZERO).x, 10.0);
    }

    #[test]
    fn sampled_local_follows_active_clip() {
        let mut scene = Scene::new();
        let id = scene.add(SceneObject::new("cube", ObjectKind::Mesh));
        scene.clips.push(two_key_translation(id));
        scene.objects[id.index()].action = Some(0);
        scene.frame_end = 10;

        let evaluator = KeyframeEvaluator::new();
        let mut playback = PlaybackState::new(&scene);
        playback.set_frame(5);
        let local = evaluator.sampled_local(&scene, id, &playback);
        let (_, _, translation) = local.to_scale_rotation_translation();
        assert!((translation.x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn playback_snapshot_round_trips() {
        let mut scene = Scene::new();
        let armature = scene.add(SceneObject::new("rig", ObjectKind::Armature));
        scene.clips.push(two_key_translation(armature));

        let mut playback = PlaybackState::new(&scene);
        let snapshot = playback.snapshot();

        playback.set_frame(42);
        playback.assign_to_armatures(&scene, 0);
        assert_eq!(playback.effective_clip(&scene, armature), Some(0));

        playback.restore(snapshot);
        assert_eq!(playback.frame, scene.frame_start);
        assert_eq!(playback.effective_clip(&scene, armature), None);
    }

    #[test]
    fn effective_clip_ignores_overrides_for_non_armatures() {
        let mut scene = Scene::new();
        let mesh = scene.add(SceneObject::new("cube", ObjectKind::Mesh));
        scene.clips.push(two_key_translation(mesh));
        scene.objects[mesh.index()].action = Some(0);

        let mut playback = PlaybackState::new(&scene);
        playback.assign_to_armatures(&scene, 0);
        // The mesh object keeps its rest action either way.
        assert_eq!(playback.effective_clip(&scene, mesh), Some(0));
    }

    #[test]
    fn animated_in_hierarchy_walks_ancestors() {
        let mut scene = Scene::new();
        let root = scene.add(SceneObject::new("root", ObjectKind::Empty));
        scene.clips.push(two_key_translation(root));
        scene.objects[root.index()].action = Some(0);

        let mut child = SceneObject::new("child", ObjectKind::Mesh);
        child.parent = Some(root);
        let child = scene.add(child);

        let playback = PlaybackState::new(&scene);
        assert!(is_animated_in_hierarchy(&scene, &playback, child));
        assert!(!is_object_animated(&scene, &playback, child));
    }

    #[test]
    fn scoped_evaluation_releases_on_error() {
        let mut scene = Scene::new();
        let mut mesh = MeshSource::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y]);
        mesh.push_polygon(0, vec![0, 1, 2]);
        mesh.materials.push(String::new());
        let mut object = SceneObject::new("tri", ObjectKind::Mesh);
        object.mesh = Some(mesh);
        let id = scene.add(object);

        let mut evaluator = KeyframeEvaluator::new();
        let playback = PlaybackState::new(&scene);
        let result: Result<()> = with_evaluated(&mut evaluator, &scene, id, &playback, |_| {
            bail!("consumer failure")
        });
        assert!(result.is_err());
        assert_eq!(evaluator.evaluated_count, 1);
        assert_eq!(evaluator.released_count, 1);
    }

    #[test]
    fn flat_normals_point_along_polygon_plane_normal() {
        let mut mesh = MeshSource::new(vec![
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]);
        mesh.push_polygon(0, vec![0, 1, 2, 3]);
        let normals = flat_loop_normals(&mesh);
        assert_eq!(normals.len(), 4);
        for n in normals {
            assert!((n - Vec3::Z).length() < 1e-6);
        }
    }
}
