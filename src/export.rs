//! Export pipeline orchestration
//!
//! Runs the full conversion for one scene: pin the rest frame, expand and
//! filter the selection, build the hierarchy, construct export nodes, bake
//! animation (restoring playback state unconditionally), then compress and
//! write the result.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;

use crate::animation::bake_animations;
use crate::builder::build_nodes;
use crate::format::write_model_file;
use crate::hierarchy::{exportable_objects, Hierarchy};
use crate::model::Model;
use crate::scene::{KeyframeEvaluator, ObjectId, PlaybackState, PoseEvaluator, Scene};

/// Recognized export options. Defaults mirror the interactive tool:
/// merging on, single whole-range animation on, dense vertex baking off.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSettings {
    /// Merge unmarked objects into their nearest root node.
    pub merge_meshes: bool,
    /// Bake one clip spanning the scene frame range instead of one pass
    /// per stored clip.
    pub single_animation: bool,
    /// Bake dense per-vertex animation where a node has animated geometry.
    pub use_vertex_animations: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            merge_meshes: true,
            single_animation: true,
            use_vertex_animations: false,
        }
    }
}

/// Export `selection` (plus its ancestors) into a model named `root_name`.
///
/// An empty or unexportable selection degrades to a one-node model with
/// zero vertices. Playback state is restored to its pre-bake values before
/// any baking failure propagates.
pub fn export_model<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &mut PlaybackState,
    selection: &[ObjectId],
    root_name: &str,
    settings: &ExportSettings,
) -> Result<Model> {
    // Rest pose is captured at frame 0.
    playback.set_frame(0);

    let objects = exportable_objects(scene, selection);
    let hierarchy = Hierarchy::build(scene, &objects, root_name, settings.merge_meshes);
    let (mut model, built) = build_nodes(scene, evaluator, playback, &hierarchy)?;

    let snapshot = playback.snapshot();
    let baked = bake_animations(
        scene, evaluator, playback, &hierarchy, &built, &mut model, settings,
    );
    playback.restore(snapshot);
    baked?;

    Ok(model)
}

/// Export and write a model file to `path`.
pub fn export_to_file<E: PoseEvaluator>(
    scene: &Scene,
    evaluator: &mut E,
    playback: &mut PlaybackState,
    selection: &[ObjectId],
    root_name: &str,
    settings: &ExportSettings,
    path: &Path,
) -> Result<()> {
    let start = Instant::now();
    let model = export_model(scene, evaluator, playback, selection, root_name, settings)?;
    write_model_file(&model, path)?;
    tracing::info!("Export finished in {:.2} seconds", start.elapsed().as_secs_f32());
    Ok(())
}

/// Export every object of `scene` through the built-in keyframe host.
pub fn export_scene_to_file(
    scene: &Scene,
    root_name: &str,
    settings: &ExportSettings,
    path: &Path,
) -> Result<()> {
    let mut evaluator = KeyframeEvaluator::new();
    let mut playback = PlaybackState::new(scene);
    let selection: Vec<ObjectId> = scene.ids().collect();
    export_to_file(
        scene,
        &mut evaluator,
        &mut playback,
        &selection,
        root_name,
        settings,
        path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_interactive_tool() {
        let settings = ExportSettings::default();
        assert!(settings.merge_meshes);
        assert!(settings.single_animation);
        assert!(!settings.use_vertex_animations);
    }

    #[test]
    fn empty_scene_exports_a_one_node_model() {
        let scene = Scene::new();
        let mut evaluator = KeyframeEvaluator::new();
        let mut playback = PlaybackState::new(&scene);
        let model = export_model(
            &scene,
            &mut evaluator,
            &mut playback,
            &[],
            "empty",
            &ExportSettings::default(),
        )
        .unwrap();

        assert_eq!(model.nodes.len(), 1);
        let root = &model.nodes[0];
        assert_eq!(root.name, "empty");
        assert_eq!(root.parent, -1);
        assert_eq!(root.vertex_count, 0);
        assert!(root.meshes.is_empty());
    }
}
