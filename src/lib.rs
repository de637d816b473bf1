//! arbor-export library
//!
//! Converts an in-memory scene graph (objects with transforms, polygon
//! meshes and keyframed animation) into a single compressed .arbormesh
//! model file: hierarchy flattening with an object-merging policy,
//! per-material vertex deduplication, rigid and dense animation baking,
//! axis-system conversion and a typed-attribute binary encoding.

pub mod animation;
pub mod builder;
pub mod convert;
pub mod export;
pub mod format;
pub mod geometry;
pub mod hierarchy;
pub mod manifest;
pub mod model;
pub mod scene;

// Re-export format constants
pub use format::{MODEL_EXT, MODEL_MAGIC, MODEL_VERSION};

// Re-export the pipeline entry points
pub use export::{export_model, export_scene_to_file, export_to_file, ExportSettings};

// Re-export key scene types for host implementations
pub use scene::{
    EvaluatedMesh, KeyframeEvaluator, ObjectId, ObjectKind, PlaybackState, PoseEvaluator, Scene,
    SceneObject,
};

pub use model::{Model, ModelNode, VertexProperty};
