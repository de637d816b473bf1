//! Manifest parsing and batch export orchestration
//!
//! Parses models.toml and coordinates scene conversion:
//!
//! ```toml
//! [output]
//! dir = "assets/"
//!
//! [models.tree]
//! path = "source/tree.glb"
//! use_vertex_animations = true
//!
//! [models.rock]
//! path = "source/rock.glb"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::export::{export_scene_to_file, ExportSettings};
use crate::format::MODEL_EXT;
use crate::scene::gltf::load_scene;

/// Root manifest structure.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub output: OutputConfig,
    /// Keyed by model name; exports run in name order.
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("assets/")
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ModelEntry {
    Simple(PathBuf),
    Detailed {
        path: PathBuf,
        /// Root node name; defaults to the model's manifest key.
        #[serde(default)]
        root: Option<String>,
        #[serde(default)]
        merge_meshes: Option<bool>,
        #[serde(default)]
        single_animation: Option<bool>,
        #[serde(default)]
        use_vertex_animations: Option<bool>,
    },
}

impl ModelEntry {
    pub fn path(&self) -> &Path {
        match self {
            ModelEntry::Simple(path) => path,
            ModelEntry::Detailed { path, .. } => path,
        }
    }

    pub fn root_name<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            ModelEntry::Simple(_) => key,
            ModelEntry::Detailed { root, .. } => root.as_deref().unwrap_or(key),
        }
    }

    pub fn settings(&self) -> ExportSettings {
        let defaults = ExportSettings::default();
        match self {
            ModelEntry::Simple(_) => defaults,
            ModelEntry::Detailed {
                merge_meshes,
                single_animation,
                use_vertex_animations,
                ..
            } => ExportSettings {
                merge_meshes: merge_meshes.unwrap_or(defaults.merge_meshes),
                single_animation: single_animation.unwrap_or(defaults.single_animation),
                use_vertex_animations: use_vertex_animations
                    .unwrap_or(defaults.use_vertex_animations),
            },
        }
    }
}

/// Load and parse a manifest file. Relative source paths resolve against
/// the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {:?}", path))?;
    let mut manifest: Manifest =
        toml::from_str(&text).with_context(|| format!("Failed to parse manifest: {:?}", path))?;

    if let Some(base) = path.parent() {
        manifest.output.dir = base.join(&manifest.output.dir);
        for entry in manifest.models.values_mut() {
            let resolved = base.join(entry.path());
            match entry {
                ModelEntry::Simple(path) => *path = resolved,
                ModelEntry::Detailed { path, .. } => *path = resolved,
            }
        }
    }
    Ok(manifest)
}

/// Validate a manifest without converting anything.
pub fn validate(manifest: &Manifest) -> Result<()> {
    if manifest.models.is_empty() {
        bail!("Manifest lists no models");
    }
    for (name, entry) in &manifest.models {
        let path = entry.path();
        if !path.exists() {
            bail!("Model '{}': source does not exist: {:?}", name, path);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        if ext != "gltf" && ext != "glb" {
            bail!("Model '{}': unsupported source format: {:?}", name, path);
        }
    }
    Ok(())
}

/// Export every model in the manifest.
pub fn build_all(manifest: &Manifest, output_override: Option<&Path>) -> Result<()> {
    validate(manifest)?;

    let output_dir = output_override.unwrap_or(&manifest.output.dir);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

    for (name, entry) in &manifest.models {
        let output = output_dir.join(name).with_extension(MODEL_EXT);
        tracing::info!("Converting {:?} -> {:?}", entry.path(), output);

        let scene = load_scene(entry.path())?;
        export_scene_to_file(&scene, entry.root_name(name), &entry.settings(), &output)
            .with_context(|| format!("Failed to export model '{}'", name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and_detailed_entries() {
        let manifest: Manifest = toml::from_str(
            r#"
            [output]
            dir = "build/"

            [models]
            rock = "rock.glb"

            [models.tree]
            path = "tree.glb"
            root = "Tree"
            use_vertex_animations = true
            "#,
        )
        .unwrap();

        assert_eq!(manifest.output.dir, PathBuf::from("build/"));
        assert_eq!(manifest.models.len(), 2);

        let rock = &manifest.models["rock"];
        assert_eq!(rock.path(), Path::new("rock.glb"));
        assert_eq!(rock.root_name("rock"), "rock");
        assert!(rock.settings().merge_meshes);

        let tree = &manifest.models["tree"];
        assert_eq!(tree.root_name("tree"), "Tree");
        assert!(tree.settings().use_vertex_animations);
        assert!(tree.settings().single_animation);
    }

    #[test]
    fn empty_manifest_fails_validation() {
        let manifest: Manifest = toml::from_str("").unwrap();
        assert!(validate(&manifest).is_err());
    }

    #[test]
    fn default_output_directory_applies() {
        let manifest: Manifest = toml::from_str("[models]\nrock = \"rock.glb\"\n").unwrap();
        assert_eq!(manifest.output.dir, PathBuf::from("assets/"));
    }
}
