//! arbor-export - Arbor asset export tool
//!
//! Converts scene files (glTF/GLB) to compressed .arbormesh model files.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use arbor_export::{export, format, manifest, scene};

#[derive(Parser)]
#[command(name = "arbor-export")]
#[command(about = "Arbor asset export tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a single scene file
    Export {
        /// Input scene file (glTF/GLB)
        input: PathBuf,

        /// Output .arbormesh file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Root node name (default: input file stem)
        #[arg(short, long)]
        root: Option<String>,

        /// Disable object merging
        #[arg(long)]
        no_merge: bool,

        /// Bake every stored clip instead of one whole-range animation
        #[arg(long)]
        per_clip: bool,

        /// Bake dense vertex animation where possible
        #[arg(long)]
        vertex_animations: bool,
    },

    /// Build every model from a manifest file
    Build {
        /// Path to models.toml manifest
        #[arg(default_value = "models.toml")]
        manifest: PathBuf,

        /// Output directory (overrides manifest)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a manifest without building
    Check {
        /// Path to models.toml manifest
        #[arg(default_value = "models.toml")]
        manifest: PathBuf,
    },

    /// List animation clips in a scene file
    Clips {
        /// Input scene file (glTF/GLB)
        input: PathBuf,
    },

    /// Summarize a written .arbormesh file
    Info {
        /// Input .arbormesh file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            input,
            output,
            root,
            no_merge,
            per_clip,
            vertex_animations,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension(format::MODEL_EXT));
            let root = root.unwrap_or_else(|| {
                input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "model".to_string())
            });
            tracing::info!("Converting {:?} -> {:?}", input, output);

            let settings = export::ExportSettings {
                merge_meshes: !no_merge,
                single_animation: !per_clip,
                use_vertex_animations: vertex_animations,
            };
            let loaded = scene::gltf::load_scene(&input)?;
            export::export_scene_to_file(&loaded, &root, &settings, &output)?;
            tracing::info!("Done!");
        }

        Commands::Build { manifest, output } => {
            tracing::info!("Building models from {:?}", manifest);
            let config = manifest::load_manifest(&manifest)?;
            manifest::build_all(&config, output.as_deref())?;
            tracing::info!("Build complete!");
        }

        Commands::Check { manifest } => {
            tracing::info!("Checking manifest {:?}", manifest);
            let config = manifest::load_manifest(&manifest)?;
            manifest::validate(&config)?;
            tracing::info!("Manifest is valid!");
        }

        Commands::Clips { input } => {
            scene::gltf::list_clips(&input)?;
        }

        Commands::Info { input } => {
            let model = format::read_model_file(&input)?;
            tracing::info!("Model {:?}: {} node(s)", input, model.nodes.len());
            for (i, node) in model.nodes.iter().enumerate() {
                tracing::info!(
                    "  [{}] '{}' parent={} vertices={} meshes={} vertex-anim={} node-anim={}",
                    i,
                    node.name,
                    node.parent,
                    node.vertex_count,
                    node.meshes.len(),
                    node.vertex_animations.len(),
                    node.node_animations.len()
                );
            }
        }
    }

    Ok(())
}
