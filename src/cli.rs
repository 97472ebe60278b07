use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manifold - deployment compiler
#[derive(Parser, Debug)]
#[command(name = "manifold")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile one deployable unit into a manifest stream
    Build {
        /// Project root (the directory holding project.yml and apps/)
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Name of the deployable unit under apps/
        #[arg(short, long)]
        unit: String,

        /// Root of the staged file tree for file/dir/glob sources
        #[arg(long, default_value = ".")]
        staged: PathBuf,

        /// Write the manifest stream here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}
