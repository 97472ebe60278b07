//! Manifold CLI - deployment compiler
//!
//! Usage: manifold build --project <dir> --unit <name>
//!
//! Composes the unit's configuration layers, validates the result and
//! writes the synthesized manifest stream. Everything interesting
//! happens in the library; this is a thin entry point.

use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use manifold::plugins::{PluginResolver, StandardResolver};
use manifold::staging::StagedTree;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            project,
            unit,
            staged,
            out,
        } => {
            let resolver: Rc<dyn PluginResolver> = Rc::new(StandardResolver::new());
            let composed = manifold::compose_unit(&project, &unit, resolver)
                .with_context(|| format!("composing unit '{unit}'"))?;
            let app = manifold::validate(&composed.document)
                .with_context(|| format!("validating unit '{unit}'"))?;
            let resources = manifold::synthesize(&app, &composed.env, &StagedTree::new(staged))
                .with_context(|| format!("synthesizing unit '{unit}'"))?;
            let stream = manifold::to_yaml_stream(&resources)?;

            match out {
                Some(path) => std::fs::write(&path, stream)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{stream}"),
            }
            Ok(())
        }
    }
}
