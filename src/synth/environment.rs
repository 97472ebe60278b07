//! Environment sub-generator
//!
//! Each environment spec becomes one ConfigMap (or Secret) holding the
//! variables, wired into the main container via `envFrom`.

use crate::error::ManifoldResult;
use crate::manifest::{ConfigMap, EnvFromSource, Resource, Secret};
use crate::schema::EnvSource;

use super::ComponentContext;

pub struct EnvOutputs {
    pub resources: Vec<Resource>,
    pub env_from: Vec<EnvFromSource>,
}

pub fn generate(ctx: &ComponentContext) -> ManifoldResult<EnvOutputs> {
    let mut outputs = EnvOutputs {
        resources: Vec::new(),
        env_from: Vec::new(),
    };

    for spec in &ctx.component.environment {
        let name = ctx.prefixed(&format!("environment-{}", spec.id));
        let data = match &spec.source {
            EnvSource::Inline(values) => values.clone(),
            EnvSource::File(file) => ctx.staged.read_env_file(file)?,
        };

        if spec.secret {
            outputs
                .resources
                .push(Resource::Secret(Secret::opaque(ctx.meta(&name), data)));
            outputs.env_from.push(EnvFromSource::secret(&name));
        } else {
            outputs
                .resources
                .push(Resource::ConfigMap(ConfigMap::new(ctx.meta(&name), data)));
            outputs.env_from.push(EnvFromSource::config_map(&name));
        }
    }

    Ok(outputs)
}
