//! Renders the configured templates and writes them when their output
//! changes.

use std::path::{Path, PathBuf};

use log::{debug, info};
use minijinja::Environment;
use serde::Serialize;
use tokio::fs;

use crate::config::TemplateConfig;
use crate::error::TemplateError;

/// One template and the last content written to its destination.
#[derive(Debug)]
struct Template {
    name: String,
    source: PathBuf,
    destination: PathBuf,
    content: String,
}

/// The configured templates, parsed once at startup.
pub struct Templates {
    env: Environment<'static>,
    templates: Vec<Template>,
}

impl Templates {
    /// Reads and parses every template.
    ///
    /// The existing destination content becomes the baseline, so a restart
    /// with unchanged state does not rewrite anything.
    pub async fn load(configs: &[TemplateConfig]) -> Result<Self, TemplateError> {
        let mut env = environment();
        let mut templates = Vec::with_capacity(configs.len());

        for config in configs {
            let source = fs::read_to_string(&config.source)
                .await
                .map_err(|source| TemplateError::Read {
                    path: config.source.clone(),
                    source,
                })?;
            let name = template_name(&config.source, templates.len());
            env.add_template_owned(name.clone(), source)
                .map_err(|source| TemplateError::Parse {
                    path: config.source.clone(),
                    source,
                })?;

            info!(
                "Registered template from {}, writing to {}",
                config.source.display(),
                config.destination.display()
            );
            templates.push(Template {
                name,
                source: config.source.clone(),
                destination: config.destination.clone(),
                content: fs::read_to_string(&config.destination)
                    .await
                    .unwrap_or_default(),
            });
        }

        Ok(Self { env, templates })
    }

    /// Renders every template, writing those whose output changed.
    ///
    /// Returns whether any destination was written.
    pub async fn generate<S: Serialize>(&mut self, context: &S) -> Result<bool, TemplateError> {
        let mut updated = false;

        for template in &mut self.templates {
            debug!("Checking for updates to {}", template.source.display());
            let rendered = self
                .env
                .get_template(&template.name)
                .and_then(|t| t.render(context))
                .map_err(|source| TemplateError::Render {
                    path: template.source.clone(),
                    source,
                })?;

            if rendered == template.content {
                debug!(
                    "Not writing template to {} as content is the same",
                    template.destination.display()
                );
                continue;
            }

            info!("Writing updated template to {}", template.destination.display());
            fs::write(&template.destination, &rendered)
                .await
                .map_err(|source| TemplateError::Write {
                    path: template.destination.clone(),
                    source,
                })?;
            template.content = rendered;
            updated = true;
        }

        Ok(updated)
    }
}

/// Names a template after its file, disambiguated by position.
fn template_name(source: &Path, index: usize) -> String {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".to_string());
    format!("{}#{}", base, index)
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_filter("split", |input: String, sep: String| -> Vec<String> {
        input.split(sep.as_str()).map(str::to_string).collect()
    });
    env.add_filter("sortlines", |input: String| -> String {
        let mut lines: Vec<&str> = input.split('\n').collect();
        lines.sort_unstable();
        lines.join("\n")
    });
    env
}
