//! Directive management commands.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::store::MetadataStore;

pub async fn run_list(config: &Config) -> Result<()> {
    let store = MetadataStore::open(&config.db.path).await?;
    let directives = store.list_directives().await?;
    store.close().await;

    for directive in &directives {
        let marker = if directive.is_default { "*" } else { " " };
        let preview: String = directive.template.chars().take(60).collect();
        println!("{} {:<20} {}", marker, directive.name, preview);
    }
    Ok(())
}

/// Add a directive whose template is given inline or read from a file.
pub async fn run_add(
    config: &Config,
    name: &str,
    template: Option<String>,
    file: Option<&Path>,
    make_default: bool,
) -> Result<()> {
    let template = match (template, file) {
        (Some(t), _) => t,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?,
        (None, None) => anyhow::bail!("provide a template with --template or --file"),
    };

    let store = MetadataStore::open(&config.db.path).await?;
    let result = async {
        store.add_directive(name, template.trim()).await?;
        if make_default {
            store.set_default_directive(name).await?;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;
    store.close().await;
    result?;

    println!("Added directive '{}'{}", name, if make_default { " (default)" } else { "" });
    Ok(())
}

pub async fn run_set_default(config: &Config, name: &str) -> Result<()> {
    let store = MetadataStore::open(&config.db.path).await?;
    let result = store.set_default_directive(name).await;
    store.close().await;
    result?;

    println!("Default directive: {}", name);
    Ok(())
}
