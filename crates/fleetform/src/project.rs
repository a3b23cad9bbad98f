use colored::Colorize;
use fleetform_cloud::{FileStateStore, ProviderRegistry, RetryConfig};
use fleetform_cloud_memory::{CLOUD_FILE, MemoryCloud};
use fleetform_config::{ConfigError, EngineSettings};
use fleetform_core::{ResourceGraph, SchemaRegistry};
use std::path::{Path, PathBuf};

/// Everything a command needs to know about the current project
pub struct Project {
    /// Directory that owns `.fleetform/`
    pub root: PathBuf,
    /// `None` when no declaration file was found; state commands still work
    pub declaration: Option<PathBuf>,
    pub settings: EngineSettings,
    pub registry: SchemaRegistry,
}

impl Project {
    pub fn discover(file: Option<&Path>) -> anyhow::Result<Self> {
        let declaration = match file {
            Some(path) if path.exists() => Some(path.to_path_buf()),
            Some(path) => anyhow::bail!("declaration file not found: {}", path.display()),
            None => match fleetform_config::find_declaration_file() {
                Ok(path) => Some(path),
                Err(ConfigError::DeclarationFileNotFound) => None,
                Err(e) => return Err(e.into()),
            },
        };

        let root = match &declaration {
            Some(path) => fleetform_config::project_root(path),
            None => std::env::current_dir()?,
        };
        let settings = EngineSettings::load(&root)?;
        tracing::debug!("project root: {}", root.display());

        Ok(Self {
            root,
            declaration,
            settings,
            registry: SchemaRegistry::builtin(),
        })
    }

    pub fn declaration(&self) -> anyhow::Result<&Path> {
        self.declaration
            .as_deref()
            .ok_or_else(|| ConfigError::DeclarationFileNotFound.into())
    }

    pub fn graph(&self) -> anyhow::Result<ResourceGraph> {
        let path = self.declaration()?;
        Ok(fleetform_core::load_graph(path, &self.registry)?)
    }

    pub fn store(&self) -> FileStateStore {
        FileStateStore::new(&self.root).with_lock_timeout(self.settings.lock_timeout())
    }

    pub async fn cloud(&self) -> anyhow::Result<MemoryCloud> {
        Ok(MemoryCloud::open(self.root.join(CLOUD_FILE)).await?)
    }

    pub fn providers(&self, cloud: &MemoryCloud) -> ProviderRegistry {
        fleetform_cloud_memory::providers(&self.registry, cloud)
    }

    pub fn retry(&self) -> RetryConfig {
        let retry = &self.settings.retry;
        RetryConfig {
            max_attempts: retry.max_attempts.max(1),
            initial_delay: retry.initial_delay(),
            max_delay: retry.max_delay(),
            backoff_multiplier: retry.backoff_multiplier,
        }
    }

    /// Prints which declaration file is in use
    pub fn print_declaration(&self) {
        if let Some(path) = &self.declaration {
            println!("Declarations: {}", path.display().to_string().cyan());
        }
    }
}
