//! In-memory registries for Apps, Functions, Projects and AppConfigurations.
//!
//! Apps and Functions are read-only at runtime, created by an administrative
//! upsert (the TOML catalog loader here). AppConfigurations are per-project
//! mutable records with last-write-wins semantics.

use super::{App, AppConfiguration, FunctionDefinition, Project};
use crate::error::PlatformError;
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

/// Registry of App and Function definitions.
pub struct AppRegistry {
    apps: DashMap<String, App>,
    functions: DashMap<String, FunctionDefinition>,
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppRegistry {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
            functions: DashMap::new(),
        }
    }

    /// Register (or replace) an App definition.
    ///
    /// Enforces the invariant that default credentials only exist for
    /// supported schemes.
    pub fn register_app(&self, app: App) -> Result<(), PlatformError> {
        app.validate()?;
        self.apps.insert(app.name.clone(), app);
        Ok(())
    }

    /// Register (or replace) a Function definition. The owning App must
    /// already be registered.
    pub fn register_function(&self, function: FunctionDefinition) -> Result<(), PlatformError> {
        if !self.apps.contains_key(&function.app_name) {
            return Err(PlatformError::AppNotFound(format!(
                "App '{}' not found for function '{}'",
                function.app_name, function.name
            )));
        }
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    pub fn get_app(&self, name: &str) -> Option<App> {
        self.apps.get(name).map(|a| a.clone())
    }

    pub fn get_function(&self, name: &str) -> Option<FunctionDefinition> {
        self.functions.get(name).map(|f| f.clone())
    }

    /// All registered App names, sorted.
    pub fn list_app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apps.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Load an app catalog from TOML. Returns (apps, functions) counts.
    ///
    /// Catalog format:
    /// ```toml
    /// [[apps]]
    /// name = "GITHUB"
    /// [apps.security_schemes.api_key]
    /// location = "header"
    /// name = "Authorization"
    ///
    /// [[functions]]
    /// name = "GITHUB__GET_REPO"
    /// app_name = "GITHUB"
    /// [functions.protocol]
    /// method = "GET"
    /// server_url = "https://api.github.com"
    /// path = "/repos/{owner}/{repo}"
    /// ```
    pub fn load_catalog_toml(&self, raw: &str) -> Result<(usize, usize)> {
        #[derive(Deserialize)]
        struct Catalog {
            #[serde(default)]
            apps: Vec<App>,
            #[serde(default)]
            functions: Vec<FunctionDefinition>,
        }

        let catalog: Catalog = toml::from_str(raw).context("Failed to parse app catalog TOML")?;
        let (app_count, function_count) = (catalog.apps.len(), catalog.functions.len());

        for app in catalog.apps {
            self.register_app(app)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }
        for function in catalog.functions {
            self.register_function(function)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }

        tracing::info!(
            apps = app_count,
            functions = function_count,
            "App catalog loaded"
        );
        Ok((app_count, function_count))
    }
}

/// Registry of Projects, keyed by API key for request authentication.
pub struct ProjectRegistry {
    by_api_key: DashMap<String, Project>,
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self {
            by_api_key: DashMap::new(),
        }
    }

    /// Create a new project with a fresh API key.
    pub fn create_project(&self, name: &str) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            api_key: format!("aci_{}", Uuid::new_v4().simple()),
        };
        self.by_api_key
            .insert(project.api_key.clone(), project.clone());
        project
    }

    /// Look up the project owning `api_key`.
    pub fn authenticate(&self, api_key: &str) -> Option<Project> {
        self.by_api_key.get(api_key).map(|p| p.clone())
    }
}

/// Registry of per-project AppConfigurations.
pub struct AppConfigurationRegistry {
    configs: DashMap<(Uuid, String), AppConfiguration>,
}

impl Default for AppConfigurationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppConfigurationRegistry {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }

    /// Insert or replace the configuration for (project, app).
    pub fn upsert(&self, config: AppConfiguration) {
        self.configs
            .insert((config.project_id, config.app_name.clone()), config);
    }

    pub fn get(&self, project_id: Uuid, app_name: &str) -> Option<AppConfiguration> {
        self.configs
            .get(&(project_id, app_name.to_string()))
            .map(|c| c.clone())
    }

    /// Remove the configuration. Returns whether one existed.
    pub fn delete(&self, project_id: Uuid, app_name: &str) -> bool {
        self.configs
            .remove(&(project_id, app_name.to_string()))
            .is_some()
    }

    pub fn list_for_project(&self, project_id: Uuid) -> Vec<AppConfiguration> {
        let mut configs: Vec<AppConfiguration> = self
            .configs
            .iter()
            .filter(|e| e.key().0 == project_id)
            .map(|e| e.value().clone())
            .collect();
        configs.sort_by(|a, b| a.app_name.cmp(&b.app_name));
        configs
    }
}
