//! Plugin manager
//!
//! Plugins register with a manifest (name, version, framework requirement,
//! dependencies, optional route prefix, config schema). Enabling a plugin
//! gates on the framework version, resolves and recursively enables
//! dependencies, validates options against the schema, and runs the
//! lifecycle (`before_apply` / `apply` / `after_apply`) with hook events
//! around it. Failures emit `plugin_error` and propagate.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use takagi_bus::{EventBus, Hooks};
use takagi_core::{ContentCodecs, Registries};
use takagi_router::{Context, HandlerResult, ObserveRegistry, RouteOptions, Router, RouterError};

/// Plugin options, keyed by config name.
pub type OptionMap = serde_json::Map<String, Value>;

/// Value type a config key accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// Validation rules for one config key. Extra keys not in the schema pass
/// through untouched.
#[derive(Clone, Default)]
pub struct FieldSpec {
    pub kind: Option<FieldKind>,
    pub required: bool,
    pub default: Option<Value>,
    /// Accepted values (`enum` in schema terms).
    pub allowed: Option<Vec<Value>>,
    /// Inclusive numeric range.
    pub range: Option<(f64, f64)>,
    /// Custom predicate.
    pub validate: Option<Arc<dyn Fn(&Value) -> bool + Send + Sync>>,
}

impl FieldSpec {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A plugin dependency: the named plugin must be registered, optionally at
/// a minimum version, and is enabled first when it is not already.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub min_version: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_version: None,
        }
    }

    pub fn at_least(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_version: Some(version.into()),
        }
    }
}

/// Plugin metadata.
#[derive(Clone, Default)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    /// Minimum framework version.
    pub requires: Option<String>,
    pub dependencies: Vec<Dependency>,
    /// Prefix applied to every route the plugin registers.
    pub route_prefix: Option<String>,
    pub config_schema: HashMap<String, FieldSpec>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }
}

/// A framework extension.
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> Manifest;

    fn before_apply(&self, _app: &AppContext) -> std::result::Result<(), PluginError> {
        Ok(())
    }

    /// Install the plugin: register routes, consumers, codecs, constants.
    fn apply(&self, app: &AppContext, options: &OptionMap) -> std::result::Result<(), PluginError>;

    fn after_apply(&self, _app: &AppContext) -> std::result::Result<(), PluginError> {
        Ok(())
    }

    /// Undo `apply` on disable.
    fn reverse(&self, _app: &AppContext) -> std::result::Result<(), PluginError> {
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin {plugin}: missing required config key `{key}`")]
    MissingKey { plugin: String, key: String },

    #[error("plugin {plugin}: invalid value for `{key}`: {reason}")]
    InvalidValue {
        plugin: String,
        key: String,
        reason: String,
    },

    #[error("plugin {0} is not registered")]
    NotRegistered(String),

    #[error("plugin {plugin} requires framework {required}, running {running}")]
    FrameworkTooOld {
        plugin: String,
        required: String,
        running: String,
    },

    #[error("plugin {plugin} depends on {dependency} >= {required}, found {found}")]
    DependencyVersion {
        plugin: String,
        dependency: String,
        required: String,
        found: String,
    },

    #[error("plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Capabilities handed to a plugin during its lifecycle. Route
/// registrations go through here so the plugin's route prefix applies.
pub struct AppContext {
    router: Arc<Router>,
    bus: Arc<EventBus>,
    codecs: Arc<ContentCodecs>,
    registries: Arc<Registries>,
    observe: Arc<ObserveRegistry>,
    prefix: Option<String>,
}

impl AppContext {
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn codecs(&self) -> &Arc<ContentCodecs> {
        &self.codecs
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn observe(&self) -> &Arc<ObserveRegistry> {
        &self.observe
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    fn prefixed(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches('/')),
            None => path.to_string(),
        }
    }

    /// Register a route under the plugin's prefix.
    pub fn route<F>(
        &self,
        method: &str,
        path: &str,
        options: RouteOptions,
        handler: F,
    ) -> std::result::Result<(), RouterError>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.route(method, &self.prefixed(path), options, handler)
    }

    pub fn get<F>(&self, path: &str, handler: F) -> std::result::Result<(), RouterError>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("GET", path, RouteOptions::default(), handler)
    }

    pub fn post<F>(&self, path: &str, handler: F) -> std::result::Result<(), RouterError>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route("POST", path, RouteOptions::default(), handler)
    }

    pub fn observable<F>(&self, path: &str, handler: F) -> std::result::Result<(), RouterError>
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.observable(&self.prefixed(path), handler)
    }
}

#[derive(Default)]
struct PluginTables {
    registered: HashMap<String, Arc<dyn Plugin>>,
    enabled: HashSet<String>,
}

/// Mutex-protected plugin registry and lifecycle driver.
pub struct PluginManager {
    tables: Mutex<PluginTables>,
    framework_version: (u64, u64, u64),
    hooks: Arc<Hooks>,
    router: Arc<Router>,
    bus: Arc<EventBus>,
    codecs: Arc<ContentCodecs>,
    registries: Arc<Registries>,
    observe: Arc<ObserveRegistry>,
}

impl PluginManager {
    pub fn new(
        hooks: Arc<Hooks>,
        router: Arc<Router>,
        bus: Arc<EventBus>,
        codecs: Arc<ContentCodecs>,
        registries: Arc<Registries>,
        observe: Arc<ObserveRegistry>,
    ) -> Self {
        Self {
            tables: Mutex::new(PluginTables::default()),
            framework_version: parse_version(env!("CARGO_PKG_VERSION")),
            hooks,
            router,
            bus,
            codecs,
            registries,
            observe,
        }
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.manifest().name;
        debug!("plugin registered: {}", name);
        self.tables.lock().registered.insert(name, plugin);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.tables.lock().enabled.contains(name)
    }

    pub fn enabled_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().enabled.iter().cloned().collect();
        names.sort();
        names
    }

    /// Enable a plugin with the given options.
    pub fn enable(&self, name: &str, options: OptionMap) -> std::result::Result<(), PluginError> {
        if self.is_enabled(name) {
            return Ok(());
        }

        let plugin = self
            .tables
            .lock()
            .registered
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;
        let manifest = plugin.manifest();

        let result = self.enable_inner(&plugin, &manifest, options);
        if let Err(e) = &result {
            self.hooks.emit(
                "plugin_error",
                json!({ "plugin": manifest.name, "error": e.to_string() }),
            );
        }
        result
    }

    fn enable_inner(
        &self,
        plugin: &Arc<dyn Plugin>,
        manifest: &Manifest,
        options: OptionMap,
    ) -> std::result::Result<(), PluginError> {
        if let Some(required) = &manifest.requires {
            if self.framework_version < parse_version(required) {
                return Err(PluginError::FrameworkTooOld {
                    plugin: manifest.name.clone(),
                    required: required.clone(),
                    running: env!("CARGO_PKG_VERSION").to_string(),
                });
            }
        }

        for dependency in &manifest.dependencies {
            self.resolve_dependency(&manifest.name, dependency)?;
        }

        let options = validate_options(manifest, options)?;

        let app = AppContext {
            router: self.router.clone(),
            bus: self.bus.clone(),
            codecs: self.codecs.clone(),
            registries: self.registries.clone(),
            observe: self.observe.clone(),
            prefix: manifest.route_prefix.clone(),
        };

        self.hooks
            .emit("plugin_enabling", json!({ "plugin": manifest.name }));
        plugin.before_apply(&app)?;
        plugin.apply(&app, &options)?;
        plugin.after_apply(&app)?;

        self.tables.lock().enabled.insert(manifest.name.clone());
        info!("plugin enabled: {} {}", manifest.name, manifest.version);
        self.hooks
            .emit("plugin_enabled", json!({ "plugin": manifest.name }));
        Ok(())
    }

    fn resolve_dependency(
        &self,
        plugin: &str,
        dependency: &Dependency,
    ) -> std::result::Result<(), PluginError> {
        let dep_plugin = self
            .tables
            .lock()
            .registered
            .get(&dependency.name)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered(dependency.name.clone()))?;

        if let Some(required) = &dependency.min_version {
            let found = dep_plugin.manifest().version;
            if parse_version(&found) < parse_version(required) {
                return Err(PluginError::DependencyVersion {
                    plugin: plugin.to_string(),
                    dependency: dependency.name.clone(),
                    required: required.clone(),
                    found,
                });
            }
        }

        if !self.is_enabled(&dependency.name) {
            self.enable(&dependency.name, OptionMap::new())?;
        }
        Ok(())
    }

    /// Disable an enabled plugin, running its `reverse` lifecycle.
    pub fn disable(&self, name: &str) -> std::result::Result<(), PluginError> {
        if !self.is_enabled(name) {
            return Ok(());
        }
        let plugin = self
            .tables
            .lock()
            .registered
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;
        let manifest = plugin.manifest();

        let app = AppContext {
            router: self.router.clone(),
            bus: self.bus.clone(),
            codecs: self.codecs.clone(),
            registries: self.registries.clone(),
            observe: self.observe.clone(),
            prefix: manifest.route_prefix.clone(),
        };

        self.hooks
            .emit("plugin_disabling", json!({ "plugin": manifest.name }));
        let result = plugin.reverse(&app);
        if let Err(e) = &result {
            self.hooks.emit(
                "plugin_error",
                json!({ "plugin": manifest.name, "error": e.to_string() }),
            );
        }
        result?;

        self.tables.lock().enabled.remove(name);
        info!("plugin disabled: {}", name);
        self.hooks
            .emit("plugin_disabled", json!({ "plugin": manifest.name }));
        Ok(())
    }
}

/// Check options against the schema, filling defaults. Extra keys pass.
fn validate_options(
    manifest: &Manifest,
    mut options: OptionMap,
) -> std::result::Result<OptionMap, PluginError> {
    for (key, spec) in &manifest.config_schema {
        let value = match options.get(key) {
            Some(value) => value.clone(),
            None => match (&spec.default, spec.required) {
                (Some(default), _) => {
                    options.insert(key.clone(), default.clone());
                    default.clone()
                }
                (None, true) => {
                    return Err(PluginError::MissingKey {
                        plugin: manifest.name.clone(),
                        key: key.clone(),
                    });
                }
                (None, false) => continue,
            },
        };

        if let Some(kind) = &spec.kind {
            if !kind.accepts(&value) {
                return Err(PluginError::InvalidValue {
                    plugin: manifest.name.clone(),
                    key: key.clone(),
                    reason: format!("expected {kind:?}"),
                });
            }
        }

        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(&value) {
                return Err(PluginError::InvalidValue {
                    plugin: manifest.name.clone(),
                    key: key.clone(),
                    reason: "not one of the allowed values".to_string(),
                });
            }
        }

        if let Some((min, max)) = spec.range {
            let number = value.as_f64().ok_or_else(|| PluginError::InvalidValue {
                plugin: manifest.name.clone(),
                key: key.clone(),
                reason: "range constraint on a non-numeric value".to_string(),
            })?;
            if number < min || number > max {
                return Err(PluginError::InvalidValue {
                    plugin: manifest.name.clone(),
                    key: key.clone(),
                    reason: format!("{number} outside [{min}, {max}]"),
                });
            }
        }

        if let Some(validate) = &spec.validate {
            if !validate(&value) {
                return Err(PluginError::InvalidValue {
                    plugin: manifest.name.clone(),
                    key: key.clone(),
                    reason: "rejected by validator".to_string(),
                });
            }
        }
    }
    Ok(options)
}

/// Parse `major.minor.patch`; missing fields count as zero.
fn parse_version(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
