//! Plugin manager tests: schema validation, dependency resolution,
//! framework version gating, and route-prefix wrapping.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use takagi_server::{
    AppContext, Dependency, FieldSpec, Manifest, OptionMap, Plugin, PluginError, ServerConfig,
    Takagi,
};

fn takagi() -> Takagi {
    Takagi::new(ServerConfig::loopback())
}

struct BridgePlugin;

impl Plugin for BridgePlugin {
    fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new("bridge", "1.2.0");
        manifest
            .config_schema
            .insert("host".to_string(), FieldSpec::required());
        manifest
    }

    fn apply(&self, _app: &AppContext, options: &OptionMap) -> Result<(), PluginError> {
        assert!(options.contains_key("host"));
        Ok(())
    }
}

#[tokio::test]
async fn test_missing_required_key_names_plugin_and_key() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(BridgePlugin));

    let err = takagi.plugins().enable("bridge", OptionMap::new()).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("bridge"), "error should name the plugin: {text}");
    assert!(text.contains("host"), "error should name the key: {text}");
    assert!(!takagi.plugins().is_enabled("bridge"));
}

#[tokio::test]
async fn test_enable_with_valid_options() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(BridgePlugin));

    let mut options = OptionMap::new();
    options.insert("host".to_string(), json!("mqtt.local"));
    takagi.plugins().enable("bridge", options).unwrap();
    assert!(takagi.plugins().is_enabled("bridge"));

    // Enabling twice is a no-op.
    let mut options = OptionMap::new();
    options.insert("host".to_string(), json!("mqtt.local"));
    takagi.plugins().enable("bridge", options).unwrap();
}

struct PrefixedPlugin;

impl Plugin for PrefixedPlugin {
    fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new("metering", "0.1.0");
        manifest.route_prefix = Some("/metering".to_string());
        manifest
    }

    fn apply(&self, app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
        app.get("/usage", |ctx| ctx.json(json!({ "kwh": 12 })))?;
        Ok(())
    }
}

#[tokio::test]
async fn test_route_prefix_wrapping() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(PrefixedPlugin));
    takagi.plugins().enable("metering", OptionMap::new()).unwrap();

    assert!(takagi.router().lookup("GET", "/metering/usage").is_some());
    assert!(takagi.router().lookup("GET", "/usage").is_none());
}

struct BasePlugin {
    applied: Arc<AtomicUsize>,
}

impl Plugin for BasePlugin {
    fn manifest(&self) -> Manifest {
        Manifest::new("base", "2.0.0")
    }

    fn apply(&self, _app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct DependentPlugin;

impl Plugin for DependentPlugin {
    fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new("dependent", "1.0.0");
        manifest.dependencies = vec![Dependency::at_least("base", "1.5.0")];
        manifest
    }

    fn apply(&self, _app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_dependency_enabled_recursively() {
    let takagi = takagi();
    let applied = Arc::new(AtomicUsize::new(0));
    takagi.plugins().register(Arc::new(BasePlugin { applied: applied.clone() }));
    takagi.plugins().register(Arc::new(DependentPlugin));

    takagi.plugins().enable("dependent", OptionMap::new()).unwrap();
    assert!(takagi.plugins().is_enabled("base"));
    assert!(takagi.plugins().is_enabled("dependent"));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_dependency_fails() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(DependentPlugin));

    let err = takagi.plugins().enable("dependent", OptionMap::new()).unwrap_err();
    assert!(matches!(err, PluginError::NotRegistered(name) if name == "base"));
}

struct OldBasePlugin;

impl Plugin for OldBasePlugin {
    fn manifest(&self) -> Manifest {
        Manifest::new("base", "1.0.0")
    }

    fn apply(&self, _app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_dependency_version_too_old() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(OldBasePlugin));
    takagi.plugins().register(Arc::new(DependentPlugin));

    let err = takagi.plugins().enable("dependent", OptionMap::new()).unwrap_err();
    assert!(matches!(err, PluginError::DependencyVersion { .. }));
}

struct FuturePlugin;

impl Plugin for FuturePlugin {
    fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new("future", "1.0.0");
        manifest.requires = Some("99.0.0".to_string());
        manifest
    }

    fn apply(&self, _app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_framework_version_gate() {
    let takagi = takagi();
    takagi.plugins().register(Arc::new(FuturePlugin));

    let err = takagi.plugins().enable("future", OptionMap::new()).unwrap_err();
    assert!(matches!(err, PluginError::FrameworkTooOld { .. }));
}

#[tokio::test]
async fn test_disable_runs_reverse() {
    struct Reversible {
        reversed: Arc<AtomicUsize>,
    }
    impl Plugin for Reversible {
        fn manifest(&self) -> Manifest {
            Manifest::new("reversible", "1.0.0")
        }
        fn apply(&self, _app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
            Ok(())
        }
        fn reverse(&self, _app: &AppContext) -> Result<(), PluginError> {
            self.reversed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let takagi = takagi();
    let reversed = Arc::new(AtomicUsize::new(0));
    takagi.plugins().register(Arc::new(Reversible { reversed: reversed.clone() }));

    takagi.plugins().enable("reversible", OptionMap::new()).unwrap();
    takagi.plugins().disable("reversible").unwrap();
    assert!(!takagi.plugins().is_enabled("reversible"));
    assert_eq!(reversed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_plugin_can_register_constants() {
    struct ConstantsPlugin;
    impl Plugin for ConstantsPlugin {
        fn manifest(&self) -> Manifest {
            Manifest::new("constants", "1.0.0")
        }
        fn apply(&self, app: &AppContext, _options: &OptionMap) -> Result<(), PluginError> {
            app.registries()
                .content_formats
                .register(65001, "application/x-sensor", Some("sensor"), None)
                .map_err(|e| PluginError::Failed {
                    plugin: "constants".to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        }
    }

    let takagi = takagi();
    takagi.plugins().register(Arc::new(ConstantsPlugin));
    takagi.plugins().enable("constants", OptionMap::new()).unwrap();

    assert_eq!(
        takagi.registries().content_formats.value_for("sensor"),
        Some(65001)
    );
}
