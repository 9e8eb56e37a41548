use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    cli::{AppContext, InitArgs},
    core::{report::Verbosity, target::TargetKind},
};

/// Config file names looked up under the project root, first match wins.
pub const CONFIG_FILES: [&str; 2] = ["authkit.toml", ".authkit.toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Host app name (`my_app`); inferred from mix.exs when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    /// Route prefix requested when `--prefix` is not given
    pub default_prefix: String,

    /// Module imported into the router
    pub router_module: String,

    /// Module imported into the layout
    pub components_module: String,

    /// Macro that mounts the auth routes
    pub route_macro: String,

    /// Pipeline the auth routes pipe through
    pub prerequisite_pipeline: String,

    /// Pipeline name owned by the add-on
    pub reserved_pipeline: String,

    /// Target kinds to integrate
    pub targets: Vec<TargetKind>,

    pub locator: LocatorConfig,

    pub scanners: ScannerConfig,

    /// Copy originals to `.authkit/backups` before writing
    pub backup: bool,

    /// Default report verbosity
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig
{
    /// Extra globs for router discovery (root-relative)
    pub extra_router_patterns: Vec<String>,

    /// Extra globs for layout discovery (root-relative)
    pub extra_layout_patterns: Vec<String>,

    /// Directories and files never searched
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig
{
    /// Inspect mix.exs dependencies
    pub dependencies: bool,

    /// Inspect config/*.exs
    pub config: bool,

    /// Inspect lib/**/*.ex for generated auth modules
    pub source: bool,

    /// Package name the host must depend on
    pub addon_dependency: String,

    /// Dependencies that provide their own auth routes
    pub competing_deps: Vec<String>,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            app_name: None,
            default_prefix: "/auth_kit".to_string(),
            router_module: "AuthKit.Router".to_string(),
            components_module: "AuthKit.Components".to_string(),
            route_macro: "auth_kit_routes".to_string(),
            prerequisite_pipeline: "browser".to_string(),
            reserved_pipeline: "auth_kit".to_string(),
            targets: TargetKind::ALL.to_vec(),
            locator: LocatorConfig::default(),
            scanners: ScannerConfig::default(),
            backup: false,
            verbosity: Verbosity::Summary,
        }
    }
}

impl Default for LocatorConfig
{
    fn default() -> Self
    {
        Self {
            extra_router_patterns: Vec::new(),
            extra_layout_patterns: Vec::new(),
            ignore: vec![
                "deps/**".to_string(),
                "_build/**".to_string(),
                "node_modules/**".to_string(),
                "test/**".to_string(),
            ],
        }
    }
}

impl Default for ScannerConfig
{
    fn default() -> Self
    {
        Self {
            dependencies: true,
            config: true,
            source: true,
            addon_dependency: "auth_kit".to_string(),
            competing_deps: vec![
                "pow".to_string(),
                "coherence".to_string(),
                "phx_gen_auth".to_string(),
            ],
        }
    }
}

/// Load `authkit.toml` (or `.authkit.toml`) from `root`, overlaid by
/// `AUTHKIT__*` environment variables. Missing keys take defaults.
pub fn load_config(root: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    for name in &CONFIG_FILES
    {
        let path = root.join(name);
        if path.is_file()
        {
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
            break;
        }
    }

    // AUTHKIT__DEFAULT_PREFIX, AUTHKIT__SCANNERS__SOURCE, ...
    builder = builder.add_source(
        config::Environment::with_prefix("AUTHKIT")
            .prefix_separator("__")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    if ctx.dry_run
    {
        println!("{toml_string}");
        return Ok(());
    }

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()>
    {
        let tmp = TempDir::new()?;
        std::fs::write(
            tmp.path()
                .join("authkit.toml"),
            "default_prefix = \"/login\"\n\n[scanners]\nsource = false\n",
        )?;

        let cfg = load_config(tmp.path())?;
        assert_eq!(cfg.default_prefix, "/login");
        assert!(!cfg.scanners.source);
        assert!(cfg.scanners.dependencies);
        assert_eq!(cfg.route_macro, "auth_kit_routes");
        assert_eq!(cfg.targets, TargetKind::ALL.to_vec());
        Ok(())
    }

    #[test]
    fn test_default_config_serializes_to_loadable_toml() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let text = toml::to_string_pretty(&Config::default())?;
        assert!(text.contains("default_prefix = \"/auth_kit\""));
        assert!(!text.contains("app_name"));

        std::fs::write(
            tmp.path()
                .join(".authkit.toml"),
            text,
        )?;
        let cfg = load_config(tmp.path())?;
        assert_eq!(cfg.locator.ignore.len(), 4);
        assert_eq!(cfg.verbosity, Verbosity::Summary);
        Ok(())
    }

    #[test]
    fn test_init_refuses_to_overwrite() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let ctx = AppContext::default();
        let args = || InitArgs {
            path: tmp
                .path()
                .to_path_buf(),
            force: false,
        };

        init(args(), &AppContext { quiet: true, ..ctx.clone() })?;
        assert!(
            tmp.path()
                .join("authkit.toml")
                .exists()
        );
        assert!(init(args(), &ctx).is_err());
        Ok(())
    }
}
