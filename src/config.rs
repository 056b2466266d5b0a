//! Pipeline configuration module.
//!
//! Handles loading, validating, and merging `webpipe.toml`. The file is
//! optional and sparse: stock defaults are overridden by whatever keys the
//! project's `webpipe.toml` sets.
//!
//! ## Config File Location
//!
//! ```text
//! my-site/
//! ├── webpipe.toml          # optional, overrides stock defaults
//! ├── src/
//! │   ├── pages/            # page templates (@@include)
//! │   ├── scss/             # Sass entry files + partials
//! │   ├── css/              # plain CSS libraries, bundled
//! │   ├── js/               # script entry module
//! │   ├── fonts/            # .ttf sources
//! │   └── img/              # raw images
//! └── build/                # generated, never hand-edited
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! mode = "development"      # or "production"
//!
//! [paths]
//! pages = "src/pages"
//! scss = "src/scss"
//! css = "src/css"
//! js = "src/js"
//! fonts = "src/fonts"
//! images = "src/img"
//! output = "build"
//!
//! [styles]
//! browsers = ["> 0.5%", "last 2 versions", "Firefox ESR", "not dead"]
//! bundle_name = "bundle.css"
//! exclude = ["style.css"]
//! font_faces = "_fonts.scss"
//!
//! [markup]
//! include_prefix = "@@"
//! indent_with_tabs = true
//! indent_size = 4
//!
//! [scripts]
//! entry = "script.js"
//! output = "all.js"
//! # watch = true           # defaults to true in development mode
//! command = []             # external bundler argv, empty = built-in
//!
//! [fonts]
//! default_weight = 400
//!
//! [images]
//! jpeg_quality = 75
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! open = true
//! notify = false
//!
//! [server.ghost]
//! clicks = true
//! forms = true
//! scroll = false
//!
//! [processing]
//! max_processes = 4        # omit for auto = CPU cores
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "webpipe.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build mode. Development keeps the script bundler resident and emits
/// eval-wrapped modules with source URLs; production emits plain modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_dev(self) -> bool {
        self == Mode::Development
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

/// Pipeline configuration loaded from `webpipe.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Development or production.
    pub mode: Mode,
    /// Source and output directory layout.
    pub paths: PathsConfig,
    /// Sass, CSS bundle and purge settings.
    pub styles: StylesConfig,
    /// Page include and beautify settings.
    pub markup: MarkupConfig,
    /// Script bundler settings.
    pub scripts: ScriptsConfig,
    /// Font-face generation settings.
    pub fonts: FontsConfig,
    /// Image compression settings.
    pub images: ImagesConfig,
    /// Dev server settings.
    pub server: ServerConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.jpeg_quality == 0 || self.images.jpeg_quality > 100 {
            return Err(ConfigError::Validation(
                "images.jpeg_quality must be 1-100".into(),
            ));
        }
        if !(100..=900).contains(&self.fonts.default_weight) {
            return Err(ConfigError::Validation(
                "fonts.default_weight must be 100-900".into(),
            ));
        }
        if self.styles.bundle_name.is_empty() {
            return Err(ConfigError::Validation(
                "styles.bundle_name must not be empty".into(),
            ));
        }
        if self.scripts.entry.is_empty() || self.scripts.output.is_empty() {
            return Err(ConfigError::Validation(
                "scripts.entry and scripts.output must not be empty".into(),
            ));
        }
        if self.markup.include_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "markup.include_prefix must not be empty".into(),
            ));
        }
        match lightningcss::targets::Browsers::from_browserslist(&self.styles.browsers) {
            Ok(_) => {}
            Err(e) => {
                return Err(ConfigError::Validation(format!(
                    "styles.browsers is not a valid browserslist query: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the script bundler keeps itself resident and self-watches.
    pub fn scripts_self_watch(&self) -> bool {
        self.scripts.watch.unwrap_or(self.mode.is_dev())
    }
}

/// Source and output directories, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub pages: String,
    pub scss: String,
    pub css: String,
    pub js: String,
    pub fonts: String,
    pub images: String,
    pub output: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pages: "src/pages".to_string(),
            scss: "src/scss".to_string(),
            css: "src/css".to_string(),
            js: "src/js".to_string(),
            fonts: "src/fonts".to_string(),
            images: "src/img".to_string(),
            output: "build".to_string(),
        }
    }
}

/// Style task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    /// Browserslist queries that decide which vendor prefixes are emitted.
    pub browsers: Vec<String>,
    /// File name of the concatenated library bundle in `<output>/css`.
    pub bundle_name: String,
    /// File names in the css root that the bundle never includes.
    pub exclude: Vec<String>,
    /// Font-face declaration file inside the scss root (append target).
    pub font_faces: String,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            browsers: vec![
                "> 0.5%".to_string(),
                "last 2 versions".to_string(),
                "Firefox ESR".to_string(),
                "not dead".to_string(),
            ],
            bundle_name: "bundle.css".to_string(),
            exclude: vec!["style.css".to_string()],
            font_faces: "_fonts.scss".to_string(),
        }
    }
}

/// Page assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkupConfig {
    /// Directive prefix, `@@` gives `@@include(...)` and `@@var`.
    pub include_prefix: String,
    /// Indent with one tab per level instead of spaces.
    pub indent_with_tabs: bool,
    /// Spaces per level when not indenting with tabs.
    pub indent_size: usize,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            include_prefix: "@@".to_string(),
            indent_with_tabs: true,
            indent_size: 4,
        }
    }
}

/// Script bundler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptsConfig {
    /// Entry module, relative to the js root.
    pub entry: String,
    /// Bundle file name in `<output>/js`.
    pub output: String,
    /// Keep the bundler resident and rebuild on change. When absent, follows
    /// the mode (on in development, off in production).
    pub watch: Option<bool>,
    /// External bundler command. Empty uses the built-in module bundler.
    /// Placeholders: `{entry}`, `{output}`, `{mode}`.
    pub command: Vec<String>,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            entry: "script.js".to_string(),
            output: "all.js".to_string(),
            watch: None,
            command: Vec::new(),
        }
    }
}

/// Font-face generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontsConfig {
    /// Weight used when a font file name contains no known style keyword.
    pub default_weight: u16,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            default_weight: 400,
        }
    }
}

/// Image compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// JPEG re-encoding quality (1-100).
    pub jpeg_quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { jpeg_quality: 75 }
    }
}

/// Dev server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Open a browser once at startup.
    pub open: bool,
    /// Show an in-page notice when a reload is pushed.
    pub notify: bool,
    /// Interaction mirroring between connected browsers.
    pub ghost: GhostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: true,
            notify: false,
            ghost: GhostConfig::default(),
        }
    }
}

/// Which interactions are mirrored across connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GhostConfig {
    pub clicks: bool,
    pub forms: bool,
    pub scroll: bool,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            clicks: true,
            forms: true,
            scroll: false,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image/font workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Resolved directory layout
// =============================================================================

/// Absolute source and output directories for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub pages: PathBuf,
    pub scss: PathBuf,
    pub css: PathBuf,
    pub js: PathBuf,
    pub fonts: PathBuf,
    pub images: PathBuf,
    pub output: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, paths: &PathsConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            pages: root.join(&paths.pages),
            scss: root.join(&paths.scss),
            css: root.join(&paths.css),
            js: root.join(&paths.js),
            fonts: root.join(&paths.fonts),
            images: root.join(&paths.images),
            output: root.join(&paths.output),
        }
    }

    pub fn output_css(&self) -> PathBuf {
        self.output.join("css")
    }

    pub fn output_js(&self) -> PathBuf {
        self.output.join("js")
    }

    pub fn output_fonts(&self) -> PathBuf {
        self.output.join("fonts")
    }

    pub fn output_img(&self) -> PathBuf {
        self.output.join("img")
    }
}

/// A loaded project: root directory, config, and resolved layout.
#[derive(Debug, Clone)]
pub struct Project {
    pub config: PipelineConfig,
    pub layout: Layout,
}

impl Project {
    pub fn new(root: &Path, config: PipelineConfig) -> Self {
        let layout = Layout::new(root, &config.paths);
        Self { config, layout }
    }

    /// Load `webpipe.toml` from `root` (if present) and resolve the layout.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let config = load_config(root)?;
        Ok(Self::new(root, config))
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `webpipe.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PipelineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `webpipe.toml` in the given directory.
pub fn load_config(root: &Path) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `webpipe.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# webpipe configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# "development" keeps the script bundler resident and emits eval-wrapped
# modules with source URLs. "production" emits plain modules.
mode = "development"

# ---------------------------------------------------------------------------
# Directory layout (relative to the project root)
# ---------------------------------------------------------------------------
[paths]
pages = "src/pages"
scss = "src/scss"
css = "src/css"
js = "src/js"
fonts = "src/fonts"
images = "src/img"
# Everything under output is generated and may be deleted at any time.
output = "build"

# ---------------------------------------------------------------------------
# Styles
# ---------------------------------------------------------------------------
[styles]
# Browserslist queries deciding which vendor prefixes are emitted.
browsers = ["> 0.5%", "last 2 versions", "Firefox ESR", "not dead"]
# Bundle of every css/*.css library, written to <output>/css/.
bundle_name = "bundle.css"
# css/ files that are never bundled (handled elsewhere).
exclude = ["style.css"]
# Font-face declarations are appended here (inside the scss directory).
font_faces = "_fonts.scss"

# ---------------------------------------------------------------------------
# Pages
# ---------------------------------------------------------------------------
[markup]
# @@include('header.html') and @@variable directives.
include_prefix = "@@"
indent_with_tabs = true
# Spaces per level when indent_with_tabs = false.
indent_size = 4

# ---------------------------------------------------------------------------
# Scripts
# ---------------------------------------------------------------------------
[scripts]
# Entry module inside the js directory.
entry = "script.js"
# Bundle name inside <output>/js/.
output = "all.js"
# Keep the bundler resident and rebuild on change.
# Defaults to true in development mode, false in production.
# watch = true
# External bundler instead of the built-in one, e.g.
# command = ["esbuild", "{entry}", "--bundle", "--outfile={output}"]
command = []

# ---------------------------------------------------------------------------
# Fonts
# ---------------------------------------------------------------------------
[fonts]
# Weight for font files whose name has no style keyword (Bold, Light, ...).
default_weight = 400

# ---------------------------------------------------------------------------
# Images
# ---------------------------------------------------------------------------
[images]
# JPEG re-encoding quality (1-100). The smaller of original and re-encoded
# bytes is kept.
jpeg_quality = 75

# ---------------------------------------------------------------------------
# Dev server
# ---------------------------------------------------------------------------
[server]
host = "127.0.0.1"
port = 3000
# Open a browser once at startup.
open = true
# Show a small notice in the page before reloading.
notify = false

# Mirror interactions between every connected browser.
[server.ghost]
clicks = true
forms = true
scroll = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for images and fonts. Omit for auto (= CPU cores).
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.paths.pages, "src/pages");
        assert_eq!(config.paths.output, "build");
        assert_eq!(config.styles.bundle_name, "bundle.css");
        assert_eq!(config.styles.exclude, vec!["style.css".to_string()]);
        assert_eq!(config.scripts.output, "all.js");
        assert_eq!(config.fonts.default_weight, 400);
    }

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn ghost_mode_does_not_mirror_scroll_by_default() {
        let ghost = GhostConfig::default();
        assert!(ghost.clicks);
        assert!(ghost.forms);
        assert!(!ghost.scroll);
    }

    #[test]
    fn load_config_without_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn load_config_merges_sparse_overrides() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r#"
mode = "production"

[server]
port = 8080

[styles]
exclude = ["main.css", "print.css"]
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.server.port, 8080);
        // untouched keys in the same table keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.styles.exclude, vec!["main.css", "print.css"]);
        assert_eq!(config.styles.bundle_name, "bundle.css");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[styles]\nbundel_name = \"x.css\"\n",
        )
        .unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "mode = [").unwrap();
        assert!(load_config(tmp.path()).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        let mut config = PipelineConfig::default();
        config.fonts.default_weight = 950;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_jpeg_quality() {
        let mut config = PipelineConfig::default();
        config.images.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_browser_query() {
        let mut config = PipelineConfig::default();
        config.styles.browsers = vec!["definitely not a query".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn scripts_self_watch_follows_mode_unless_set() {
        let mut config = PipelineConfig::default();
        assert!(config.scripts_self_watch());
        config.mode = Mode::Production;
        assert!(!config.scripts_self_watch());
        config.scripts.watch = Some(true);
        assert!(config.scripts_self_watch());
    }

    #[test]
    fn merge_toml_replaces_scalars_and_merges_tables() {
        let base: toml::Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("a = 5\n[t]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(5));
        assert_eq!(merged["t"]["x"].as_integer(), Some(1));
        assert_eq!(merged["t"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(stock_defaults_value(), Some(value)).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.paths.output, defaults.paths.output);
        assert_eq!(config.styles.browsers, defaults.styles.browsers);
        assert_eq!(config.server.ghost, defaults.server.ghost);
        assert_eq!(config.scripts.watch, None);
    }

    #[test]
    fn layout_resolves_against_root() {
        let layout = Layout::new(Path::new("/site"), &PathsConfig::default());
        assert_eq!(layout.scss, PathBuf::from("/site/src/scss"));
        assert_eq!(layout.images, PathBuf::from("/site/src/img"));
        assert_eq!(layout.output_css(), PathBuf::from("/site/build/css"));
        assert_eq!(layout.output_img(), PathBuf::from("/site/build/img"));
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_processes: Some(cores + 64),
        };
        assert_eq!(effective_threads(&config), cores);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }
}
