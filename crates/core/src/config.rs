use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gpu::GpuApi;
use crate::segmentation::{BackendCapabilities, SegmentationOptions};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "SEGMASK_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub segmentation: SegmentationOptions,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deployment switch; has no effect when the `gpu` feature is off.
    pub gpu_enabled: bool,
    pub gpu_api: GpuApi,
    pub gpu_device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gpu_enabled: true,
            gpu_api: GpuApi::default(),
            gpu_device: "default".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("masks"),
        }
    }
}

impl RuntimeConfig {
    pub fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::detect(self.gpu_enabled, self.gpu_api)
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. SEGMASK_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Create the data directory and a default `config.toml` on first run.
/// An existing config file is never overwritten.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        AppConfig::default().save_to_path(&cfg_path)?;
    }

    Ok(())
}

/// Returns the path as-is if absolute, otherwise joins it to base.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{Activation, GpuOrigin};

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert!(cfg.runtime.gpu_enabled);
        assert_eq!(cfg.runtime.gpu_api, GpuApi::OpenglEs31);
        assert_eq!(cfg.runtime.gpu_device, "default");
        assert_eq!(cfg.segmentation, SegmentationOptions::default());
        assert_eq!(cfg.output.dir, PathBuf::from("masks"));
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let mut original = AppConfig::default();
        original.runtime.gpu_api = GpuApi::Metal;
        original.segmentation.activation = Activation::Softmax;
        original.segmentation.gpu_origin = GpuOrigin::TopLeft;

        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = "[runtime]\ngpu_api = \"opengl_es30\"\n\n[segmentation]\nactivation = \"SIGMOID\"\n";
        let cfg: AppConfig = toml::from_str(raw).expect("deserialize partial config");

        assert_eq!(cfg.runtime.gpu_api, GpuApi::OpenglEs30);
        assert!(cfg.runtime.gpu_enabled);
        assert_eq!(cfg.segmentation.activation, Activation::Sigmoid);
        assert_eq!(cfg.segmentation.output_layer_index, 1);
        assert_eq!(cfg.output, OutputConfig::default());
    }

    #[test]
    fn lowercase_segmentation_values_keep_runtime_section() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[runtime]\ngpu_enabled = false\n\n[segmentation]\nactivation = \"softmax\"\ngpu_origin = \"conventional\"\n",
        )
        .expect("write config");

        let cfg = AppConfig::load_from_path(&path).expect("load lowercase config");
        assert!(!cfg.runtime.gpu_enabled);
        assert_eq!(cfg.segmentation.activation, Activation::Softmax);
        assert_eq!(cfg.segmentation.gpu_origin, GpuOrigin::Conventional);
    }

    #[test]
    fn runtime_capabilities_follow_switch() {
        let mut runtime = RuntimeConfig::default();
        runtime.gpu_enabled = false;
        let caps = runtime.capabilities();
        assert!(!caps.can_use_gpu());
        assert_eq!(caps.gpu_api, GpuApi::OpenglEs31);
    }

    #[test]
    fn load_from_nonexistent_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let loaded = AppConfig::load_from_path(&temp.path().join("missing.toml"))
            .expect("load config from nonexistent path");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn load_from_empty_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "  \n").expect("write empty config");
        assert_eq!(
            AppConfig::load_from_path(&path).expect("load empty config"),
            AppConfig::default()
        );
    }

    #[test]
    fn load_from_malformed_file_names_the_path() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[runtime\ngpu_enabled = ").expect("write malformed config");

        let err = AppConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config TOML"));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli_path = Path::new("/custom");
        let result = data_dir(Some(cli_path));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn data_dir_env_then_default() {
        let old = env::var_os(ENV_DATA_DIR);

        env::set_var(ENV_DATA_DIR, "/env/path");
        let from_env = data_dir(None);
        env::remove_var(ENV_DATA_DIR);
        let fallback = data_dir(None);

        if let Some(val) = old {
            env::set_var(ENV_DATA_DIR, val);
        }

        assert_eq!(from_env, PathBuf::from("/env/path"));
        assert_eq!(fallback, PathBuf::from("data"));
    }

    #[test]
    fn config_path_is_data_dir_join_config_toml() {
        let result = config_path(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn initialize_creates_data_dir_and_config() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("nested");
        initialize_data_dir(&root).expect("initialize data dir");

        assert!(root.exists());
        let loaded = AppConfig::load_from_path(&config_path(&root)).expect("load written config");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn initialize_preserves_existing_config() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let cfg_path = temp.path().join("config.toml");
        let custom_content = "[runtime]\ngpu_enabled = false\n";
        fs::write(&cfg_path, custom_content).expect("write custom config");

        initialize_data_dir(temp.path()).expect("initialize data dir");

        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert_eq!(content, custom_content);
    }

    #[test]
    fn resolve_relative_to_absolute_path_unchanged() {
        let result = resolve_relative_to(Path::new("/base"), Path::new("/abs/path"));
        assert_eq!(result, PathBuf::from("/abs/path"));
    }

    #[test]
    fn resolve_relative_to_joins_relative_path() {
        let result = resolve_relative_to(Path::new("/base"), Path::new("sub"));
        assert_eq!(result, PathBuf::from("/base/sub"));
    }
}
