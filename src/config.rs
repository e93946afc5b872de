use crate::crop::{DEFAULT_HALF_WINDOW, MAX_HALF_WINDOW};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub pool: Pool,
    #[serde(default)]
    pub crop: Crop,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.crop.half_window == 0 {
            bail!("crop.half_window must be at least 1");
        }
        if self.crop.half_window > MAX_HALF_WINDOW {
            bail!("crop.half_window must be at most {MAX_HALF_WINDOW}");
        }
        if self.crop.image_extensions.is_empty() {
            bail!("crop.image_extensions must not be empty");
        }
        Ok(())
    }

    /// A stable, normalization-friendly string for hashing. `output.overwrite`
    /// is left out so that it never changes the run id.
    pub fn normalized_for_hash(&self) -> String {
        let mut cfg = self.clone();
        cfg.output.overwrite = false;
        toml::to_string(&cfg).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub weights: String,
    pub architecture: String,
    pub markers: String,
    pub images: String,
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            weights: "models/cc_weights.h5".into(),
            architecture: "models/cc_architecture.json".into(),
            markers: "counts".into(),
            images: ".".into(),
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pool {
    /// 0 means one worker per logical CPU.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Crop {
    pub half_window: u32,
    pub image_extensions: Vec<String>,
}
impl Default for Crop {
    fn default() -> Self {
        Self {
            half_window: DEFAULT_HALF_WINDOW,
            image_extensions: vec!["tif".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorPolicy {
    #[default]
    FailFast,
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub on_task_error: TaskErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Classifier {
    pub python_exe: String,
    pub script: String,
    pub keep_stderr: bool,
    pub env: BTreeMap<String, String>,
}
impl Default for Classifier {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            script: "scripts/cell_classifier.py".into(),
            keep_stderr: false,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub export_markers: bool,
    pub print_summary: bool,
    pub overwrite: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            export_markers: true,
            print_summary: true,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
        }
    }
}
