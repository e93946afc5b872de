use serde::{Deserialize, Serialize};

/// First line the worker process prints once the model is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyOut {
    pub ok: bool,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyIn {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyOut {
    pub ok: bool,
    #[serde(default)]
    pub prediction: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierDiag {
    pub python_exe: String,
    pub script: String,
    pub weights: String,
    pub architecture: String,
    pub ok: bool,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
