use super::{Classifier, ClassifierFactory, types::*};
use crate::{
    config::Config,
    coords::Label,
    crop::Crop,
    error::{CellError, CellResult},
};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// Spawns one `cell_classifier.py` process per pool worker. Each process
/// loads the architecture JSON and weights once, then answers one crop per
/// line on stdin with one JSON line on stdout.
#[derive(Debug, Clone)]
pub struct PythonClassifierFactory {
    python_exe: PathBuf,
    script: PathBuf,
    weights: PathBuf,
    architecture: PathBuf,
    env: Vec<(String, String)>,
    keep_stderr: bool,
}

impl PythonClassifierFactory {
    pub fn new(cfg: &Config) -> CellResult<Self> {
        let script = PathBuf::from(&cfg.classifier.script);
        let weights = PathBuf::from(&cfg.paths.weights);
        let architecture = PathBuf::from(&cfg.paths.architecture);
        for (what, path) in [
            ("classifier script", &script),
            ("weights file", &weights),
            ("architecture file", &architecture),
        ] {
            if !path.exists() {
                return Err(CellError::ClassifierLoad(format!(
                    "missing {what}: {}",
                    path.display()
                )));
            }
        }
        Ok(Self {
            python_exe: resolve_python_exe(&cfg.classifier.python_exe),
            script,
            weights,
            architecture,
            env: cfg
                .classifier
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            keep_stderr: cfg.classifier.keep_stderr,
        })
    }

    /// Loads one classifier and reports whether the model came up.
    pub fn doctor(&self) -> ClassifierDiag {
        let (ok, backend, error) = match self.load() {
            Ok(c) => (true, c.backend().map(str::to_string), None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        ClassifierDiag {
            python_exe: self.python_exe.display().to_string(),
            script: self.script.display().to_string(),
            weights: self.weights.display().to_string(),
            architecture: self.architecture.display().to_string(),
            ok,
            backend,
            error,
        }
    }
}

impl ClassifierFactory for PythonClassifierFactory {
    type Classifier = PythonClassifier;

    fn load(&self) -> CellResult<PythonClassifier> {
        PythonClassifier::spawn(self)
    }
}

pub struct PythonClassifier {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    backend: Option<String>,
    line: String,
}

impl PythonClassifier {
    fn spawn(factory: &PythonClassifierFactory) -> CellResult<Self> {
        debug!(
            "python classifier {} weights={} architecture={}",
            factory.script.display(),
            factory.weights.display(),
            factory.architecture.display()
        );
        let mut cmd = Command::new(&factory.python_exe);
        cmd.arg(&factory.script)
            .arg("--weights")
            .arg(&factory.weights)
            .arg("--architecture")
            .arg(&factory.architecture);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(if factory.keep_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
        cmd.env("TF_CPP_MIN_LOG_LEVEL", "2");
        for (k, v) in &factory.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CellError::ClassifierLoad(format!(
                "spawning {}: {e}",
                factory.python_exe.display()
            ))
        })?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| CellError::ClassifierLoad("no stdout".into()))?;

        let mut classifier = Self {
            child,
            stdin,
            stdout,
            backend: None,
            line: String::new(),
        };

        let ready: ReadyOut = classifier
            .read_json()
            .map_err(|e| CellError::ClassifierLoad(e.to_string()))?;
        if !ready.ok {
            return Err(CellError::ClassifierLoad(
                ready.error.unwrap_or_else(|| "model load reported failure".into()),
            ));
        }
        classifier.backend = ready.backend;
        Ok(classifier)
    }

    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    fn read_json<O: for<'de> serde::Deserialize<'de>>(&mut self) -> CellResult<O> {
        self.line.clear();
        let n = self
            .stdout
            .read_line(&mut self.line)
            .map_err(|e| CellError::Classify(format!("reading classifier output: {e}")))?;
        if n == 0 {
            let status = self.child.try_wait().ok().flatten();
            return Err(CellError::Classify(format!(
                "classifier process closed its output (status {status:?})"
            )));
        }
        serde_json::from_str(self.line.trim_end())
            .map_err(|e| CellError::Classify(format!("parsing classifier JSON output: {e}")))
    }
}

impl Classifier for PythonClassifier {
    fn classify(&mut self, crop: &Crop) -> CellResult<Label> {
        let (channels, pixels) = crop.to_hwc();
        let req = ClassifyIn {
            width: crop.width(),
            height: crop.height(),
            channels,
            pixels,
        };
        let mut bytes = serde_json::to_vec(&req)
            .map_err(|e| CellError::Classify(format!("encoding crop: {e}")))?;
        bytes.push(b'\n');

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CellError::Classify("classifier stdin closed".into()))?;
        stdin
            .write_all(&bytes)
            .and_then(|_| stdin.flush())
            .map_err(|e| CellError::Classify(format!("writing to classifier: {e}")))?;

        let out: ClassifyOut = self.read_json()?;
        match (out.ok, out.prediction) {
            (true, Some(value)) => Ok(Label::from_prediction(value)),
            _ => Err(CellError::Classify(
                out.error
                    .unwrap_or_else(|| "classifier returned no prediction".into()),
            )),
        }
    }
}

impl Drop for PythonClassifier {
    fn drop(&mut self) {
        // Closing stdin lets the script leave its read loop.
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("failed to stop classifier process: {e}");
            }
        }
        let _ = self.child.wait();
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("CELL_CHECK_PYTHON") {
            return expand_tilde(&env_val);
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}
