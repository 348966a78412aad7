//! Local recognition model (tier 2).
//!
//! The model is an opaque capability: page images in, text lines out. It is
//! loaded lazily through a [`ModelHandle`] the first time a batch needs it,
//! and inference runs on a blocking thread, so implementations are plain
//! synchronous code.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors raised by the local OCR tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OcrError {
    #[error("local OCR model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("local OCR model failed to load: {0}")]
    ModelLoad(String),

    #[error("local OCR inference failed: {0}")]
    Inference(String),

    #[error("page artifact {path} unreadable: {reason}")]
    Artifact { path: PathBuf, reason: String },
}

/// Raw bytes of one page artifact handed to the model.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// One detected layout block. Coordinates are model-defined.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRegion {
    pub label: String,
    pub bbox: [f32; 4],
}

/// A loaded recognition model.
pub trait RecognitionModel: Send + 'static {
    /// Detects layout blocks, one list per image.
    ///
    /// # Errors
    ///
    /// Returns [`OcrError::Inference`] when the batch cannot be analysed.
    fn detect_layout(&mut self, images: &[PageImage]) -> Result<Vec<Vec<LayoutRegion>>, OcrError>;

    /// Recognises text lines, one list per image, in reading order.
    ///
    /// # Errors
    ///
    /// Returns [`OcrError::Inference`] when recognition fails for the batch.
    fn recognize(
        &mut self,
        images: &[PageImage],
        layouts: &[Vec<LayoutRegion>],
    ) -> Result<Vec<Vec<String>>, OcrError>;
}

/// Produces a model on first use.
pub trait ModelLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns [`OcrError`] when the model cannot be made available.
    fn load(&self) -> Result<Box<dyn RecognitionModel>, OcrError>;
}

enum ModelState {
    Unloaded,
    Loaded(Box<dyn RecognitionModel>),
    /// Lent to a blocking inference task.
    InUse,
    Failed(String),
}

/// Lazily loaded model: `Unloaded -> Loaded | Failed`.
///
/// A failed load is sticky for the lifetime of the handle, so one broken
/// model costs one load attempt, not one per batch.
pub struct ModelHandle {
    loader: Arc<dyn ModelLoader>,
    state: ModelState,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            ModelState::Unloaded => "unloaded",
            ModelState::Loaded(_) => "loaded",
            ModelState::InUse => "in-use",
            ModelState::Failed(_) => "failed",
        };
        f.debug_struct("ModelHandle").field("state", &state).finish_non_exhaustive()
    }
}

impl ModelHandle {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            state: ModelState::Unloaded,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    /// Loads the model if it has not been loaded yet.
    ///
    /// # Errors
    ///
    /// Returns the load error, now and on every later call.
    #[instrument(skip(self))]
    pub async fn ensure_loaded(&mut self) -> Result<(), OcrError> {
        match &self.state {
            ModelState::Loaded(_) | ModelState::InUse => return Ok(()),
            ModelState::Failed(reason) => return Err(OcrError::ModelLoad(reason.clone())),
            ModelState::Unloaded => {}
        }

        info!("loading local OCR model");
        let loader = Arc::clone(&self.loader);
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap_or_else(|e| Err(OcrError::ModelLoad(format!("loader panicked: {e}"))));

        match loaded {
            Ok(model) => {
                info!("local OCR model loaded");
                self.state = ModelState::Loaded(model);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "local OCR model unavailable");
                let reason = match e {
                    OcrError::ModelLoad(reason) => reason,
                    other => other.to_string(),
                };
                self.state = ModelState::Failed(reason.clone());
                Err(OcrError::ModelLoad(reason))
            }
        }
    }

    /// Runs layout detection and recognition for one batch on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns [`OcrError`] when the model is not loaded or inference fails.
    pub async fn run_batch(&mut self, images: Vec<PageImage>) -> Result<Vec<Vec<String>>, OcrError> {
        let mut model = match std::mem::replace(&mut self.state, ModelState::InUse) {
            ModelState::Loaded(model) => model,
            other => {
                self.state = other;
                return Err(OcrError::ModelUnavailable("model not loaded".to_string()));
            }
        };

        let expected = images.len();
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = model
                .detect_layout(&images)
                .and_then(|layouts| model.recognize(&images, &layouts));
            drop(images);
            (model, outcome)
        })
        .await;

        match joined {
            Ok((model, outcome)) => {
                self.state = ModelState::Loaded(model);
                let lines = outcome?;
                if lines.len() != expected {
                    return Err(OcrError::Inference(format!(
                        "model returned {} results for {expected} pages",
                        lines.len()
                    )));
                }
                Ok(lines)
            }
            Err(e) => {
                let reason = format!("inference task panicked: {e}");
                self.state = ModelState::Failed(reason.clone());
                Err(OcrError::Inference(reason))
            }
        }
    }
}

/// Loader for [`CommandModel`]; fails cleanly when no command is configured.
#[derive(Debug, Clone, Default)]
pub struct CommandModelLoader {
    command: Option<String>,
}

impl CommandModelLoader {
    #[must_use]
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }
}

impl ModelLoader for CommandModelLoader {
    fn load(&self) -> Result<Box<dyn RecognitionModel>, OcrError> {
        let Some(command) = &self.command else {
            return Err(OcrError::ModelUnavailable(
                "no tier2_command configured".to_string(),
            ));
        };
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| OcrError::ModelUnavailable("tier2_command is empty".to_string()))?;
        Ok(Box::new(CommandModel {
            program,
            args: parts.collect(),
        }))
    }
}

/// Runs an external recognizer over a batch.
///
/// The command receives the batch's artifact paths as trailing arguments and
/// must print a JSON array with one array of text lines per path.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl RecognitionModel for CommandModel {
    fn detect_layout(&mut self, images: &[PageImage]) -> Result<Vec<Vec<LayoutRegion>>, OcrError> {
        // The external recognizer does its own layout analysis.
        Ok(vec![Vec::new(); images.len()])
    }

    fn recognize(
        &mut self,
        images: &[PageImage],
        _layouts: &[Vec<LayoutRegion>],
    ) -> Result<Vec<Vec<String>>, OcrError> {
        debug!(program = %self.program, pages = images.len(), "running recognizer command");
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(images.iter().map(|image| &image.path))
            .output()
            .map_err(|e| OcrError::Inference(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Inference(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| OcrError::Inference(format!("unreadable recognizer output: {e}")))
    }
}
