//! Error types for the CLI runtime.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use kcm_config::LayoutError;
use kcm_core::lifecycle::LifecycleError;
use kcm_core::model::ModelError;
use kcm_core::script::ScriptError;
use kcm_core::telemetry::TelemetryError;
use kcm_core::{LockError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid cluster definition: {0}")]
    Model(#[from] ModelError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("failed to run '{program}': {source}")]
    Exec { program: PathBuf, source: io::Error },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl AppError {
    /// Whether the tool must stop rather than report and carry on.
    pub(crate) const fn is_fatal(&self) -> bool {
        match self {
            Self::Lifecycle(error) => error.is_fatal(),
            _ => false,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(source: io::Error) -> Self {
        Self::Output(source)
    }
}
