//! Local transfer plugin: copies files between local paths.

use async_trait::async_trait;
use convoy_core::{uri, ActivityKind, TRANSFER_CAPABILITY};
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument};

use crate::error::PluginError;
use crate::traits::{Plugin, PluginOutcome, PluginRequest, Validation};

/// Runs TRANSFER activities whose source and destination are both local.
#[derive(Debug, Clone)]
pub struct LocalTransferPlugin {
    overwrite: bool,
}

impl LocalTransferPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self { overwrite: true }
    }

    /// Refuse to replace an existing destination.
    #[must_use]
    pub const fn no_overwrite(mut self) -> Self {
        self.overwrite = false;
        self
    }
}

impl Default for LocalTransferPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LocalTransferPlugin {
    fn name(&self) -> &str {
        TRANSFER_CAPABILITY
    }

    fn configure(&mut self, options: &serde_json::Value) -> Result<(), PluginError> {
        if let Some(overwrite) = options.get("overwrite") {
            self.overwrite = overwrite
                .as_bool()
                .ok_or_else(|| PluginError::ConfigError("overwrite must be a boolean".into()))?;
        }
        Ok(())
    }

    async fn check(&self, request: &PluginRequest) -> Result<Validation, PluginError> {
        let ActivityKind::Transfer {
            source,
            destination,
        } = &request.kind
        else {
            return Ok(Validation::invalid(format!(
                "transfer plugin cannot run {} activities",
                request.kind.activity_type()
            )));
        };

        let mut errors = Vec::new();
        for (role, value) in [("source", source), ("destination", destination)] {
            if !uri::is_local(value) {
                errors.push(format!(
                    "{role} {value} uses unsupported scheme {}",
                    uri::scheme(value).unwrap_or_default()
                ));
            }
        }
        Ok(Validation {
            valid: errors.is_empty(),
            errors,
        })
    }

    #[instrument(skip(self, request), fields(activity_id = %request.activity_id, plugin = "transfer"))]
    async fn process(&self, request: &PluginRequest) -> Result<PluginOutcome, PluginError> {
        let ActivityKind::Transfer {
            source,
            destination,
        } = &request.kind
        else {
            return Err(PluginError::InvalidRequest("not a transfer activity".into()));
        };

        let (Some(src), Some(dst)) = (uri::local_path(source), uri::local_path(destination)) else {
            return Err(PluginError::InvalidRequest(format!(
                "cannot copy {source} to {destination} locally"
            )));
        };
        let dst = Path::new(dst);

        if !self.overwrite && tokio::fs::try_exists(dst).await? {
            return Ok(PluginOutcome {
                success: false,
                message: format!("destination {} exists", dst.display()),
                ..PluginOutcome::default()
            });
        }

        let start = Instant::now();
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(src, dst).await?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(bytes, destination = %dst.display(), "Transfer complete");

        Ok(PluginOutcome {
            success: true,
            message: format!("copied {bytes} bytes"),
            duration_ms,
            ..PluginOutcome::default()
        })
    }
}
