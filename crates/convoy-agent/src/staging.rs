//! Input staging: turning non-local input files into TRANSFER activities.

use convoy_core::{uri, Activity};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::AgentError;

/// Resolves one declared input file into the transfers that make it local.
pub trait FileResolver: Send + Sync {
    /// Transfers needed to stage `file` for `activity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Staging`] if the file cannot be staged.
    fn resolve(
        &self,
        campaign_id: &str,
        activity_id: &str,
        file: &str,
    ) -> Result<Vec<Activity>, AgentError>;

    /// Directory the staged inputs of `activity_id` land in.
    fn staging_dir(&self, campaign_id: &str, activity_id: &str) -> PathBuf;
}

/// Stages each remote file into
/// `{root}/{campaign_id}/{activity_id}/{file name}` with one transfer.
#[derive(Debug, Clone)]
pub struct StagingResolver {
    root: PathBuf,
    /// Accepted schemes; `None` accepts any
    schemes: Option<BTreeSet<String>>,
}

impl StagingResolver {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            schemes: None,
        }
    }

    /// Only stage files with one of `schemes`.
    #[must_use]
    pub fn with_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemes = Some(schemes.into_iter().map(Into::into).collect());
        self
    }
}

impl FileResolver for StagingResolver {
    fn resolve(
        &self,
        campaign_id: &str,
        activity_id: &str,
        file: &str,
    ) -> Result<Vec<Activity>, AgentError> {
        if uri::is_local(file) {
            return Ok(Vec::new());
        }

        let scheme = uri::scheme(file).unwrap_or_default();
        if let Some(schemes) = &self.schemes {
            if !schemes.contains(&scheme) {
                return Err(AgentError::Staging(format!(
                    "no transfer route for scheme {scheme} ({file})"
                )));
            }
        }

        let name = uri::file_name(file)
            .ok_or_else(|| AgentError::Staging(format!("cannot name staged copy of {file}")))?;
        let destination = self.staging_dir(campaign_id, activity_id).join(name);

        Ok(vec![Activity::transfer(
            file,
            format!("file://{}", destination.display()),
        )])
    }

    fn staging_dir(&self, campaign_id: &str, activity_id: &str) -> PathBuf {
        self.root.join(campaign_id).join(activity_id)
    }
}
