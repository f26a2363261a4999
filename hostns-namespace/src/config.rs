//! Escape configuration

use std::path::{Path, PathBuf};

use hostns_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Suffix `mkdtemp(3)` replaces with random characters
pub const TEMPLATE_SUFFIX: &str = "XXXXXX";

/// Escape configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscapeConfig {
    /// Template for the temporary mount root, must end in `XXXXXX`
    pub mount_root_template: PathBuf,

    /// Value of the proc `subset=` option for the private proc instance
    pub proc_subset: Option<String>,

    /// Remove the mount root again when a later stage fails
    pub cleanup_on_failure: bool,
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self {
            mount_root_template: PathBuf::from("/tmp/tmp.XXXXXX"),
            proc_subset: Some("pid".to_string()),
            cleanup_on_failure: true,
        }
    }
}

impl EscapeConfig {
    /// Create a new escape configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mount root template
    #[must_use]
    pub fn with_mount_root_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.mount_root_template = template.into();
        self
    }

    /// Set the proc `subset=` option, `None` mounts a full proc instance
    #[must_use]
    pub fn with_proc_subset(mut self, subset: Option<impl Into<String>>) -> Self {
        self.proc_subset = subset.map(Into::into);
        self
    }

    /// Enable or disable mount root removal on failure
    #[must_use]
    pub fn with_cleanup_on_failure(mut self, enable: bool) -> Self {
        self.cleanup_on_failure = enable;
        self
    }

    /// Template for the temporary mount root
    #[must_use]
    pub fn mount_root_template(&self) -> &Path {
        &self.mount_root_template
    }

    /// Check the configuration before any OS state is touched
    ///
    /// # Errors
    /// Returns error if the template lacks the `XXXXXX` suffix or the proc
    /// subset is empty
    pub fn validate(&self) -> Result<()> {
        let template = self.mount_root_template.as_os_str().as_encoded_bytes();
        if !template.ends_with(TEMPLATE_SUFFIX.as_bytes()) {
            return Err(Error::InvalidArgument {
                message: format!(
                    "mount root template {} must end in {TEMPLATE_SUFFIX}",
                    self.mount_root_template.display()
                ),
            });
        }

        if self.proc_subset.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidArgument {
                message: "proc subset cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}
