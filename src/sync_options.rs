//! Per-call sync options.
//!
//! [`SyncOptions`] lets one `sync()` invocation override the changeset knobs
//! configured in [`crate::SyncConfig`]. Unset fields fall back to the config.
//!
//! # Example
//!
//! ```
//! use change_sync::{SyncConfig, SyncOptions};
//!
//! // Default: follow the config
//! let opts = SyncOptions::default();
//!
//! // Force per-unit requests for this run (no changesets)
//! let opts = SyncOptions::individual();
//!
//! // Changesets with tight limits
//! let opts = SyncOptions::changesets().with_limits(64 * 1024, 10);
//!
//! let effective = opts.resolve(&SyncConfig::default());
//! assert!(effective.use_changesets);
//! assert_eq!(effective.max_instances, 10);
//! ```

use crate::config::SyncConfig;

/// Options for one sync run.
///
/// `None` fields inherit the [`SyncConfig`] value.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Override changeset batching on or off for this run.
    pub use_changesets: Option<bool>,

    /// Override the maximum serialized changeset size in bytes.
    pub changeset_max_bytes: Option<usize>,

    /// Override the maximum instance count per changeset.
    pub changeset_max_instances: Option<usize>,
}

impl SyncOptions {
    /// Sync every group with an individual request, even if the server
    /// supports changesets.
    #[must_use]
    pub fn individual() -> Self {
        Self {
            use_changesets: Some(false),
            ..Self::default()
        }
    }

    /// Enable changeset batching regardless of the config default.
    #[must_use]
    pub fn changesets() -> Self {
        Self {
            use_changesets: Some(true),
            ..Self::default()
        }
    }

    /// Limit changeset size and instance count for this run.
    #[must_use]
    pub fn with_limits(mut self, max_bytes: usize, max_instances: usize) -> Self {
        self.changeset_max_bytes = Some(max_bytes);
        self.changeset_max_instances = Some(max_instances);
        self
    }

    /// Merge with the config into the effective knobs for one run.
    #[must_use]
    pub fn resolve(&self, config: &SyncConfig) -> EffectiveOptions {
        EffectiveOptions {
            use_changesets: self.use_changesets.unwrap_or(config.use_changesets),
            max_bytes: self.changeset_max_bytes.unwrap_or(config.changeset_max_bytes),
            max_instances: self
                .changeset_max_instances
                .unwrap_or(config.changeset_max_instances),
            refresh_created: config.refresh_created,
        }
    }
}

/// Effective per-run knobs after merging [`SyncOptions`] with [`SyncConfig`].
#[derive(Debug, Clone, Copy)]
pub struct EffectiveOptions {
    pub use_changesets: bool,
    pub max_bytes: usize,
    pub max_instances: usize,
    pub refresh_created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_inherits_config() {
        let config = SyncConfig {
            use_changesets: false,
            changeset_max_bytes: 123,
            changeset_max_instances: 4,
            refresh_created: false,
        };
        let effective = SyncOptions::default().resolve(&config);
        assert!(!effective.use_changesets);
        assert_eq!(effective.max_bytes, 123);
        assert_eq!(effective.max_instances, 4);
        assert!(!effective.refresh_created);
    }

    #[test]
    fn test_individual_overrides_config() {
        let config = SyncConfig::default();
        assert!(config.use_changesets);
        let effective = SyncOptions::individual().resolve(&config);
        assert!(!effective.use_changesets);
    }

    #[test]
    fn test_limits_override() {
        let effective = SyncOptions::changesets()
            .with_limits(1024, 2)
            .resolve(&SyncConfig::default());
        assert!(effective.use_changesets);
        assert_eq!(effective.max_bytes, 1024);
        assert_eq!(effective.max_instances, 2);
    }
}
