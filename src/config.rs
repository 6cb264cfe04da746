//! Configuration for the synchronizer.
//!
//! # Example
//!
//! ```
//! use change_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert!(config.use_changesets);
//! assert_eq!(config.changeset_max_bytes, 2 * 1024 * 1024); // 2 MB
//!
//! // Full config
//! let config = SyncConfig {
//!     use_changesets: true,
//!     changeset_max_bytes: 512 * 1024,
//!     changeset_max_instances: 100,
//!     refresh_created: false,
//! };
//! ```

use serde::Deserialize;

/// Construction-time configuration for [`crate::LocalChangeSynchronizer`].
///
/// Per-call [`crate::SyncOptions`] can override the changeset knobs for a
/// single sync run; the config supplies the defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Batch eligible consecutive groups into changeset requests.
    ///
    /// Only effective when the server capability also advertises changeset
    /// support; otherwise every group is synced individually.
    ///
    /// Default: `true`
    #[serde(default = "default_use_changesets")]
    pub use_changesets: bool,

    /// Maximum serialized size of one changeset request in bytes.
    ///
    /// A run of groups is split so each request stays under this limit.
    /// A single instance larger than the limit is a fatal error.
    ///
    /// Default: 2 MB
    #[serde(default = "default_changeset_max_bytes")]
    pub changeset_max_bytes: usize,

    /// Maximum number of instances in one changeset request.
    ///
    /// Default: 250
    #[serde(default = "default_changeset_max_instances")]
    pub changeset_max_instances: usize,

    /// Re-query created instances after the walk completes.
    ///
    /// Best-effort trailing step; failures are reported in the
    /// [`crate::SyncReport`] but never fail the run.
    ///
    /// Default: `true`
    #[serde(default = "default_refresh_created")]
    pub refresh_created: bool,
}

fn default_use_changesets() -> bool {
    true
}

fn default_changeset_max_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_changeset_max_instances() -> usize {
    250
}

fn default_refresh_created() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            use_changesets: default_use_changesets(),
            changeset_max_bytes: default_changeset_max_bytes(),
            changeset_max_instances: default_changeset_max_instances(),
            refresh_created: default_refresh_created(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(config.use_changesets);
        assert_eq!(config.changeset_max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.changeset_max_instances, 250);
        assert!(config.refresh_created);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"changeset_max_instances": 10}"#).unwrap();
        assert_eq!(config.changeset_max_instances, 10);
        // Unspecified fields fall back to defaults
        assert!(config.use_changesets);
        assert_eq!(config.changeset_max_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_empty() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.changeset_max_instances, 250);
    }
}
