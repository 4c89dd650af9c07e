//! Framework configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! max_tree_depth = 512
//!
//! [compatibility]
//! loaded_dispatch = "synchronous"
//! share_template_values = false
//! state_storyboard_handoff = "stop-old-then-start-new"
//! ```

use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::walker::DEFAULT_RECURSION_LIMIT;

/// When queued Loaded/Unloaded notifications are delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadedDispatch {
    /// Queued on the dispatcher at `Loaded` priority and fired when the
    /// queue is processed
    #[default]
    Deferred,
    /// Fired before the tree operation that caused them returns
    Synchronous,
}

/// Order of storyboard hand-off when a visual state change completes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryboardHandoff {
    /// Begin the new state's storyboard, then stop the old one. Targets both
    /// animate move directly to the new animation.
    #[default]
    StartNewThenStopOld,
    /// Stop the old storyboard first. Shared targets briefly fall back to
    /// their base value.
    StopOldThenStartNew,
}

/// Replacements for legacy behavior switches; each value has one documented
/// behavior
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompatibilityOptions {
    pub loaded_dispatch: LoadedDispatch,
    /// Compile shareable template values once instead of per instance
    pub share_template_values: bool,
    pub state_storyboard_handoff: StoryboardHandoff,
}

impl Default for CompatibilityOptions {
    fn default() -> Self {
        Self {
            loaded_dispatch: LoadedDispatch::Deferred,
            share_template_values: true,
            state_storyboard_handoff: StoryboardHandoff::StartNewThenStopOld,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Nesting depth at which a tree walk reports a loop
    pub max_tree_depth: usize,
    pub compatibility: CompatibilityOptions,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: DEFAULT_RECURSION_LIMIT,
            compatibility: CompatibilityOptions::default(),
        }
    }
}

impl FrameworkConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: FrameworkConfig =
            toml::from_str(source).map_err(|e| CoreError::Config(e.to_string()))?;
        if config.max_tree_depth == 0 {
            return Err(CoreError::Config("max_tree_depth must be positive".into()));
        }
        Ok(config)
    }
}
