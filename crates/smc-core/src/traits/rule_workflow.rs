// # Rule Workflow Trait
//
// IDS (Snort) rule payloads are not list entries. They travel through the
// appliance's rule configuration instead:
//
// 1. Export the current rule configuration to a directory
// 2. Save the new rules as a file in that directory
// 3. Register the file in the include list
// 4. Re-import the directory

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Trait for IDS rule-file workflow implementations
#[async_trait]
pub trait RuleWorkflow: Send + Sync {
    /// Export the current rule configuration, returning its directory
    async fn export_rule_config(&self) -> Result<PathBuf, crate::Error>;

    /// Write `rules` (one per line) to `dir/name`
    async fn save_rule_file(
        &self,
        dir: &Path,
        name: &str,
        rules: &[String],
    ) -> Result<(), crate::Error>;

    /// Register `name` in the directory's include list
    async fn register_rule_include(&self, dir: &Path, name: &str) -> Result<(), crate::Error>;

    /// Import the rule configuration from `dir`
    async fn import_rule_config(&self, dir: &Path) -> Result<(), crate::Error>;
}
