//! IDS rule-file staging
//!
//! Rule payloads are written to a rule file, the file is listed in
//! `rules_include.config`, and the directory is handed back to the
//! appliance's rule configuration import.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::traits::RuleWorkflow;

/// Name of the include list inside the rule configuration directory
pub const RULES_INCLUDE_FILE: &str = "rules_include.config";

/// Rule file name used for batch `batch_id`
pub fn rule_file_name(batch_id: i64) -> String {
    format!("dim_batch_{}.rules", batch_id)
}

/// Write `rules` to `dir/name`, one rule per line
///
/// The directory must already exist. An existing file is replaced.
pub async fn save_rule_file(dir: &Path, name: &str, rules: &[String]) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::rule_workflow(format!(
            "rule directory does not exist: {}",
            dir.display()
        )));
    }

    let path = dir.join(name);
    let mut content = String::new();
    for rule in rules {
        content.push_str(rule);
        content.push('\n');
    }

    fs::write(&path, content).await.map_err(|e| {
        Error::rule_workflow(format!("failed to write {}: {}", path.display(), e))
    })?;

    debug!("Wrote {} rule(s) to {}", rules.len(), path.display());
    Ok(path)
}

/// Append `include <name>` to the directory's include list
pub async fn register_rule_include(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(RULES_INCLUDE_FILE);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| Error::rule_workflow(format!("failed to open {}: {}", path.display(), e)))?;

    file.write_all(format!("include {}\n", name).as_bytes())
        .await
        .map_err(|e| Error::rule_workflow(format!("failed to write {}: {}", path.display(), e)))?;
    file.flush()
        .await
        .map_err(|e| Error::rule_workflow(format!("failed to flush {}: {}", path.display(), e)))?;

    Ok(())
}

/// Run the full export, save, include, import sequence for one batch
pub async fn apply_rules(workflow: &dyn RuleWorkflow, batch_id: i64, rules: &[String]) -> Result<()> {
    let dir = workflow.export_rule_config().await?;
    let name = rule_file_name(batch_id);

    workflow.save_rule_file(&dir, &name, rules).await?;
    workflow.register_rule_include(&dir, &name).await?;
    workflow.import_rule_config(&dir).await?;

    info!("Batch {}: staged {} rule(s) in {}", batch_id, rules.len(), name);
    Ok(())
}

/// Rule workflow that stages everything in a local directory
///
/// Export hands out the staging directory (creating it when missing);
/// import only records that the directory is ready for pickup.
#[derive(Debug, Clone)]
pub struct StagingRuleWorkflow {
    dir: PathBuf,
}

impl StagingRuleWorkflow {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RuleWorkflow for StagingRuleWorkflow {
    async fn export_rule_config(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::rule_workflow(format!(
                "failed to create staging directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        Ok(self.dir.clone())
    }

    async fn save_rule_file(&self, dir: &Path, name: &str, rules: &[String]) -> Result<()> {
        save_rule_file(dir, name, rules).await.map(|_| ())
    }

    async fn register_rule_include(&self, dir: &Path, name: &str) -> Result<()> {
        register_rule_include(dir, name).await
    }

    async fn import_rule_config(&self, dir: &Path) -> Result<()> {
        info!("Rule configuration staged in {}", dir.display());
        Ok(())
    }
}
