//! Migration discovery
//!
//! Scripts come either from the manifest compiled into the binary or from a
//! directory laid out as `<root>/main/*.sql` and `<root>/tenant/*.sql`.
//! Procedures are registered in code and merged with the scripts of their
//! set; a version may be claimed by a script or a procedure, not both.

use crate::artifact::{order_artifacts, MigrationArtifact, MigrationProcedure};
use crate::embedded;
use crate::error::{MigrationError, Result};
use crate::procedures;
use gymdesk_models::MigrationSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Scripts embedded at compile time
    Embedded,
    /// Scripts read from disk on every discovery
    Directory(PathBuf),
}

impl Default for ScriptSource {
    fn default() -> Self {
        Self::Embedded
    }
}

#[derive(Clone)]
struct RegisteredProcedure {
    set: MigrationSet,
    identifier: String,
    procedure: Arc<dyn MigrationProcedure>,
}

/// All migration artifacts known to this process
#[derive(Clone, Default)]
pub struct MigrationCatalog {
    scripts: ScriptSource,
    procedures: Vec<RegisteredProcedure>,
}

impl MigrationCatalog {
    pub fn new(scripts: ScriptSource) -> Self {
        Self {
            scripts,
            procedures: Vec::new(),
        }
    }

    /// Register the procedures shipped with this crate
    pub fn with_builtin_procedures(mut self) -> Self {
        for (set, identifier, procedure) in procedures::builtin() {
            self = self.with_procedure(set, identifier, procedure);
        }
        self
    }

    pub fn with_procedure(
        mut self,
        set: MigrationSet,
        identifier: impl Into<String>,
        procedure: Arc<dyn MigrationProcedure>,
    ) -> Self {
        self.procedures.push(RegisteredProcedure {
            set,
            identifier: identifier.into(),
            procedure,
        });
        self
    }

    pub fn script_source(&self) -> &ScriptSource {
        &self.scripts
    }

    /// Every artifact of `set`, validated and sorted by version
    pub async fn discover(&self, set: MigrationSet) -> Result<Vec<MigrationArtifact>> {
        let mut artifacts = match &self.scripts {
            ScriptSource::Embedded => embedded::scripts(set)
                .iter()
                .map(|(file, sql)| MigrationArtifact::script(set, file, *sql))
                .collect::<Result<Vec<_>>>()?,
            ScriptSource::Directory(root) => read_directory(set, &root.join(set.as_str())).await?,
        };

        for registered in self.procedures.iter().filter(|p| p.set == set) {
            artifacts.push(MigrationArtifact::procedure(
                set,
                &registered.identifier,
                registered.procedure.clone(),
            )?);
        }

        order_artifacts(artifacts)
    }
}

async fn read_directory(set: MigrationSet, dir: &Path) -> Result<Vec<MigrationArtifact>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Migration directory {} not found, {} set is empty", dir.display(), set);
            return Ok(Vec::new());
        }
        Err(e) => return Err(MigrationError::Io(e)),
    };

    let mut artifacts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let file_name = file_name
            .to_str()
            .ok_or_else(|| MigrationError::invalid(entry.path().display().to_string(), "file name is not UTF-8"))?;

        // Editor swap files, .gitkeep and friends
        if file_name.starts_with('.') {
            continue;
        }

        let sql = tokio::fs::read_to_string(entry.path()).await?;
        artifacts.push(MigrationArtifact::script(set, file_name, sql)?);
    }

    Ok(artifacts)
}
