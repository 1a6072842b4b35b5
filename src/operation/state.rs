//! Persisted load progress, used to resume an interrupted load.
//!
//! ```yaml
//! version: 1
//! state:
//!   stage: update
//!   id-map:
//!     001000000000000AAA: 001000000000009AAA
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::identifier::RecordId;
use crate::operation::translation::IdTranslationTable;
use crate::store::memory::is_json;

const STATE_VERSION: u32 = 1;

/// Which load phase a run was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStage {
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageState {
    pub stage: LoadStage,
    #[serde(default)]
    pub id_map: BTreeMap<RecordId, RecordId>,
}

/// Snapshot of a load's stage and identifier translations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    pub state: StageState,
}

impl RunState {
    pub fn new(stage: LoadStage, table: &IdTranslationTable) -> Self {
        Self {
            version: STATE_VERSION,
            state: StageState {
                stage,
                id_map: table.to_map(),
            },
        }
    }

    pub fn stage(&self) -> LoadStage {
        self.state.stage
    }

    /// Rebuild the translation table recorded in this state
    pub fn translation_table(&self) -> IdTranslationTable {
        IdTranslationTable::from(self.state.id_map.clone())
    }

    /// Read a state file; `.json` files are JSON, anything else YAML.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let state: RunState = if is_json(path) {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        if state.version != STATE_VERSION {
            return Err(MigrationError::Config(format!(
                "Unsupported state file version {} in {}",
                state.version,
                path.display()
            )));
        }
        Ok(state)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> IdTranslationTable {
        let mut table = IdTranslationTable::new();
        table
            .register(
                RecordId::parse("001000000000000").unwrap(),
                RecordId::parse("001000000000009").unwrap(),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_yaml_shape() {
        let state = RunState::new(LoadStage::Update, &table());
        let yaml = serde_yaml::to_string(&state).unwrap();

        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("stage: update"));
        assert!(yaml.contains("id-map:"));
        assert!(yaml.contains("001000000000000AAA: 001000000000009AAA"));
    }

    #[test]
    fn test_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new(LoadStage::Insert, &table());

        for name in ["state.yaml", "state.json"] {
            let path = dir.path().join(name);
            state.save_to_file(&path).unwrap();

            let loaded = RunState::load_from_file(&path).unwrap();
            assert_eq!(loaded, state);
            assert_eq!(loaded.translation_table(), table());
        }
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        fs::write(&path, "version: 2\nstate:\n  stage: insert\n").unwrap();

        assert!(matches!(RunState::load_from_file(&path), Err(MigrationError::Config(_))));
    }
}
