use std::collections::HashSet;

use config::Config as CConfig;
use serde::{Deserialize, Serialize};

use crate::{
    conf::{DestinationConfig, EngineConfig, LedgerConfig, SourceConfig, TableLoadSpec},
    core::SluiceError::{self, ConfigParsingError},
};

const ENV_PREFIX: &str = "SLUICE";

/// Top-level sections that environment variables may override.
const ENV_SECTIONS: [&str; 4] = ["ENGINE", "SOURCE", "DESTINATION", "LEDGER"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub tables: Vec<TableLoadSpec>,
}

impl Config {
    pub fn from_str(toml_str: &str) -> Result<Config, SluiceError> {
        let builder = CConfig::builder()
            .add_source(config::File::from_str(toml_str, config::FileFormat::Toml));
        Self::build(builder)
    }

    /// Loads a TOML file, then applies `SLUICE_`-prefixed environment
    /// overrides (`SLUICE_ENGINE__PARALLELISM=8`). Variables outside the
    /// overridable sections, such as `SLUICE_LOG`, are ignored.
    pub fn load(path: &str) -> Result<Config, SluiceError> {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::load_with_env(path, vars)
    }

    fn load_with_env(
        path: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Config, SluiceError> {
        let overrides: config::Map<String, String> =
            vars.into_iter().filter(|(key, _)| is_override(key)).collect();
        let builder = CConfig::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(overrides)),
            );
        Self::build(builder)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Config, SluiceError> {
        let config = builder
            .build()
            .map_err(|e| ConfigParsingError(e.to_string()))?
            .try_deserialize::<Config>()
            .map_err(|e| ConfigParsingError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SluiceError> {
        if self.engine.parallelism == 0 {
            return Err(ConfigParsingError(
                "engine.parallelism must be positive".to_string(),
            ));
        }
        if self.engine.max_attempts == 0 {
            return Err(ConfigParsingError(
                "engine.max_attempts must be positive".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.name.as_str()) {
                return Err(SluiceError::invalid_table(
                    &table.name,
                    "configured more than once",
                ));
            }
        }
        Ok(())
    }

    /// Tables to load in this run. An empty filter selects all of them;
    /// repeated names select a table once.
    pub fn select_tables(&self, names: &[String]) -> Result<Vec<TableLoadSpec>, SluiceError> {
        if names.is_empty() {
            return Ok(self.tables.clone());
        }
        let mut seen = HashSet::new();
        names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                self.tables
                    .iter()
                    .find(|t| &t.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigParsingError(format!("unknown table '{name}'")))
            })
            .collect()
    }
}

/// `SLUICE_<SECTION>__...` with a known section, in any case.
fn is_override(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    key.strip_prefix(ENV_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.split_once("__"))
        .is_some_and(|(section, _)| ENV_SECTIONS.contains(&section))
}
