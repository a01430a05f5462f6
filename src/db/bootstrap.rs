use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use super::destination::Destination;
use crate::error::LoadError;

/// Names under which the post-creation script may be supplied
const POST_SCRIPT_NAMES: [&str; 2] = ["scripts", "scripts.sql"];

/// Creation scripts keyed by lowercased file name (`cities.tbl`, `scripts`)
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    scripts: HashMap<String, String>,
}

impl ScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, text: impl Into<String>) {
        self.scripts
            .insert(name.as_ref().to_lowercase(), text.into());
    }

    /// Load every regular file of a directory
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let dir = dir.as_ref();
        let mut set = Self::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            LoadError::bootstrap(dir.display().to_string(), format!("cannot read directory: {e}"))
        })?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let text = tokio::fs::read_to_string(entry.path()).await.map_err(|e| {
                LoadError::bootstrap(name.clone(), format!("cannot read script: {e}"))
            })?;
            set.insert(&name, text);
        }
        debug!(dir = %dir.display(), scripts = set.scripts.len(), "Loaded bootstrap scripts");
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.scripts.get(&name.to_lowercase()).map(String::as_str)
    }

    fn table_script(&self, table: &str) -> Option<&str> {
        self.get(&format!("{table}.tbl"))
    }

    fn post_script(&self) -> Option<(&str, &str)> {
        POST_SCRIPT_NAMES
            .iter()
            .find_map(|name| self.get(name).map(|text| (*name, text)))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ScriptSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, text) in iter {
            set.insert(name, text);
        }
        set
    }
}

/// What a bootstrap pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub tables_created: Vec<String>,
    pub post_statements_executed: usize,
}

/// Creates missing tables from their scripts, in a fixed order
#[derive(Debug, Clone)]
pub struct SchemaBootstrapper {
    tables: Vec<String>,
    scripts: ScriptSet,
}

impl SchemaBootstrapper {
    /// `table_order` is a comma-separated list of table names
    pub fn new(table_order: &str, scripts: ScriptSet) -> Self {
        let tables = table_order
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { tables, scripts }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub async fn bootstrap(
        &self,
        destination: &mut dyn Destination,
    ) -> Result<BootstrapReport, LoadError> {
        let mut report = BootstrapReport::default();

        for table in &self.tables {
            if destination.table_exists(table).await {
                debug!(table, "Table exists");
                continue;
            }
            let script_name = format!("{table}.tbl");
            let script = self.scripts.table_script(table).ok_or_else(|| {
                LoadError::bootstrap(&script_name, "table is missing and no creation script was found")
            })?;
            destination
                .execute(script)
                .await
                .map_err(|e| LoadError::bootstrap(&script_name, e.to_string()))?;
            info!(table, "Created table");
            report.tables_created.push(table.clone());
        }

        if report.tables_created.is_empty() {
            return Ok(report);
        }

        if let Some((name, text)) = self.scripts.post_script() {
            for (line_no, line) in text.lines().enumerate() {
                let statement = line.trim();
                if statement.is_empty() {
                    continue;
                }
                destination.execute(statement).await.map_err(|e| {
                    LoadError::bootstrap(format!("{} line {}", name, line_no + 1), e.to_string())
                })?;
                report.post_statements_executed += 1;
            }
            info!(
                statements = report.post_statements_executed,
                "Executed post-creation scripts"
            );
        }

        Ok(report)
    }
}
