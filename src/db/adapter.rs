use std::collections::BTreeMap;

use sqlx::{AnyConnection, Connection};
use tracing::info;

use super::destination::{Destination, SqlxDestination};
use super::schema::{InsertValue, SqlType, TypeCategory};
use crate::dump::RawValue;
use crate::error::LoadError;

/// How statement parameters are written in SQL text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

/// Action run on a live connection right before it is closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownAction {
    None,
    Execute(String),
}

/// Query used to look up a table's column types when coercion is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnIntrospection {
    PostgresInformationSchema,
    MysqlInformationSchema,
    SqlitePragma,
}

impl ColumnIntrospection {
    /// SQL returning `(column name, declared type)` rows in ordinal order
    pub fn query(&self) -> &'static str {
        match self {
            ColumnIntrospection::PostgresInformationSchema => {
                "SELECT CAST(column_name AS TEXT), CAST(data_type AS TEXT) \
                 FROM information_schema.columns \
                 WHERE table_name = $1 AND table_schema = COALESCE(NULLIF($2, ''), current_schema()) \
                 ORDER BY ordinal_position"
            }
            ColumnIntrospection::MysqlInformationSchema => {
                "SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR) \
                 FROM information_schema.columns \
                 WHERE table_name = ? AND table_schema = COALESCE(NULLIF(?, ''), DATABASE()) \
                 ORDER BY ordinal_position"
            }
            ColumnIntrospection::SqlitePragma => {
                "SELECT name, type FROM pragma_table_info(?) ORDER BY cid"
            }
        }
    }

    /// Bind values for `query()`, given a possibly schema-qualified table name
    pub fn binds(&self, table: &str) -> Vec<String> {
        let (schema, name) = match table.rsplit_once('.') {
            Some((schema, name)) => (schema, name),
            None => ("", table),
        };
        match self {
            ColumnIntrospection::SqlitePragma => vec![name.to_string()],
            _ => vec![name.to_string(), schema.to_string()],
        }
    }
}

/// Capability set of one target database engine
///
/// Everything the engine needs to know about a destination's dialect lives
/// here, so the engine itself never branches on which database it talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    name: String,
    identifier_escape: char,
    parameter_conversion: bool,
    placeholder_style: PlaceholderStyle,
    shutdown: ShutdownAction,
    max_bind_params: usize,
    introspection: ColumnIntrospection,
    /// Wrap text-bound parameters of date, numeric, uuid... columns in CAST()
    casts_text_parameters: bool,
}

impl Adapter {
    pub fn mysql() -> Self {
        Self {
            name: "mysql".to_string(),
            identifier_escape: '`',
            parameter_conversion: false,
            placeholder_style: PlaceholderStyle::Question,
            shutdown: ShutdownAction::None,
            max_bind_params: 65_535,
            introspection: ColumnIntrospection::MysqlInformationSchema,
            casts_text_parameters: false,
        }
    }

    pub fn postgres() -> Self {
        Self {
            name: "postgres".to_string(),
            identifier_escape: '"',
            parameter_conversion: true,
            placeholder_style: PlaceholderStyle::Dollar,
            shutdown: ShutdownAction::None,
            max_bind_params: 65_535,
            introspection: ColumnIntrospection::PostgresInformationSchema,
            casts_text_parameters: true,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            name: "sqlite".to_string(),
            identifier_escape: '"',
            parameter_conversion: false,
            placeholder_style: PlaceholderStyle::Question,
            shutdown: ShutdownAction::Execute("PRAGMA optimize".to_string()),
            max_bind_params: 32_766,
            introspection: ColumnIntrospection::SqlitePragma,
            casts_text_parameters: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier_escape(&self) -> char {
        self.identifier_escape
    }

    pub fn parameter_conversion_enabled(&self) -> bool {
        self.parameter_conversion
    }

    pub fn max_bind_params(&self) -> usize {
        self.max_bind_params
    }

    pub fn introspection(&self) -> ColumnIntrospection {
        self.introspection
    }

    pub fn with_identifier_escape(mut self, escape: char) -> Self {
        self.identifier_escape = escape;
        self
    }

    pub fn with_parameter_conversion(mut self, enabled: bool) -> Self {
        self.parameter_conversion = enabled;
        self
    }

    pub fn with_shutdown(mut self, action: ShutdownAction) -> Self {
        self.shutdown = action;
        self
    }

    pub fn with_max_bind_params(mut self, max: usize) -> Self {
        self.max_bind_params = max.max(1);
        self
    }

    /// Escape a possibly schema-qualified identifier, one part at a time
    pub fn escape_identifier(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.escape_part(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn escape_part(&self, part: &str) -> String {
        match self.identifier_escape {
            '[' => format!("[{}]", part.replace(']', "]]")),
            c => {
                let doubled: String = [c, c].iter().collect();
                format!("{c}{}{c}", part.replace(c, &doubled))
            }
        }
    }

    /// Placeholder text for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder_style {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${index}"),
        }
    }

    /// Placeholder for a value bound into a column of `target` type
    pub fn parameter_sql(&self, index: usize, target: Option<&SqlType>) -> String {
        let placeholder = self.placeholder(index);
        match target {
            Some(sql_type)
                if self.parameter_conversion
                    && self.casts_text_parameters
                    && sql_type.category() == TypeCategory::StringCast =>
            {
                format!("CAST({} AS {})", placeholder, sql_type.to_postgres())
            }
            _ => placeholder,
        }
    }

    /// Convert a dump value for binding; pass-through unless conversion is enabled
    pub fn coerce_parameter(
        &self,
        raw: &RawValue,
        target: Option<&SqlType>,
    ) -> Result<InsertValue, String> {
        match target {
            Some(sql_type) if self.parameter_conversion => InsertValue::coerce(raw, sql_type),
            _ => Ok(InsertValue::untyped(raw)),
        }
    }

    /// Statement to run before closing a connection, if any
    pub fn on_shutdown(&self) -> Option<&str> {
        match &self.shutdown {
            ShutdownAction::None => None,
            ShutdownAction::Execute(sql) => Some(sql),
        }
    }

    /// Open a destination connection described by `url`
    pub async fn connect(&self, url: &str) -> Result<Box<dyn Destination>, LoadError> {
        sqlx::any::install_default_drivers();
        let conn = AnyConnection::connect(url)
            .await
            .map_err(LoadError::from_driver)?;
        info!("Connected to {} destination", self.name);
        Ok(Box::new(SqlxDestination::new(self.clone(), conn)))
    }
}

type AdapterConstructor = fn() -> Adapter;

/// Named adapters available to a run
pub struct AdapterRegistry {
    constructors: BTreeMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("mysql", Adapter::mysql);
        registry.register("mariadb", Adapter::mysql);
        registry.register("postgres", Adapter::postgres);
        registry.register("postgresql", Adapter::postgres);
        registry.register("sqlite", Adapter::sqlite);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: AdapterConstructor) {
        self.constructors.insert(name.to_lowercase(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Adapter, LoadError> {
        let constructor = self
            .constructors
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| {
                LoadError::Configuration(format!(
                    "Unknown database '{}'. Available databases: {}",
                    name,
                    self.names().join(", ")
                ))
            })?;
        Ok(constructor())
    }
}
