//! Database layer - adapters, destination connections, and schema bootstrap

pub mod adapter;
pub mod bootstrap;
pub mod destination;
pub mod schema;

pub use adapter::{Adapter, AdapterRegistry, ShutdownAction};
pub use bootstrap::{BootstrapReport, SchemaBootstrapper, ScriptSet};
pub use destination::{Connector, Destination, SqlxConnector};
