pub mod loader;
pub mod schema;

pub use loader::{
    load_from_path, load_from_str, load_policy, ConfigError, ConfigSources, CONFIG_DIR,
    CONFIG_FILE,
};
pub use schema::{CommandSection, PolicyFile, ValidationError, ValidationIssue};
