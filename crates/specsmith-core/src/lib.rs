pub mod catalog;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use catalog::{BlockSchema, ConfigField, PortSchema, StaticCatalog};
pub use config::AppConfig;
pub use error::{Result, SpecsmithError};
pub use traits::{BlockCatalog, Oracle};
pub use types::*;
