//! Configuration types and loading for llm-mend

mod backend;
mod loader;

pub use backend::BackendConfig;
pub use loader::{MendConfig, resolve_path};
