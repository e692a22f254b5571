pub mod discovery;
pub mod types;
pub mod yaml;

pub use discovery::{discover, discover_all};
pub use types::{FlowSpec, TagFilter, WorkspaceConfig};
