pub mod artifacts;
pub mod driver;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use driver::{list_devices, Platform};
pub use error::RunnerError;
pub use report::parse_maestro_results;
pub use runner::run_tests;
