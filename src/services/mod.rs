pub mod file_resolver;
pub mod grading;
pub mod matcher;

pub use file_resolver::FileResolver;
pub use grading::GradingEngine;
