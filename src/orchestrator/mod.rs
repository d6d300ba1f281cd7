//! 编排层：批改队列、自动保存与应用门面

pub mod app;
pub mod auto_save;
pub mod grading_queue;

pub use app::App;
pub use auto_save::AutoSave;
pub use grading_queue::GradingQueue;
