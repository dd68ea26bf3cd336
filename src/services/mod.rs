pub mod command_task;
pub mod operation;
pub mod progress_log;
pub mod transform;
