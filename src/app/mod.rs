pub mod errors;
pub mod factory;
pub mod local;
pub mod task_runner;

pub use errors::{AppError, NotFound};
pub use factory::Providers;
pub use local::{App, Recompute};
