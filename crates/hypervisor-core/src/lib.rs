pub mod authz;
pub mod dependency;
pub mod error;
pub mod preemption;
pub mod queue;
pub mod resource;
pub mod scheduler;
pub mod worker;

pub use error::SchedulerError;
pub use scheduler::{process_deployment, Outcome};
