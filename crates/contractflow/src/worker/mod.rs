pub mod job;
pub mod pool;

pub use job::{DocumentJob, JobInput, JobStatus, ProcessingMode, ProcessingResult};
pub use pool::WorkerPool;
