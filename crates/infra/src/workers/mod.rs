//! Background consumer loops.

pub mod processor_worker;

pub use processor_worker::{ProcessorWorker, WorkerHandle};
