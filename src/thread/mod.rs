//! Threading primitives
//!
//! - `TaskRunner`: a FIFO of closures bound to one thread
//! - `Actor`: an object owned by a runner thread and reached by posting
//! - `WorkerPool`: a shared concurrent pool for decode work

pub mod actor;
pub mod runner;
pub mod worker_pool;

pub use actor::{Actor, WeakActor};
pub use runner::{Task, TaskRunner, ThreadRunner};
pub use worker_pool::WorkerPool;
