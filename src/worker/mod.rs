pub mod scheduler;
pub mod sweeper;

pub use scheduler::ChunkScheduler;
pub use sweeper::ResumeSweeper;
