pub mod memory;
pub mod queue;

// Re-export common types
pub use memory::MemoryQueue;
