pub mod executor;
pub mod rendition;
pub mod selector;
pub mod tool;
pub mod ytdlp;

// Re-export common types
pub use executor::FetchExecutor;
pub use tool::MediaTool;
pub use ytdlp::YtDlp;
