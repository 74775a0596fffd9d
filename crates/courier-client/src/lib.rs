pub mod cleaner;
pub mod github;
pub mod http_backend;
pub mod reader_backend;
pub mod stack;
pub mod stackoverflow;

#[cfg(feature = "browser")]
pub mod browser_backend;

pub use cleaner::HtmdCleaner;
pub use github::GithubIssueResolver;
pub use http_backend::HttpBackend;
pub use reader_backend::ReaderBackend;
pub use stack::{Stack, StandardStack};
pub use stackoverflow::StackOverflowResolver;

#[cfg(feature = "browser")]
pub use browser_backend::BrowserBackend;
