pub mod cache;

pub use cache::MemoCache;
