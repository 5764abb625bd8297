pub mod config;
pub mod daemon;
pub mod guest;
pub mod storage;
pub mod sync;
