pub mod detector;
pub mod engine;
pub mod node;
pub mod paths;
pub mod sink;
pub mod transfer;
pub mod watermark;
pub mod watermark_pg;
pub mod watermark_sqlite;
