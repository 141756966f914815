pub mod config;
pub mod connection;
pub mod intake;
pub mod secrets;
pub mod sync;
pub mod telemetry;
pub mod worker;
