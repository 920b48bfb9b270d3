pub mod controller;
pub mod dispatcher;
pub mod handle;
pub mod recorder;
pub mod telemetry;
pub mod tuning;
