pub mod queue;
pub mod transcoder;
pub mod watchdog;
pub mod worker;
