pub mod agent;
pub mod daemon;
pub mod memory;
pub mod queue;
pub mod status;
