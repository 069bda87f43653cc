pub mod agents;
pub mod brain;
pub mod metrics;
pub mod safety;
pub mod workflow;
