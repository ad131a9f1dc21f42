pub mod backup;
pub mod core;
pub mod marks;
pub mod registry;
pub mod results;
pub mod setup;
pub mod workflow;
