pub mod relay;
pub mod staging;
pub mod sweeper;
