// Declare domain modules
pub mod compression;
pub mod device;
pub mod messaging;
pub mod queue;
pub mod upload;
