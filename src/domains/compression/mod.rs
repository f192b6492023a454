// Declare submodules for the compression domain
pub mod analysis;
pub mod pipeline;
pub mod types;

pub use analysis::ContentStats;
pub use pipeline::compress_image;
pub use types::{CompressedImage, CompressionSettings};
