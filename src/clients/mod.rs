pub mod extraction_client;

pub use extraction_client::{extract_with_timeout, ExtractionClient, VisionExtractionClient};
