pub mod banded_detector;
pub mod blob;
pub mod blob_detector;
pub mod brightness;
pub mod motion;
pub mod tracker;
pub mod utils;
