pub mod analyzer;
pub mod catalog;
pub mod publisher;
pub mod segmentation;
pub mod signing;
