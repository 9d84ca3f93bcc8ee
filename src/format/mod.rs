//! Container and codec wire formats: JPEG streams and the TIFF container.

pub mod jpeg;
pub mod tiff;
