//! Tiled pyramid TIFF container: write path and read-back path.

mod reader;
mod tags;
mod writer;

pub use reader::{ByteOrder, Ifd, LevelView, TiffHeader, TiffSliceReader, HEADER_READ_SIZE};
pub use tags::{
    FieldType, TiffTag, COMPRESSION_JPEG, PHOTOMETRIC_YCBCR, SAMPLE_FORMAT_UINT,
    SUBFILE_REDUCED_RESOLUTION,
};
pub use writer::{use_big_tiff, IfdBuilder, TiffWriter, CLASSIC_PIXEL_LIMIT};
