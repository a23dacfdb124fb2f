pub mod decoder;

pub use decoder::VideoDecoder;
