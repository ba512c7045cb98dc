// Utility module

pub mod byte_buffer;

pub use byte_buffer::ByteBuffer;
