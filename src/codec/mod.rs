//! Frame codec: ordered field writer and reader.
//!
//! There is no self-describing schema on the wire. Field order and types are
//! an implicit contract between writer and reader; the protocol layers above
//! must write and read fields in exactly matching order. The documented frame
//! layouts live in [`crate::protocol`].

mod reader;
mod writer;

pub use reader::FrameReader;
pub use writer::FrameWriter;
