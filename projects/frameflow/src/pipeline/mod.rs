pub mod link;
pub mod runner;
pub mod sink;
pub mod source;

pub use link::{Flow, FrameSink, FrameSource, LinkProps, OutputLink};
