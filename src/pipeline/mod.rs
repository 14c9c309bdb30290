//! The handler pipeline: a doubly-linked chain of contexts bracketed by
//! synthetic Head and Tail handlers (spec §3 "Pipeline", §4.5).

mod context;
mod handler;
mod pipeline;

pub use context::HandlerContext;
pub use handler::{DuplexHandler, InboundHandler, OutboundHandler, PipelineMessage};
pub use pipeline::Pipeline;

pub(crate) use pipeline::PipelineChannelLink;
