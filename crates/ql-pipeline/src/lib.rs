//! The worker graph: source stages, the object-reader stage, completion
//! tracking, ack routing, and the supervisor that wires them together and
//! drives shutdown.

pub mod ack_router;
pub mod context;
pub mod counters;
pub mod error;
pub mod parser_factory;
pub mod reader;
pub mod source_list;
pub mod source_queue;
pub mod supervisor;
pub mod tracker;

pub use context::{ParserContext, WorkItem};
pub use counters::PipelineCounters;
pub use error::{PipelineError, Result};
pub use parser_factory::build_parser_context;
pub use reader::ObjectReaderStage;
pub use source_list::{PrefixListSourceStage, PrefixSource};
pub use source_queue::{QueuePollSourceStage, QueueSource};
pub use supervisor::{PipelineResult, Supervisor};
pub use tracker::CompletionTracker;
