// Services built on top of the parser and the collaborator traits
pub mod result;
pub mod batch;
pub mod logs;
pub mod tail;

pub use result::{CreateError, ResultParser};
pub use batch::{BatchParser, BatchResult};
pub use logs::{completion_line, LogStreamService, LogSubscription, StreamError};
pub use tail::{LineSource, LogLine, TRUNCATION_MARKER};
