mod item;
mod results;

pub use item::{ClassificationResult, TokenLogprob, TopLogprob, Usage, WorkItem};
pub use results::{ResultLog, ResultSet};
