//! Control messages for the pipeline threads.
//!
//! ```text
//!                  +-------------------+
//!                  |  AsyncPpoPipeline |
//!                  +-------------------+
//!                     |             |
//!           ActorMsg  v             v  LearnerMsg
//!              +----------+   +----------+
//!              | Actor N  |   | Learner  |
//!              +----------+   +----------+
//!                     |             |
//!          ActorStats v             v  LearnerStats
//! ```

mod actor_msg;
mod learner_msg;

pub use actor_msg::{ActorMsg, ActorStats};
pub use learner_msg::{LearnerMsg, LearnerStats};
