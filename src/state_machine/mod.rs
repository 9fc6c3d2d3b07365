mod machine;
mod state;

pub use machine::{RunControl, StateMachine};
pub use state::RecordStatus;
