// Task lifecycle state machine.
//
// The status enum, the events that move it, and the single transition table both
// task stores consult before every write.

pub mod events;
pub mod states;
pub mod task_state_machine;

pub use events::TaskEvent;
pub use states::TaskStatus;
pub use task_state_machine::{can_transition, next_state};
