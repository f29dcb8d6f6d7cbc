mod engine;
mod phase;
mod workflow;

pub use engine::{FlowDefinition, PhaseHandler, WorkflowEngine};
pub use phase::Phase;
pub use workflow::{JsonMap, Task, TaskSnapshot, WorkflowState};
