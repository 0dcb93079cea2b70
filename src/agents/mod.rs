pub mod controller;
pub mod executor;
pub mod matcher;
pub mod planner;
pub mod session;


#[cfg(test)]
mod planner_test;

pub use controller::{CommandOutcome, ControllerState, SessionController};
pub use executor::{ActionExecutor, ExecutionReport};
pub use matcher::{ElementMatcher, MatchStage, Purpose};
pub use planner::{StepRunner, TaskPlanner};
pub use session::{CommandRecord, Session};
