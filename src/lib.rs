pub mod agents;
pub mod browser;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod model;
pub mod perception;
pub mod retry;
pub mod types;

pub use agents::{CommandOutcome, SessionController};
pub use browser::{BrowserDriver, ChromeBrowser};
pub use config::Config;
pub use error::{AgentError, Result};
pub use types::{ExecutionResult, Intent, PageState, Payload, Plan, PlanStatus};
