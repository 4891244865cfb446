pub mod agent_protocol;
pub mod arguments;
pub mod entities;
pub mod events;
pub mod prepared;
pub mod recurrence;
pub mod repositories;
pub mod views;

pub use agent_protocol::*;
pub use entities::*;
pub use events::*;
pub use prepared::*;
pub use recurrence::{CompiledSchedule, RecurrenceRule, RuleDefinition, ScheduleZone};
pub use repositories::*;
pub use scheduler_core::{SchedulerError, SchedulerResult};
pub use views::*;
