//! Domain model (IDs, records, status, outcomes, catalog, events).

pub mod actor;
pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod state;
pub mod task_type;

pub use actor::Actor;
pub use agent::{Agent, NewAgent, RatingSummary, Review};
pub use errors::{ErrorKind, TaskError, TaskFailure};
pub use events::{DomainEvent, EventKind};
pub use ids::{AgentId, IdParseError, OrganizationId, RecordId, ReviewId, UserId};
pub use outcome::{Outcome, Terminal};
pub use record::{NewRecord, Record, RecordKind, SubjectId, TransitionError};
pub use state::RecordStatus;
pub use task_type::{TaskType, TaskTypeError};
