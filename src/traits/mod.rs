//! In-process interfaces to external collaborators
//!
//! The HA engine consumes a resource directory, an out-of-band power
//! channel, a host agent channel, and an alerting sink. None of these define
//! a wire protocol here; the surrounding system provides implementations.

pub mod agent_channel;
pub mod alert_sink;
pub mod power_channel;
pub mod resource_directory;

pub use agent_channel::AgentChannel;
pub use alert_sink::{AlertSink, LogAlertSink};
pub use power_channel::{PowerChannel, PowerOperation, PowerState};
pub use resource_directory::{InMemoryResourceDirectory, ResourceDirectory};
