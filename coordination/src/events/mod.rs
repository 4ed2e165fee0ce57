//! Table events: the status side channel of a table orchestrator
//!
//! The orchestrator publishes a [`TableEvent`] for every transition, raised
//! signal, failed call and dropped hardware result. Consumers (dashboards, the
//! hardware lamp bridge, tests) subscribe through the broadcast [`EventBus`].
//! The latest [`TableStatus`] snapshot is also kept on a `watch` channel.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Orchestrator │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{TableEvent, TableStatus};
