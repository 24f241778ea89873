//! Background tasks for the SFU controller.
//!
//! # Tasks
//!
//! - `node_monitor` - Pings connected media nodes, reconnects lost ones and
//!   keeps readiness in step with the number of running nodes
//! - `node_events` - Resynchronizes sessions when a node comes back as a
//!   different server instance

pub mod node_events;
pub mod node_monitor;

pub use node_events::start_node_event_listener;
pub use node_monitor::{check_nodes, start_node_monitor};
