//! Producer lifecycle harness, stream routing fabric, and the
//! supervisor that wires plugins together and drives ordered shutdown.

pub mod fuse;
pub mod producer_base;
pub mod stream_plugins;
pub mod stream_registry;
pub mod supervisor;

pub use fuse::{monitor_fuse, Fuse};
pub use producer_base::{LoopControl, ProducerBase, ProducerHandle};
pub use stream_plugins::{Broadcast, Random, RoundRobin, Route};
pub use stream_registry::StreamRegistry;
pub use supervisor::{topo_shutdown_order, Supervisor};
