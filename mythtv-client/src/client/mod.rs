//! Backend connections and the command sets built on them.

pub mod chain;
pub mod connection;
pub mod events;
pub mod input;
pub mod recorder;

pub use chain::Chain;
pub use connection::{Connection, ConnectionConfig, FrameReader, FrameWriter};
pub use events::{EventHandler, EventListener, SubscriptionId, Subscribers};
pub use input::{free_input, free_inputs, InputSelector};
pub use recorder::{Recorder, RecorderState};
