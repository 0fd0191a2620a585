pub mod event;
pub mod heartbeat;
pub mod registry;

pub use event::StreamEvent;
pub use heartbeat::Heartbeat;
pub use registry::FanOut;
