mod poll;
mod progress;

pub use poll::ChangePoller;
pub use poll::EventSink;
pub use poll::PollError;
pub use poll::PollLoop;
pub use progress::ConnectorProgress;
pub use progress::ConnectorState;
pub use progress::ProgressSnapshot;
