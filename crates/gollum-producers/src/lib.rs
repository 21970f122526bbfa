//! Concrete producer plugins: the adaptive-window batched exemplar
//! (generic over an abstract [`transport::Transport`]) plus the
//! stdout/null sinks used in wiring and tests, and a minimal concrete
//! `Consumer` standing in for the out-of-scope real sources.

pub mod batched;
pub mod null;
pub mod sequence;
pub mod stdout;
pub mod transport;

pub use batched::BatchedProducer;
pub use null::NullProducer;
pub use sequence::SequenceConsumer;
pub use stdout::StdoutProducer;
pub use transport::{SendOutcome, StdoutTransport, Transport};
