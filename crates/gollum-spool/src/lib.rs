//! Disk spool segment store, binary wire format, the spooling producer,
//! and its independent replay reader.

pub mod producer;
pub mod replay;
pub mod spool_file;
pub mod wire;

pub use producer::SpoolingProducer;
pub use spool_file::SpoolFile;
pub use wire::{decode_message, encode_message};

pub use replay::run as run_replay_loop;
