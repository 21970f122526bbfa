//! Concrete `Formatter` implementations shipped by the core. Only the
//! ones the spooling producer and the testable properties need directly;
//! the full formatter grammar (JSON directives, envelope, runlength,
//! timestamp) is an external collaborator's concern.

use crate::message::Message;
use crate::plugin::Formatter;

/// Passes the message payload through unchanged. The default formatter
/// for any plugin that declares no `Formatter` option.
pub struct IdentityFormatter;

impl Formatter for IdentityFormatter {
    fn format(&self, msg: &Message) -> (Vec<u8>, Option<u64>) {
        (msg.data().to_vec(), None)
    }
}

/// Passes the payload through unchanged, same as [`IdentityFormatter`],
/// but under the name the spooling producer pins via
/// [`crate::PluginConfig::override_value`]: the segment wire format
/// (`gollum-spool`'s `wire::encode_message`) already fixes the on-disk
/// layout, so the `Formatter` step ahead of it exists only to guarantee
/// no user-configured formatter (JSON, envelope, ...) mangles a payload
/// that still has to decode byte-for-byte on replay.
pub struct BinaryFormatter;

impl Formatter for BinaryFormatter {
    fn format(&self, msg: &Message) -> (Vec<u8>, Option<u64>) {
        (msg.data().to_vec(), None)
    }
}

/// Wraps another formatter's output with a `"<sequence>:"` prefix.
/// Defaults to [`IdentityFormatter`] when constructed with `new`.
pub struct SequenceFormatter {
    inner: Box<dyn Formatter>,
}

impl SequenceFormatter {
    pub fn new() -> Self {
        Self::wrapping(Box::new(IdentityFormatter))
    }

    pub fn wrapping(inner: Box<dyn Formatter>) -> Self {
        Self { inner }
    }
}

impl Default for SequenceFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for SequenceFormatter {
    fn format(&self, msg: &Message) -> (Vec<u8>, Option<u64>) {
        let (base, stream) = self.inner.format(msg);
        let mut out = format!("{}:", msg.sequence()).into_bytes();
        out.extend_from_slice(&base);
        (out, stream)
    }
}
