//! Fixed binary record format for spool segments: a 4-byte little-endian
//! payload length, three 8-byte fields, then the payload — exactly the
//! layout spec.md §6 documents for the persisted spool layout.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use gollum_core::{Message, StreamId};

/// Appends the wire encoding of `msg` to `out`.
pub fn encode_message(msg: &Message, out: &mut Vec<u8>) -> io::Result<()> {
    out.write_u32::<LittleEndian>(msg.data().len() as u32)?;
    out.write_u64::<LittleEndian>(msg.stream_id().0)?;
    out.write_u64::<LittleEndian>(msg.prev_stream_id().0)?;
    out.write_u64::<LittleEndian>(msg.sequence())?;
    out.write_i64::<LittleEndian>(msg.timestamp_nanos())?;
    out.write_all(msg.data())?;
    Ok(())
}

/// Reads one record from `reader`. Returns `Ok(None)` at a clean
/// end-of-stream (no partial record started); any other I/O error,
/// including a truncated record, is propagated.
pub fn decode_message(reader: &mut impl Read) -> io::Result<Option<Message>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let stream_id = reader.read_u64::<LittleEndian>()?;
    let prev_stream_id = reader.read_u64::<LittleEndian>()?;
    let sequence = reader.read_u64::<LittleEndian>()?;
    let timestamp_nanos = reader.read_i64::<LittleEndian>()?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(Message::from_parts(
        payload,
        StreamId(stream_id),
        StreamId(prev_stream_id),
        sequence,
        timestamp_nanos,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gollum_core::SequenceGenerator;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_single_message() {
        let seq = SequenceGenerator::new();
        let msg = Message::new(b"hello".to_vec(), StreamId(7), &seq);
        let mut buf = Vec::new();
        encode_message(&msg, &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = decode_message(&mut cursor).unwrap().expect("one record");
        assert_eq!(decoded.data(), msg.data());
        assert_eq!(decoded.stream_id(), msg.stream_id());
        assert_eq!(decoded.prev_stream_id(), msg.prev_stream_id());
        assert_eq!(decoded.sequence(), msg.sequence());
        assert_eq!(decoded.timestamp_nanos(), msg.timestamp_nanos());
    }

    #[test]
    fn round_trips_multiple_messages_in_order() {
        let seq = SequenceGenerator::new();
        let msgs: Vec<Message> = (0..5)
            .map(|i| Message::new(format!("m{i}").into_bytes(), StreamId(1), &seq))
            .collect();
        let mut buf = Vec::new();
        for m in &msgs {
            encode_message(m, &mut buf).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let mut decoded = Vec::new();
        while let Some(m) = decode_message(&mut cursor).unwrap() {
            decoded.push(m);
        }
        assert_eq!(decoded.len(), msgs.len());
        for (original, round_tripped) in msgs.iter().zip(decoded.iter()) {
            assert_eq!(original.data(), round_tripped.data());
            assert_eq!(original.sequence(), round_tripped.sequence());
        }
    }

    #[test]
    fn empty_input_decodes_to_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(decode_message(&mut cursor).unwrap().is_none());
    }
}
