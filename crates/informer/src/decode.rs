//! Streaming event decoder.
//!
//! The watch response encodes one JSON document per line, with chunk
//! boundaries falling anywhere. The decoder buffers an incomplete trailing
//! fragment across chunks and emits a finished record the instant a newline
//! completes a document.

use serde::Deserialize;
use tracing::warn;

use lookout_core::{object_name, ChangeRecord, EventKind};

/// A line that is not a JSON document. Fails the stream; the coordinator
/// reconnects and re-lists, which resynchronizes the kind in full.
#[derive(Debug, thiserror::Error)]
#[error("malformed watch frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of arbitrary length; returns every record the chunk
    /// completed, in order. If a single chunk carries several documents,
    /// all of them come out of the same call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ChangeRecord>, DecodeError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if let Some(record) = decode_line(line)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<ChangeRecord>, DecodeError> {
    let wire: WireEvent = serde_json::from_slice(line)?;
    let kind = EventKind::parse(&wire.event_type);
    let name = match object_name(&wire.object) {
        Some(n) => n.to_string(),
        // Unknown types are applied as no-ops; a missing name is fine there.
        None if kind == EventKind::Unknown => String::new(),
        None => {
            warn!(event_type = %wire.event_type, "event object without metadata.name; skipped");
            return Ok(None);
        }
    };
    let object = match kind {
        EventKind::Added | EventKind::Modified => Some(wire.object),
        EventKind::Deleted | EventKind::Unknown => None,
    };
    Ok(Some(ChangeRecord { kind, name, object }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, name: &str) -> String {
        serde_json::json!({ "type": kind, "object": { "metadata": { "name": name } } })
            .to_string()
    }

    #[test]
    fn record_reassembled_across_chunk_boundary() {
        let mut dec = LineDecoder::new();
        let full = format!("{}\n{}\n", event("ADDED", "a"), event("MODIFIED", "b"));
        // Split mid-way through the second document
        let (head, tail) = full.split_at(full.len() - 20);

        let first = dec.feed(head.as_bytes()).expect("head decodes");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, EventKind::Added);
        assert_eq!(first[0].name, "a");

        let second = dec.feed(tail.as_bytes()).expect("tail decodes");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, EventKind::Modified);
        assert_eq!(second[0].name, "b");
    }

    #[test]
    fn multiple_documents_in_one_chunk_emit_in_order() {
        let mut dec = LineDecoder::new();
        let chunk = format!(
            "{}\n{}\n{}\n",
            event("ADDED", "a"),
            event("DELETED", "a"),
            event("ADDED", "b")
        );
        let records = dec.feed(chunk.as_bytes()).expect("chunk decodes");
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![EventKind::Added, EventKind::Deleted, EventKind::Added]);
        assert_eq!(records[2].name, "b");
    }

    #[test]
    fn incomplete_fragment_emits_nothing() {
        let mut dec = LineDecoder::new();
        let records = dec.feed(b"{\"type\":\"ADD").expect("fragment is fine");
        assert!(records.is_empty());
    }

    #[test]
    fn malformed_line_fails_the_stream() {
        let mut dec = LineDecoder::new();
        assert!(dec.feed(b"this is not json\n").is_err());
    }

    #[test]
    fn unrecognized_type_decodes_as_unknown() {
        let mut dec = LineDecoder::new();
        let records = dec.feed(format!("{}\n", event("BOOKMARK", "a")).as_bytes()).expect("decodes");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::Unknown);
        assert!(records[0].object.is_none());
    }

    #[test]
    fn added_without_name_is_skipped() {
        let mut dec = LineDecoder::new();
        let line = serde_json::json!({ "type": "ADDED", "object": { "metadata": {} } });
        let records = dec.feed(format!("{line}\n").as_bytes()).expect("decodes");
        assert!(records.is_empty());
    }

    #[test]
    fn crlf_terminated_lines_decode() {
        let mut dec = LineDecoder::new();
        let records = dec
            .feed(format!("{}\r\n", event("DELETED", "a")).as_bytes())
            .expect("decodes");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::Deleted);
    }

    #[test]
    fn deleted_carries_no_payload() {
        let mut dec = LineDecoder::new();
        let records = dec.feed(format!("{}\n", event("DELETED", "a")).as_bytes()).expect("decodes");
        assert!(records[0].object.is_none());
        assert_eq!(records[0].name, "a");
    }
}
