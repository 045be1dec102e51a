use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{FramecastError, Result};

/// Opaque token grouping all envelopes of one chunking run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chunk of the source text plus routing metadata. The serialised form is
/// exactly what ends up inside the optical code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: StreamId,
    pub seq: usize,
    pub total: usize,
    /// Base64 of the chunk's UTF-8 bytes.
    pub data: String,
}

impl Envelope {
    /// Serialises the envelope into the JSON payload handed to the encoder.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON payload back into an envelope.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(payload)?;
        if envelope.total == 0 || envelope.seq >= envelope.total {
            return Err(FramecastError::Reassembly(format!(
                "sequence {} is outside a stream of {} envelopes",
                envelope.seq, envelope.total
            )));
        }
        Ok(envelope)
    }

    /// Decodes the chunk text carried in `data`.
    pub fn decode_data(&self) -> Result<String> {
        let bytes = STANDARD.decode(&self.data)?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Output of one chunking run. The stream id is `None` only for the empty
/// "no stream" state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    pub stream_id: Option<StreamId>,
    pub envelopes: Vec<Envelope>,
}

impl ChunkSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Envelope> {
        self.envelopes.get(index)
    }

    /// Concatenates the decoded chunks in `seq` order after checking that the
    /// list forms one complete run.
    pub fn reassemble(&self) -> Result<String> {
        let mut text = String::new();
        for (position, envelope) in self.envelopes.iter().enumerate() {
            if Some(&envelope.id) != self.stream_id.as_ref() {
                return Err(FramecastError::Reassembly(format!(
                    "envelope {position} belongs to stream {}",
                    envelope.id
                )));
            }
            if envelope.seq != position || envelope.total != self.envelopes.len() {
                return Err(FramecastError::Reassembly(format!(
                    "expected {position}/{}, found {}/{}",
                    self.envelopes.len(),
                    envelope.seq,
                    envelope.total
                )));
            }
            text.push_str(&envelope.decode_data()?);
        }
        Ok(text)
    }
}

/// Slices `text` into runs of `chunk_size` characters and wraps each run in an
/// envelope. A fresh stream id is drawn on every call.
pub fn chunk(text: &str, chunk_size: usize) -> Result<ChunkSet> {
    if chunk_size == 0 {
        return Err(FramecastError::InvalidChunkSize(chunk_size));
    }
    if text.trim().is_empty() {
        return Ok(ChunkSet::empty());
    }

    let slices = split_chars(text, chunk_size);
    let total = slices.len();
    let id = StreamId::generate();
    let envelopes = slices
        .into_iter()
        .enumerate()
        .map(|(seq, slice)| Envelope {
            id: id.clone(),
            seq,
            total,
            data: STANDARD.encode(slice.as_bytes()),
        })
        .collect();

    tracing::debug!(stream = %id, total, chunk_size, "chunked text");

    Ok(ChunkSet {
        stream_id: Some(id),
        envelopes,
    })
}

fn split_chars(text: &str, chunk_size: usize) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            slices.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        slices.push(&text[start..]);
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(set: &ChunkSet) -> Vec<String> {
        set.envelopes
            .iter()
            .map(|envelope| envelope.decode_data().unwrap())
            .collect()
    }

    #[test]
    fn splits_into_fixed_width_runs() {
        let set = chunk("ABCDEFGHIJ", 4).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(decoded(&set), vec!["ABCD", "EFGH", "IJ"]);
        assert_eq!(set.envelopes[0].data, "QUJDRA==");
        for (seq, envelope) in set.envelopes.iter().enumerate() {
            assert_eq!(envelope.seq, seq);
            assert_eq!(envelope.total, 3);
            assert_eq!(Some(&envelope.id), set.stream_id.as_ref());
        }
    }

    #[test]
    fn empty_and_whitespace_text_yield_no_stream() {
        for text in ["", "   ", "\n\t "] {
            let set = chunk(text, 8).unwrap();
            assert!(set.is_empty());
            assert!(set.stream_id.is_none());
        }
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = chunk("hello", 0).unwrap_err();
        assert!(matches!(err, FramecastError::InvalidChunkSize(0)));
    }

    #[test]
    fn partitions_and_round_trips_small_inputs() {
        let source = "Grüße, 世界! 🎉 line\nbreak";
        let chars: Vec<char> = source.chars().collect();

        for len in 1..=chars.len() {
            let text: String = chars[..len].iter().collect();
            if text.trim().is_empty() {
                continue;
            }
            for chunk_size in 1..=len + 2 {
                let set = chunk(&text, chunk_size).unwrap();
                assert_eq!(set.len(), len.div_ceil(chunk_size));
                assert_eq!(set.reassemble().unwrap(), text);
            }
        }
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let set = chunk("ééé", 2).unwrap();
        assert_eq!(decoded(&set), vec!["éé", "é"]);
    }

    #[test]
    fn stream_id_is_fresh_for_identical_input() {
        let first = chunk("same text", 3).unwrap();
        let second = chunk("same text", 3).unwrap();

        assert_ne!(first.stream_id, second.stream_id);
        let strip = |set: &ChunkSet| -> Vec<(usize, usize, String)> {
            set.envelopes
                .iter()
                .map(|e| (e.seq, e.total, e.data.clone()))
                .collect()
        };
        assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn payload_uses_wire_field_names() {
        let set = chunk("hi", 10).unwrap();
        let payload = set.envelopes[0].to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["seq"], 0);
        assert_eq!(value["total"], 1);
        assert_eq!(value["data"], "aGk=");
        assert_eq!(value["id"], set.stream_id.unwrap().as_str());

        let parsed = Envelope::from_payload(&payload).unwrap();
        assert_eq!(parsed, set.envelopes[0]);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            Envelope::from_payload("not json"),
            Err(FramecastError::Envelope(_))
        ));
        assert!(matches!(
            Envelope::from_payload(r#"{"id":"x","seq":3,"total":3,"data":""}"#),
            Err(FramecastError::Reassembly(_))
        ));
    }

    #[test]
    fn reassembly_detects_gaps() {
        let mut set = chunk("ABCDEFGHIJ", 4).unwrap();
        set.envelopes.remove(1);
        assert!(matches!(
            set.reassemble(),
            Err(FramecastError::Reassembly(_))
        ));
    }
}
