//! Polling body codec
//!
//! A poll response is either a single raw packet (`application/octet-stream`,
//! what the reference relay returns) or a batch of `u16` big-endian
//! length-prefixed packets (`application/x-lollipop-batch`).

use super::constants::BATCH_CONTENT_TYPE;
use super::Packet;
use crate::error::{Result, TransportError};
use bytes::{BufMut, Bytes, BytesMut};

const LEN_PREFIX: usize = 2;

/// Body framing selected from the response `Content-Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Single,
    Batch,
}

impl BodyFormat {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let is_batch = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(BATCH_CONTENT_TYPE));
        if is_batch {
            BodyFormat::Batch
        } else {
            BodyFormat::Single
        }
    }
}

/// Split a poll response body into packets, preserving body order.
///
/// An empty body yields no packets.
pub fn decode(body: Bytes, format: BodyFormat) -> Result<Vec<Packet>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    match format {
        BodyFormat::Single => Ok(vec![body]),
        BodyFormat::Batch => decode_batch(body),
    }
}

fn decode_batch(mut body: Bytes) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();

    while !body.is_empty() {
        if body.len() < LEN_PREFIX {
            return Err(TransportError::closed(format!(
                "truncated batch: {} trailing byte(s)",
                body.len()
            )));
        }
        let len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let _ = body.split_to(LEN_PREFIX);
        if body.len() < len {
            return Err(TransportError::closed(format!(
                "truncated batch: record of {len} bytes, {} available",
                body.len()
            )));
        }
        let packet = body.split_to(len);
        if !packet.is_empty() {
            packets.push(packet);
        }
    }

    Ok(packets)
}

/// Encode packets as a batch body.
///
/// Packets longer than `u16::MAX` cannot be represented and are rejected.
pub fn encode_batch(packets: &[Packet]) -> Result<Bytes> {
    let total: usize = packets.iter().map(|p| p.len() + LEN_PREFIX).sum();
    let mut buf = BytesMut::with_capacity(total);

    for packet in packets {
        let len = u16::try_from(packet.len()).map_err(|_| {
            TransportError::closed(format!("packet of {} bytes exceeds batch limit", packet.len()))
        })?;
        buf.put_u16(len);
        buf.put_slice(packet);
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_selection() {
        assert_eq!(BodyFormat::from_content_type(None), BodyFormat::Single);
        assert_eq!(
            BodyFormat::from_content_type(Some("application/octet-stream")),
            BodyFormat::Single
        );
        assert_eq!(
            BodyFormat::from_content_type(Some("application/x-lollipop-batch; v=1")),
            BodyFormat::Batch
        );
    }

    #[test]
    fn test_empty_body_means_nothing_pending() {
        assert!(decode(Bytes::new(), BodyFormat::Single).unwrap().is_empty());
        assert!(decode(Bytes::new(), BodyFormat::Batch).unwrap().is_empty());
    }

    #[test]
    fn test_single_body_is_one_packet() {
        let body = Bytes::from_static(&[0x45, 0x00, 0x00, 0x14]);
        let packets = decode(body.clone(), BodyFormat::Single).unwrap();
        assert_eq!(packets, vec![body]);
    }

    #[test]
    fn test_batch_preserves_order() {
        let input: Vec<Packet> = (0u8..5).map(|i| Bytes::from(vec![i; i as usize + 1])).collect();
        let body = encode_batch(&input).unwrap();
        let packets = decode(body, BodyFormat::Batch).unwrap();
        assert_eq!(packets, input);
    }

    #[test]
    fn test_truncated_batch_is_rejected() {
        let body = Bytes::from_static(&[0x00, 0x04, 0x45, 0x00]);
        assert!(matches!(
            decode(body, BodyFormat::Batch),
            Err(TransportError::ChannelClosed { .. })
        ));

        let body = Bytes::from_static(&[0x00, 0x01, 0x45, 0x00]);
        assert!(decode(body, BodyFormat::Batch).is_err());
    }

    #[test]
    fn test_oversized_packet_cannot_be_batched() {
        let packet = Bytes::from(vec![0u8; u16::MAX as usize + 1]);
        assert!(encode_batch(&[packet]).is_err());
    }
}
