//! Encoder/decoder driving the packet codec over transport frames.
//!
//! A text packet maps to exactly one textual frame; a binary packet maps to
//! one textual frame followed by its attachments as binary frames. The
//! [`Decoder`] owns the reassembly state of the packet currently in flight.

use crate::errors::Error;
use crate::packet::{Packet, PacketData};
use crate::transport::Frame;

/// Stateless packet encoder.
pub struct Encoder;

impl Encoder {
    /// Encode a packet into one textual frame followed by its binary
    /// attachments, in placeholder order.
    pub fn encode(mut packet: Packet) -> Result<Vec<Frame>, serde_json::Error> {
        let bin = match packet.inner {
            PacketData::BinaryEvent(_, ref mut bin, _) | PacketData::BinaryAck(ref mut bin, _) => {
                std::mem::take(&mut bin.bin)
            }
            _ => Vec::new(),
        };

        let text: String = packet.try_into()?;
        let mut frames = Vec::with_capacity(1 + bin.len());
        frames.push(Frame::Text(text));
        frames.extend(bin.into_iter().map(Frame::Binary));
        Ok(frames)
    }
}

/// Streaming packet decoder.
///
/// [`add`](Decoder::add) consumes one frame and returns a whole packet once
/// every expected attachment has arrived. Malformed input fails with a
/// protocol violation; [`destroy`](Decoder::destroy) drops any partially
/// reassembled packet.
#[derive(Debug, Default)]
pub struct Decoder {
    partial: Option<Packet>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, frame: Frame) -> Result<Option<Packet>, Error> {
        match frame {
            Frame::Text(text) => {
                if self.partial.is_some() {
                    return Err(Error::IncompleteBinaryPacket);
                }
                let packet = Packet::try_from(text.as_str())?;
                if packet.inner.attachment_count() > 0 {
                    self.partial = Some(packet);
                    Ok(None)
                } else {
                    Ok(Some(packet))
                }
            }
            Frame::Binary(data) => {
                let packet = self.partial.as_mut().ok_or(Error::UnexpectedBinaryFrame)?;
                let complete = match packet.inner {
                    PacketData::BinaryEvent(_, ref mut bin, _)
                    | PacketData::BinaryAck(ref mut bin, _) => {
                        bin.add_payload(data);
                        bin.is_complete()
                    }
                    _ => return Err(Error::UnexpectedBinaryFrame),
                };
                if complete {
                    Ok(self.partial.take())
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Release any accumulated partial state.
    pub fn destroy(&mut self) {
        self.partial = None;
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    #[test]
    fn encode_text_packet_single_frame() {
        let frames = Encoder::encode(Packet::event("/", "event", json!([1]))).unwrap();
        assert_eq!(frames, vec![Frame::Text("2[\"event\",1]".to_string())]);
    }

    #[test]
    fn encode_binary_packet_multiple_frames() {
        let bin = vec![Bytes::from_static(&[1]), Bytes::from_static(&[2, 3])];
        let frames =
            Encoder::encode(Packet::bin_event("/", "event", json!([]), bin.clone())).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], Frame::Binary(bin[0].clone()));
        assert_eq!(frames[2], Frame::Binary(bin[1].clone()));
    }

    #[test]
    fn decode_text_packet() {
        let mut decoder = Decoder::new();
        let packet = decoder
            .add(Frame::Text("2[\"event\",1]".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(packet, Packet::event("/", "event", json!([1])));
    }

    #[test]
    fn decode_reassembles_binary_packet() {
        let mut decoder = Decoder::new();
        let text = "52-[\"event\",{\"_placeholder\":true,\"num\":0},{\"_placeholder\":true,\"num\":1}]";
        assert!(decoder.add(Frame::Text(text.to_string())).unwrap().is_none());
        assert!(decoder
            .add(Frame::Binary(Bytes::from_static(&[1])))
            .unwrap()
            .is_none());
        let packet = decoder
            .add(Frame::Binary(Bytes::from_static(&[2])))
            .unwrap()
            .unwrap();
        match packet.inner {
            PacketData::BinaryEvent(event, bin, _) => {
                assert_eq!(event, "event");
                assert_eq!(bin.bin.len(), 2);
                assert!(bin.is_complete());
            }
            other => panic!("unexpected packet data: {other:?}"),
        }
    }

    #[test]
    fn decode_round_trips_through_encode() {
        let packets = vec![
            Packet::connect("/chat"),
            Packet::event("/", "msg", json!(["hello", 42])),
            Packet::bin_event("/", "upload", json!(["f"]), vec![Bytes::from_static(&[9])]),
            Packet::ack("/", json!(["ok"]), 1),
        ];
        for packet in packets {
            let mut decoder = Decoder::new();
            let mut decoded = None;
            for frame in Encoder::encode(packet.clone()).unwrap() {
                decoded = decoder.add(frame).unwrap();
            }
            assert_eq!(decoded.unwrap(), packet);
        }
    }

    #[test]
    fn unexpected_binary_frame_is_a_protocol_violation() {
        let mut decoder = Decoder::new();
        assert!(matches!(
            decoder.add(Frame::Binary(Bytes::from_static(&[1]))),
            Err(Error::UnexpectedBinaryFrame)
        ));
    }

    #[test]
    fn text_frame_while_reassembling_is_a_protocol_violation() {
        let mut decoder = Decoder::new();
        let text = "51-[\"event\",{\"_placeholder\":true,\"num\":0}]";
        decoder.add(Frame::Text(text.to_string())).unwrap();
        assert!(matches!(
            decoder.add(Frame::Text("2[\"event\"]".to_string())),
            Err(Error::IncompleteBinaryPacket)
        ));
    }

    #[test]
    fn destroy_releases_partial_state() {
        let mut decoder = Decoder::new();
        let text = "51-[\"event\",{\"_placeholder\":true,\"num\":0}]";
        decoder.add(Frame::Text(text.to_string())).unwrap();
        decoder.destroy();
        // a fresh text packet is accepted again
        assert!(decoder
            .add(Frame::Text("2[\"event\"]".to_string()))
            .unwrap()
            .is_some());
    }
}
