// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Generic stream encapsulation of upper layer packets
//!
//! Packets are carried either whole in a `Full` PDU or split over a `Start`
//! PDU, any number of `Continuation` PDUs and an `End` PDU sharing a fragment
//! id.

use bytes::{Bytes, BytesMut};
use s2n_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};
use std::collections::VecDeque;

/// Largest packet that can be encapsulated
pub const MAX_PACKET_BYTES: usize = u16::MAX as usize;

const START_FLAG: u8 = 0x80;
const END_FLAG: u8 = 0x40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PduType {
    Full,
    Start,
    Continuation,
    End,
}

impl PduType {
    #[inline]
    fn flags(self) -> u8 {
        match self {
            Self::Full => START_FLAG | END_FLAG,
            Self::Start => START_FLAG,
            Self::Continuation => 0,
            Self::End => END_FLAG,
        }
    }

    #[inline]
    fn from_flags(flags: u8) -> Self {
        match (flags & START_FLAG != 0, flags & END_FLAG != 0) {
            (true, true) => Self::Full,
            (true, false) => Self::Start,
            (false, false) => Self::Continuation,
            (false, true) => Self::End,
        }
    }

    /// Encoded size of the header of a PDU of this type
    #[inline]
    pub const fn header_len(self) -> usize {
        match self {
            Self::Full => 1,
            Self::Start => 4,
            Self::Continuation | Self::End => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub pdu_type: PduType,
    /// Shared by the fragments of one packet, zero for `Full` PDUs
    pub fragment_id: u8,
    /// Length of the whole packet, only carried by `Start` PDUs
    pub total_length: u16,
}

impl EncoderValue for Header {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.pdu_type.flags());
        match self.pdu_type {
            PduType::Full => {}
            PduType::Start => {
                encoder.encode(&self.fragment_id);
                encoder.encode(&self.total_length);
            }
            PduType::Continuation | PduType::End => {
                encoder.encode(&self.fragment_id);
            }
        }
    }
}

impl<'a> DecoderValue<'a> for Header {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (flags, buffer) = buffer.decode::<u8>()?;
        let pdu_type = PduType::from_flags(flags);
        let mut header = Self {
            pdu_type,
            fragment_id: 0,
            total_length: 0,
        };

        let buffer = match pdu_type {
            PduType::Full => buffer,
            PduType::Start => {
                let (fragment_id, buffer) = buffer.decode::<u8>()?;
                let (total_length, buffer) = buffer.decode::<u16>()?;
                header.fragment_id = fragment_id;
                header.total_length = total_length;
                buffer
            }
            PduType::Continuation | PduType::End => {
                let (fragment_id, buffer) = buffer.decode::<u8>()?;
                header.fragment_id = fragment_id;
                buffer
            }
        };

        Ok((header, buffer))
    }
}

/// A single encapsulated PDU
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pdu {
    pub header: Header,
    pub payload: Bytes,
}

impl Pdu {
    #[inline]
    pub fn len(&self) -> usize {
        self.header.pdu_type.header_len() + self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl EncoderValue for Pdu {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.header);
        encoder.write_slice(&self.payload);
    }
}

impl<'a> DecoderValue<'a> for Pdu {
    /// Consumes the rest of the buffer as payload
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (header, buffer) = buffer.decode::<Header>()?;
        let len = buffer.len();
        let (payload, buffer) = buffer.decode_slice(len)?;
        let payload = Bytes::copy_from_slice(payload.into_less_safe_slice());
        Ok((Self { header, payload }, buffer))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("empty packets can not be encapsulated")]
    EmptyPacket,
    #[error("packet of {len} bytes exceeds the maximum of {MAX_PACKET_BYTES} bytes")]
    PacketTooLarge { len: usize },
}

#[derive(Debug)]
struct Fragment {
    fragment_id: u8,
    remaining: Bytes,
}

/// Splits queued packets into PDUs fitting the notified transmit opportunities
#[derive(Debug, Default)]
pub struct Fragmenter {
    packets: VecDeque<Bytes>,
    current: Option<Fragment>,
    next_fragment_id: u8,
    buffered_bytes: usize,
}

impl Fragmenter {
    pub fn enqueue(&mut self, packet: Bytes) -> Result<(), EnqueueError> {
        ensure!(!packet.is_empty(), Err(EnqueueError::EmptyPacket));
        ensure!(
            packet.len() <= MAX_PACKET_BYTES,
            Err(EnqueueError::PacketTooLarge { len: packet.len() })
        );

        self.buffered_bytes += packet.len();
        self.packets.push_back(packet);
        Ok(())
    }

    /// Payload bytes still waiting to be encapsulated
    #[inline]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffered_bytes == 0
    }

    /// Returns the next PDU of at most `max_len` bytes, if one fits
    pub fn next_pdu(&mut self, max_len: usize) -> Option<Pdu> {
        if let Some(fragment) = self.current.as_mut() {
            let remaining = fragment.remaining.len();

            let (pdu_type, take) = if remaining + PduType::End.header_len() <= max_len {
                (PduType::End, remaining)
            } else {
                ensure!(max_len > PduType::Continuation.header_len(), None);
                (
                    PduType::Continuation,
                    max_len - PduType::Continuation.header_len(),
                )
            };

            let payload = fragment.remaining.split_to(take);
            let header = Header {
                pdu_type,
                fragment_id: fragment.fragment_id,
                total_length: 0,
            };

            if pdu_type == PduType::End {
                self.current = None;
            }
            self.buffered_bytes -= payload.len();
            return Some(Pdu { header, payload });
        }

        let len = self.packets.front()?.len();

        if len + PduType::Full.header_len() <= max_len {
            let payload = self.packets.pop_front()?;
            self.buffered_bytes -= payload.len();
            let header = Header {
                pdu_type: PduType::Full,
                fragment_id: 0,
                total_length: 0,
            };
            return Some(Pdu { header, payload });
        }

        ensure!(max_len > PduType::Start.header_len(), None);

        let mut remaining = self.packets.pop_front()?;
        let payload = remaining.split_to(max_len - PduType::Start.header_len());
        let fragment_id = self.next_fragment_id;
        self.next_fragment_id = self.next_fragment_id.wrapping_add(1);
        self.buffered_bytes -= payload.len();
        self.current = Some(Fragment {
            fragment_id,
            remaining,
        });

        let header = Header {
            pdu_type: PduType::Start,
            fragment_id,
            total_length: len as u16,
        };
        Some(Pdu { header, payload })
    }
}

/// Result of feeding a PDU to the [`Reassembler`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reassembly {
    /// A completely reassembled packet
    pub packet: Option<Bytes>,
    /// Bytes of partial packets that had to be discarded
    pub dropped_bytes: usize,
}

#[derive(Debug)]
struct Partial {
    fragment_id: u8,
    total_length: usize,
    data: BytesMut,
}

/// Rebuilds packets from PDUs received in order
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn on_pdu(&mut self, pdu: Pdu) -> Reassembly {
        let Pdu { header, payload } = pdu;

        match header.pdu_type {
            PduType::Full => Reassembly {
                dropped_bytes: self.discard(),
                packet: Some(payload),
            },
            PduType::Start => {
                let dropped_bytes = self.discard();
                let total_length = header.total_length as usize;
                let mut data = BytesMut::with_capacity(total_length);
                data.extend_from_slice(&payload);
                self.partial = Some(Partial {
                    fragment_id: header.fragment_id,
                    total_length,
                    data,
                });
                // a start that already exceeds its total length is malformed
                let dropped_bytes = dropped_bytes + self.discard_if_overflowing();
                Reassembly {
                    packet: None,
                    dropped_bytes,
                }
            }
            PduType::Continuation | PduType::End => {
                let Some(partial) = self
                    .partial
                    .as_mut()
                    .filter(|partial| partial.fragment_id == header.fragment_id)
                else {
                    return Reassembly {
                        packet: None,
                        dropped_bytes: self.discard() + payload.len(),
                    };
                };

                partial.data.extend_from_slice(&payload);
                let mut dropped_bytes = self.discard_if_overflowing();

                if header.pdu_type == PduType::End {
                    if let Some(partial) = self.partial.take() {
                        if partial.data.len() == partial.total_length {
                            return Reassembly {
                                packet: Some(partial.data.freeze()),
                                dropped_bytes,
                            };
                        }
                        dropped_bytes += partial.data.len();
                    }
                }

                Reassembly {
                    packet: None,
                    dropped_bytes,
                }
            }
        }
    }

    /// Discards the packet being reassembled and returns its buffered bytes
    pub fn discard(&mut self) -> usize {
        self.partial.take().map_or(0, |partial| partial.data.len())
    }

    #[inline]
    pub fn is_reassembling(&self) -> bool {
        self.partial.is_some()
    }

    fn discard_if_overflowing(&mut self) -> usize {
        let overflowing = self
            .partial
            .as_ref()
            .is_some_and(|partial| partial.data.len() > partial.total_length);
        if overflowing {
            self.discard()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::encode_to_vec;

    fn packet(len: usize, seed: u8) -> Bytes {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn header_wire_test() {
        let header = Header {
            pdu_type: PduType::Start,
            fragment_id: 9,
            total_length: 0x0102,
        };
        assert_eq!(encode_to_vec(&header), vec![0x80, 9, 1, 2]);

        let full = Pdu {
            header: Header {
                pdu_type: PduType::Full,
                fragment_id: 0,
                total_length: 0,
            },
            payload: Bytes::from_static(b"abc"),
        };
        let bytes = encode_to_vec(&full);
        assert_eq!(bytes, vec![0xc0, b'a', b'b', b'c']);
        assert_eq!(bytes.len(), full.len());

        let (decoded, remaining) = DecoderBuffer::new(&bytes).decode::<Pdu>().unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, full);
    }

    #[test]
    fn truncated_header_test() {
        assert!(DecoderBuffer::new(&[0x80, 1, 0]).decode::<Pdu>().is_err());
        assert!(DecoderBuffer::new(&[]).decode::<Pdu>().is_err());
    }

    #[test]
    fn enqueue_limits_test() {
        let mut fragmenter = Fragmenter::default();
        assert_eq!(
            fragmenter.enqueue(Bytes::new()),
            Err(EnqueueError::EmptyPacket)
        );
        assert_eq!(
            fragmenter.enqueue(Bytes::from(vec![0; MAX_PACKET_BYTES + 1])),
            Err(EnqueueError::PacketTooLarge {
                len: MAX_PACKET_BYTES + 1
            })
        );
        assert!(fragmenter.is_empty());
    }

    #[test]
    fn fragmentation_test() {
        let mut fragmenter = Fragmenter::default();
        fragmenter.enqueue(packet(10, 0)).unwrap();
        fragmenter.enqueue(packet(25, 100)).unwrap();
        assert_eq!(fragmenter.buffered_bytes(), 35);

        let full = fragmenter.next_pdu(20).unwrap();
        assert_eq!(full.header.pdu_type, PduType::Full);
        assert_eq!(full.len(), 11);

        // too small to carry any payload
        assert!(fragmenter.next_pdu(4).is_none());

        let start = fragmenter.next_pdu(14).unwrap();
        assert_eq!(start.header.pdu_type, PduType::Start);
        assert_eq!(start.header.total_length, 25);
        assert_eq!(start.payload.len(), 10);

        let continuation = fragmenter.next_pdu(12).unwrap();
        assert_eq!(continuation.header.pdu_type, PduType::Continuation);
        assert_eq!(continuation.payload.len(), 10);

        let end = fragmenter.next_pdu(100).unwrap();
        assert_eq!(end.header.pdu_type, PduType::End);
        assert_eq!(end.payload.len(), 5);
        assert_eq!(end.header.fragment_id, start.header.fragment_id);

        assert!(fragmenter.next_pdu(100).is_none());
        assert!(fragmenter.is_empty());

        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.on_pdu(full).packet, Some(packet(10, 0)));
        assert_eq!(reassembler.on_pdu(start), Reassembly::default());
        assert!(reassembler.is_reassembling());
        assert_eq!(reassembler.on_pdu(continuation), Reassembly::default());
        assert_eq!(
            reassembler.on_pdu(end),
            Reassembly {
                packet: Some(packet(25, 100)),
                dropped_bytes: 0,
            }
        );
        assert!(!reassembler.is_reassembling());
    }

    #[test]
    fn missing_fragment_test() {
        let mut fragmenter = Fragmenter::default();
        fragmenter.enqueue(packet(30, 0)).unwrap();
        fragmenter.enqueue(packet(30, 50)).unwrap();

        let start = fragmenter.next_pdu(14).unwrap();
        let _lost = fragmenter.next_pdu(12).unwrap();
        let end = fragmenter.next_pdu(100).unwrap();
        let next_start = fragmenter.next_pdu(20).unwrap();
        let next_end = fragmenter.next_pdu(100).unwrap();

        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.on_pdu(start).packet, None);
        assert_eq!(
            reassembler.on_pdu(end),
            Reassembly {
                packet: None,
                dropped_bytes: 20,
            }
        );

        // an end without its start is dropped on its own
        let mut orphan = Reassembler::default();
        assert_eq!(orphan.on_pdu(next_end.clone()).dropped_bytes, 14);

        assert_eq!(reassembler.on_pdu(next_start).packet, None);
        assert_eq!(reassembler.on_pdu(next_end).packet, Some(packet(30, 50)));
    }

    #[test]
    fn discard_test() {
        let mut fragmenter = Fragmenter::default();
        fragmenter.enqueue(packet(30, 0)).unwrap();

        let mut reassembler = Reassembler::default();
        reassembler.on_pdu(fragmenter.next_pdu(14).unwrap());
        assert_eq!(reassembler.discard(), 10);
        assert_eq!(reassembler.discard(), 0);
    }
}
