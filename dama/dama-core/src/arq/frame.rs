// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire format of ARQ protected PDUs
//!
//! ```text
//! +-----------------+---------------------------+-----------------+
//! | sequence number | padding (header size - 1) | encapsulated PDU |
//! +-----------------+---------------------------+-----------------+
//! ```

use crate::{control::encode_to_vec, encapsulation::Pdu};
use bytes::Bytes;
use s2n_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub sequence_number: u8,
    pub pdu: Pdu,
}

struct Padded<'a> {
    frame: &'a Frame,
    header_size: usize,
}

impl EncoderValue for Padded<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.frame.sequence_number);
        for _ in 1..self.header_size {
            encoder.encode(&0u8);
        }
        encoder.encode(&self.frame.pdu);
    }
}

impl Frame {
    #[inline]
    pub fn len(&self, header_size: usize) -> usize {
        header_size + self.pdu.len()
    }

    pub fn encode(&self, header_size: usize) -> Bytes {
        debug_assert!(header_size >= 1);
        encode_to_vec(&Padded {
            frame: self,
            header_size,
        })
        .into()
    }

    /// Decodes a frame, consuming all of `bytes`
    pub fn decode(bytes: &[u8], header_size: usize) -> Result<Self, DecoderError> {
        let buffer = DecoderBuffer::new(bytes);
        let (sequence_number, buffer) = buffer.decode::<u8>()?;
        let (_padding, buffer) = buffer.decode_slice(header_size.saturating_sub(1))?;
        let (pdu, buffer) = buffer.decode::<Pdu>()?;
        buffer.ensure_empty()?;
        Ok(Self {
            sequence_number,
            pdu,
        })
    }
}
