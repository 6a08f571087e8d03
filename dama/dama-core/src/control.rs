// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control messages exchanged with the medium access control layer

use crate::{address::Address, service::RcIndex};
use core::fmt;
#[cfg(any(test, feature = "generator"))]
use bolero_generator::prelude::*;
use s2n_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

/// Capacity allocation category of a control element
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(any(test, feature = "generator"), derive(TypeGenerator))]
#[repr(u8)]
pub enum Category {
    /// Constant rate assignment
    Cra = 0,
    /// Rate based dynamic capacity
    Rbdc = 1,
    /// Incremental volume based dynamic capacity
    Vbdc = 2,
    /// Absolute volume based dynamic capacity
    Avbdc = 3,
}

impl Category {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Cra,
            1 => Self::Rbdc,
            2 => Self::Vbdc,
            3 => Self::Avbdc,
            _ => return None,
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Cra => "CRA",
            Self::Rbdc => "RBDC",
            Self::Vbdc => "VBDC",
            Self::Avbdc => "AVBDC",
        };
        f.write_str(name)
    }
}

/// The demand of one request class in one category
///
/// RBDC values are in kbps, VBDC and AVBDC values in KBytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "generator"), derive(TypeGenerator))]
pub struct ControlElement {
    pub rc: RcIndex,
    pub category: Category,
    pub value: u32,
}

/// A capacity request sent from a terminal to the gateway
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapacityRequest {
    elements: Vec<ControlElement>,
    cno_estimate: Option<f64>,
}

impl CapacityRequest {
    #[inline]
    pub fn add_control_element(&mut self, rc: RcIndex, category: Category, value: u32) {
        self.elements.push(ControlElement {
            rc,
            category,
            value,
        });
    }

    /// Returns true if at least one element requests capacity
    #[inline]
    pub fn has_non_zero_content(&self) -> bool {
        self.elements.iter().any(|e| e.value > 0)
    }

    #[inline]
    pub fn elements(&self) -> &[ControlElement] {
        &self.elements
    }

    #[inline]
    pub fn cno_estimate(&self) -> Option<f64> {
        self.cno_estimate
    }

    #[inline]
    pub fn set_cno_estimate(&mut self, cno: Option<f64>) {
        self.cno_estimate = cno;
    }
}

/// A periodic channel quality report
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CnoReport {
    pub cno_estimate: Option<f64>,
}

/// Acknowledgement of a single ARQ protected PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(any(test, feature = "generator"), derive(TypeGenerator))]
pub struct ArqAck {
    pub flow_id: u8,
    pub sequence_number: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    CapacityRequest(CapacityRequest),
    CnoReport(CnoReport),
    ArqAck(ArqAck),
}

impl From<CapacityRequest> for Message {
    fn from(value: CapacityRequest) -> Self {
        Self::CapacityRequest(value)
    }
}

impl From<CnoReport> for Message {
    fn from(value: CnoReport) -> Self {
        Self::CnoReport(value)
    }
}

impl From<ArqAck> for Message {
    fn from(value: ArqAck) -> Self {
        Self::ArqAck(value)
    }
}

/// Outbound channel for control messages
pub trait Sink {
    fn send(&mut self, message: Message, destination: Address);
}

impl<F: FnMut(Message, Address)> Sink for F {
    #[inline]
    fn send(&mut self, message: Message, destination: Address) {
        (self)(message, destination)
    }
}

const CAPACITY_REQUEST_TAG: u8 = 0x01;
const CNO_REPORT_TAG: u8 = 0x02;
const ARQ_ACK_TAG: u8 = 0x03;

// an absent estimate travels as NaN
#[inline]
fn encode_cno<E: Encoder>(cno: Option<f64>, encoder: &mut E) {
    encoder.encode(&cno.unwrap_or(f64::NAN).to_bits());
}

#[inline]
fn decode_cno(buffer: DecoderBuffer) -> DecoderBufferResult<Option<f64>> {
    let (bits, buffer) = buffer.decode::<u64>()?;
    let cno = f64::from_bits(bits);
    Ok(((!cno.is_nan()).then_some(cno), buffer))
}

impl EncoderValue for Message {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Self::CapacityRequest(request) => {
                encoder.encode(&CAPACITY_REQUEST_TAG);
                encode_cno(request.cno_estimate, encoder);
                debug_assert!(request.elements.len() <= u8::MAX as usize);
                encoder.encode(&(request.elements.len() as u8));
                for element in &request.elements {
                    encoder.encode(&element.rc);
                    encoder.encode(&(element.category as u8));
                    encoder.encode(&element.value);
                }
            }
            Self::CnoReport(report) => {
                encoder.encode(&CNO_REPORT_TAG);
                encode_cno(report.cno_estimate, encoder);
            }
            Self::ArqAck(ack) => {
                encoder.encode(&ARQ_ACK_TAG);
                encoder.encode(&ack.flow_id);
                encoder.encode(&ack.sequence_number);
            }
        }
    }
}

impl<'a> DecoderValue<'a> for Message {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (tag, buffer) = buffer.decode::<u8>()?;
        match tag {
            CAPACITY_REQUEST_TAG => {
                let (cno_estimate, buffer) = decode_cno(buffer)?;
                let (count, mut buffer) = buffer.decode::<u8>()?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (rc, remaining) = buffer.decode::<u8>()?;
                    let (category, remaining) = remaining.decode::<u8>()?;
                    let (value, remaining) = remaining.decode::<u32>()?;
                    let category = Category::from_u8(category)
                        .ok_or(DecoderError::InvariantViolation("invalid category"))?;
                    elements.push(ControlElement {
                        rc,
                        category,
                        value,
                    });
                    buffer = remaining;
                }
                let request = CapacityRequest {
                    elements,
                    cno_estimate,
                };
                Ok((Self::CapacityRequest(request), buffer))
            }
            CNO_REPORT_TAG => {
                let (cno_estimate, buffer) = decode_cno(buffer)?;
                Ok((Self::CnoReport(CnoReport { cno_estimate }), buffer))
            }
            ARQ_ACK_TAG => {
                let (flow_id, buffer) = buffer.decode::<u8>()?;
                let (sequence_number, buffer) = buffer.decode::<u8>()?;
                let ack = ArqAck {
                    flow_id,
                    sequence_number,
                };
                Ok((Self::ArqAck(ack), buffer))
            }
            _ => Err(DecoderError::InvariantViolation("invalid control message tag")),
        }
    }
}

/// Encodes a value into a newly allocated buffer
pub(crate) fn encode_to_vec<T: EncoderValue>(value: &T) -> Vec<u8> {
    let mut bytes = vec![0u8; value.encoding_size()];
    let mut encoder = s2n_codec::EncoderBuffer::new(&mut bytes);
    encoder.encode(value);
    bytes
}

impl Message {
    /// Encodes the message for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_to_vec(self)
    }

    /// Decodes a message, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecoderError> {
        let (message, remaining) = DecoderBuffer::new(bytes).decode::<Self>()?;
        remaining.ensure_empty()?;
        Ok(message)
    }
}
