use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Largest number of holding registers a single request may cover.
pub const MAX_SAFE_READ_COUNT: u16 = 123;
pub const MAX_SAFE_WRITE_COUNT: u16 = 123;

const READ_HOLDINGS: u8 = 0x03;
const WRITE_HOLDING: u8 = 0x06;
const WRITE_HOLDINGS: u8 = 0x10;

#[derive(Debug, Clone)]
pub struct Request {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

/// Addresses are 1-based register numbers, as printed in device documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHolding { address: u16, value: u16 },
    SetHoldings { address: u16, values: Vec<u16> },
}

impl Operation {
    /// Choose the single or multiple register write depending on the word count.
    pub fn write(address: u16, values: &[u16]) -> Self {
        match values {
            [value] => Operation::SetHolding { address, value: *value },
            _ => Operation::SetHoldings { address, values: values.to_vec() },
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::GetHoldings { values: _ } => None,
            ResponseKind::SetHolding { .. } => None,
            ResponseKind::SetHoldings { .. } => None,
            ResponseKind::Malformed { .. } => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    /// Raw big-endian register contents.
    GetHoldings { values: Vec<u8> },
    SetHolding { address: u16, value: u16 },
    SetHoldings { address: u16, words: u16 },
    /// A known function code whose body does not have the expected shape.
    Malformed { function_code: u8 },
}

impl ResponseKind {
    /// Register contents of a read response, one `u16` per register.
    pub fn words(&self) -> Option<Vec<u16>> {
        let ResponseKind::GetHoldings { values } = self else {
            return None;
        };
        Some(values.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
    }
}

fn wire_address(address: u16) -> Result<u16, std::io::Error> {
    address.checked_sub(1).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "register numbers start at 1")
    })
}

fn too_many(count: usize, max: u16) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("{count} registers exceed the limit of {max} per request"),
    )
}

pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut pdu = Vec::with_capacity(6);
        match &req.operation {
            Operation::GetHoldings { address, count } => {
                if *count == 0 || *count > MAX_SAFE_READ_COUNT {
                    return Err(too_many(usize::from(*count), MAX_SAFE_READ_COUNT));
                }
                pdu.push(READ_HOLDINGS);
                pdu.extend(wire_address(*address)?.to_be_bytes());
                pdu.extend(count.to_be_bytes());
            }
            Operation::SetHolding { address, value } => {
                pdu.push(WRITE_HOLDING);
                pdu.extend(wire_address(*address)?.to_be_bytes());
                pdu.extend(value.to_be_bytes());
            }
            Operation::SetHoldings { address, values } => {
                let count = u16::try_from(values.len())
                    .ok()
                    .filter(|c| (1..=MAX_SAFE_WRITE_COUNT).contains(c))
                    .ok_or_else(|| too_many(values.len(), MAX_SAFE_WRITE_COUNT))?;
                pdu.push(WRITE_HOLDINGS);
                pdu.extend(wire_address(*address)?.to_be_bytes());
                pdu.extend(count.to_be_bytes());
                pdu.push((count * 2) as u8);
                for value in values {
                    pdu.extend(value.to_be_bytes());
                }
            }
        };
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        dst.put_u16(pdu.len() as u16 + 1);
        dst.put_u8(req.unit_id);
        dst.extend_from_slice(&pdu);
        trace!(message="sending encoded", buffer=?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message="attempt at decoding", buffer=?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let proto = u16::from_be_bytes(*proto_buffer);
            if proto != 0 {
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [unit_id, function_code, code, ..] = data else {
                src.advance(1);
                continue;
            };
            let (unit_id, function_code, code) = (*unit_id, *function_code, *code);
            if function_code > 0x80 {
                src.advance(6 + 3);
                return Ok(Some(Response {
                    transaction_id,
                    unit_id,
                    kind: ResponseKind::ErrorCode(code),
                }));
            }
            let kind = match (function_code, data) {
                (READ_HOLDINGS, [_, _, byte_count, values @ ..])
                    if usize::from(*byte_count) == values.len() =>
                {
                    ResponseKind::GetHoldings { values: values.to_vec() }
                }
                (WRITE_HOLDING, [_, _, a0, a1, v0, v1]) => ResponseKind::SetHolding {
                    address: u16::from_be_bytes([*a0, *a1]).wrapping_add(1),
                    value: u16::from_be_bytes([*v0, *v1]),
                },
                (WRITE_HOLDINGS, [_, _, a0, a1, c0, c1]) => ResponseKind::SetHoldings {
                    address: u16::from_be_bytes([*a0, *a1]).wrapping_add(1),
                    words: u16::from_be_bytes([*c0, *c1]),
                },
                (READ_HOLDINGS | WRITE_HOLDING | WRITE_HOLDINGS, _) => {
                    trace!(message = "malformed response body", function_code);
                    ResponseKind::Malformed { function_code }
                }
                _ => {
                    trace!(message = "skipping an unrecognized frame", function_code);
                    src.advance(usize::from(required_length) + 6);
                    continue;
                }
            };
            src.advance(usize::from(required_length) + 6);
            return Ok(Some(Response { transaction_id, unit_id, kind }));
        }
    }
}
