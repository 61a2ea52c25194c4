use crate::comm::error::{CommError, Result};
use crate::comm::types::{MsgType, RequestPayload, ResponsePayload, UpdatePayload};
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Cursor;

/// Header size: type (1) + seq (4)
pub const HEADER_LEN: usize = 5;

/// Encode a packet with given type, sequence, and payload
pub fn encode_packet(
    msg_type: MsgType,
    seq: u32,
    payload: Option<&impl serde::Serialize>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN);

    buf.push(msg_type as u8);
    buf.extend_from_slice(&seq.to_be_bytes());

    if let Some(p) = payload {
        // Structs encode as maps
        let mut ser = Serializer::new(&mut buf).with_struct_map();
        p.serialize(&mut ser).map_err(|e| CommError::EncodeError(e.to_string()))?;
    }

    Ok(buf)
}

/// Decode packet type and seq from raw bytes
pub fn decode_header(data: &[u8]) -> Result<(MsgType, u32)> {
    if data.len() < HEADER_LEN {
        return Err(CommError::DecodeError("Packet too short".to_string()));
    }

    let msg_type = MsgType::from_u8(data[0])
        .ok_or_else(|| CommError::DecodeError(format!("Unknown msg type: {}", data[0])))?;

    let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

    Ok((msg_type, seq))
}

fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let mut de = Deserializer::new(Cursor::new(data));
    T::deserialize(&mut de).map_err(|e| CommError::DecodeError(e.to_string()))
}

pub fn decode_request_payload(data: &[u8]) -> Result<RequestPayload> {
    decode_payload(data)
}

pub fn decode_response_payload(data: &[u8]) -> Result<ResponsePayload> {
    decode_payload(data)
}

pub fn decode_update_payload(data: &[u8]) -> Result<UpdatePayload> {
    decode_payload(data)
}

pub fn encode_request(seq: u32, payload: &RequestPayload) -> Result<Vec<u8>> {
    encode_packet(MsgType::Request, seq, Some(payload))
}

/// Encode request ack (no payload)
pub fn encode_request_ack(seq: u32) -> Result<Vec<u8>> {
    encode_packet(MsgType::RequestAck, seq, None::<&()>)
}

pub fn encode_response(seq: u32, payload: &ResponsePayload) -> Result<Vec<u8>> {
    encode_packet(MsgType::Response, seq, Some(payload))
}

pub fn encode_update(seq: u32, payload: &UpdatePayload) -> Result<Vec<u8>> {
    encode_packet(MsgType::Update, seq, Some(payload))
}

/// Encode cancel (no payload); `seq` names the request to cancel
pub fn encode_cancel(seq: u32) -> Result<Vec<u8>> {
    encode_packet(MsgType::Cancel, seq, None::<&()>)
}
