//! Tagged wire format: a 1-byte message type followed by the structured
//! encoding of the body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::poi::SignatureRequest;
use crate::crypto::{Address, Signature};
use crate::types::encoding::CodecError;
use crate::types::{Block, Hash, Transaction};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("empty payload")]
    Empty,
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Transaction = 0x01,
    Block = 0x02,
    BlockRequest = 0x03,
    Status = 0x04,
    StatusRequest = 0x05,
    Blocks = 0x06,
    PoiSignRequest = 0x07,
    PoiSignResponse = 0x08,
    PoiPenalty = 0x09,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequestMessage {
    pub hash: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub height: u32,
    pub head: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksMessage {
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestMessage {
    pub request_id: String,
    pub hash: Hash,
    pub dependency: Hash,
    pub message: Hash,
    pub from: Address,
}

impl From<SignRequestMessage> for SignatureRequest {
    fn from(msg: SignRequestMessage) -> Self {
        Self { hash: msg.hash, dependency: msg.dependency, message: msg.message, from: msg.from }
    }
}

/// Exactly one of `signature`/`error` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponseMessage {
    pub request_id: String,
    pub signature: Option<Signature>,
    pub error: String,
}

impl SignResponseMessage {
    pub fn ok(request_id: String, signature: Signature) -> Self {
        Self { request_id, signature: Some(signature), error: String::new() }
    }

    pub fn failed(request_id: String, error: String) -> Self {
        Self { request_id, signature: None, error }
    }
}

/// Evidence of a double-touring attempt, broadcast by the node that
/// refused to sign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyMessage {
    pub offender: Address,
    pub dependency: Hash,
    pub message1: Hash,
    pub message2: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Transaction(Transaction),
    Block(Block),
    BlockRequest(BlockRequestMessage),
    Status(StatusMessage),
    StatusRequest,
    Blocks(BlocksMessage),
    SignRequest(SignRequestMessage),
    SignResponse(SignResponseMessage),
    Penalty(PenaltyMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Transaction(_) => MessageType::Transaction,
            Message::Block(_) => MessageType::Block,
            Message::BlockRequest(_) => MessageType::BlockRequest,
            Message::Status(_) => MessageType::Status,
            Message::StatusRequest => MessageType::StatusRequest,
            Message::Blocks(_) => MessageType::Blocks,
            Message::SignRequest(_) => MessageType::PoiSignRequest,
            Message::SignResponse(_) => MessageType::PoiSignResponse,
            Message::Penalty(_) => MessageType::PoiPenalty,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        fn body<T: Serialize>(tag: MessageType, value: &T) -> Result<Vec<u8>, WireError> {
            let mut out = vec![tag as u8];
            let encoded = bincode::serialize(value).map_err(CodecError::Encode)?;
            out.extend_from_slice(&encoded);
            Ok(out)
        }

        match self {
            Message::Transaction(tx) => body(MessageType::Transaction, tx),
            Message::Block(b) => body(MessageType::Block, b),
            Message::BlockRequest(m) => body(MessageType::BlockRequest, m),
            Message::Status(m) => body(MessageType::Status, m),
            Message::StatusRequest => Ok(vec![MessageType::StatusRequest as u8]),
            Message::Blocks(m) => body(MessageType::Blocks, m),
            Message::SignRequest(m) => body(MessageType::PoiSignRequest, m),
            Message::SignResponse(m) => body(MessageType::PoiSignResponse, m),
            Message::Penalty(m) => body(MessageType::PoiPenalty, m),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let (tag, body) = payload.split_first().ok_or(WireError::Empty)?;

        fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
            Ok(bincode::deserialize(body).map_err(CodecError::Decode)?)
        }

        match tag {
            0x01 => Ok(Message::Transaction(parse(body)?)),
            0x02 => Ok(Message::Block(parse(body)?)),
            0x03 => Ok(Message::BlockRequest(parse(body)?)),
            0x04 => Ok(Message::Status(parse(body)?)),
            0x05 => Ok(Message::StatusRequest),
            0x06 => Ok(Message::Blocks(parse(body)?)),
            0x07 => Ok(Message::SignRequest(parse(body)?)),
            0x08 => Ok(Message::SignResponse(parse(body)?)),
            0x09 => Ok(Message::Penalty(parse(body)?)),
            other => Err(WireError::UnknownTag(*other)),
        }
    }
}
