//! Human-readable JSON form of a BMCP message. Not wire-compatible with the binary form.

use serde::{Deserialize, Serialize};

use super::{parse_address, parse_hex, validate_size, BmcpMessage, EncodeOptions, PROTOCOL_MAGIC, PROTOCOL_VERSION};
use crate::Error;

pub const PROTOCOL_NAME: &str = "BMCP";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMessage {
    pub protocol: String,
    pub version: u8,
    pub chain_selector: String,
    pub contract: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u32>,
}

impl From<&BmcpMessage> for JsonMessage {
    fn from(message: &BmcpMessage) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: message.version,
            chain_selector: format!("0x{:016x}", message.chain_selector),
            contract: message.target_hex(),
            data: format!("0x{}", hex::encode(&message.calldata)),
            nonce: message.nonce,
            deadline: message.deadline,
        }
    }
}

impl TryFrom<JsonMessage> for BmcpMessage {
    type Error = Error;

    fn try_from(json: JsonMessage) -> Result<Self, Error> {
        if json.protocol != PROTOCOL_NAME {
            return Err(Error::BadMagic);
        }
        if json.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(json.version));
        }

        let selector_hex = json.chain_selector.trim_start_matches("0x");
        let chain_selector = u64::from_str_radix(selector_hex, 16)
            .map_err(|e| Error::InvalidHex(format!("chain selector {}: {}", json.chain_selector, e)))?;

        Ok(BmcpMessage {
            protocol_magic: PROTOCOL_MAGIC,
            version: json.version,
            chain_selector,
            target_contract: parse_address(&json.contract)?,
            calldata: parse_hex(&json.data)?,
            nonce: json.nonce,
            deadline: json.deadline,
        })
    }
}

pub fn encode_json(
    chain_selector: u64,
    target_contract: &[u8; 20],
    calldata: &[u8],
    opts: &EncodeOptions,
) -> Result<String, Error> {
    let message = BmcpMessage {
        nonce: opts.nonce,
        deadline: opts.deadline,
        ..BmcpMessage::new(chain_selector, *target_contract, calldata.to_vec())
    };
    let json = serde_json::to_string(&JsonMessage::from(&message))
        .map_err(|e| Error::Serialization(e.to_string()))?;
    validate_size(json.as_bytes())?;
    Ok(json)
}

pub fn decode_json(input: &str) -> Result<BmcpMessage, Error> {
    let json: JsonMessage = serde_json::from_str(input).map_err(|e| Error::Serialization(e.to_string()))?;
    json.try_into()
}
