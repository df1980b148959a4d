//! BMCP binary wire format.
//!
//! Layout (all integers big-endian):
//! magic (4) | version (1) | chain selector (8) | target (20) | calldata len (2) | calldata
//! | [nonce (4)] | [deadline (4)]
//!
//! Presence of the trailing fields is inferred from the number of bytes left after calldata.

pub mod function;
pub mod json;

use log::debug;

use crate::{registry::ChainRegistry, Error};

pub use json::{decode_json, encode_json};

/// ASCII "BMCP".
pub const PROTOCOL_MAGIC: u32 = 0x424D_4350;
pub const PROTOCOL_VERSION: u8 = 1;
pub const MAX_MESSAGE_SIZE: usize = 80_000;
pub const MAX_CALLDATA_SIZE: usize = u16::MAX as usize;

/// Nonce slot written when only a deadline is present.
pub const NONCE_PLACEHOLDER: u32 = u32::MAX;

const HEADER_SIZE: usize = 4 + 1 + 8 + 20 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcpMessage {
    pub protocol_magic: u32,
    pub version: u8,
    pub chain_selector: u64,
    pub target_contract: [u8; 20],
    pub calldata: Vec<u8>,
    pub nonce: Option<u32>,
    pub deadline: Option<u32>,
}

impl BmcpMessage {
    pub fn new(chain_selector: u64, target_contract: [u8; 20], calldata: Vec<u8>) -> Self {
        Self {
            protocol_magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            chain_selector,
            target_contract,
            calldata,
            nonce: None,
            deadline: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_deadline(mut self, deadline: u32) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn options(&self) -> EncodeOptions {
        EncodeOptions {
            nonce: self.nonce,
            deadline: self.deadline,
        }
    }

    /// `0x`-prefixed lowercase hex of the target contract.
    pub fn target_hex(&self) -> String {
        format!("0x{}", hex::encode(self.target_contract))
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        encode_binary(self.chain_selector, &self.target_contract, &self.calldata, &self.options())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub nonce: Option<u32>,
    pub deadline: Option<u32>,
}

pub fn encode_binary(
    chain_selector: u64,
    target_contract: &[u8; 20],
    calldata: &[u8],
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    if calldata.len() > MAX_CALLDATA_SIZE {
        return Err(Error::SizeExceeded {
            size: calldata.len(),
            max: MAX_CALLDATA_SIZE,
        });
    }

    let nonce = match (opts.nonce, opts.deadline) {
        (Some(NONCE_PLACEHOLDER), _) => return Err(Error::ReservedNonce),
        (Some(nonce), _) => Some(nonce),
        (None, Some(_)) => Some(NONCE_PLACEHOLDER),
        (None, None) => None,
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + calldata.len() + 8);
    buf.extend_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&chain_selector.to_be_bytes());
    buf.extend_from_slice(target_contract);
    buf.extend_from_slice(&(calldata.len() as u16).to_be_bytes());
    buf.extend_from_slice(calldata);
    if let Some(nonce) = nonce {
        buf.extend_from_slice(&nonce.to_be_bytes());
    }
    if let Some(deadline) = opts.deadline {
        buf.extend_from_slice(&deadline.to_be_bytes());
    }

    validate_size(&buf)?;
    Ok(buf)
}

/// Encodes for a chain looked up by name.
pub fn encode_for_chain(
    registry: &ChainRegistry,
    chain: &str,
    target_contract: &[u8; 20],
    calldata: &[u8],
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let descriptor = registry
        .resolve_by_name(chain)
        .ok_or_else(|| Error::Config(format!("Unknown chain name: {}", chain)))?;
    encode_binary(descriptor.chain_selector, target_contract, calldata, opts)
}

pub fn validate_size(payload: &[u8]) -> Result<usize, Error> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::SizeExceeded {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(payload.len())
}

pub fn is_protocol_message(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == PROTOCOL_MAGIC.to_be_bytes()
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() < n {
            return Err(Error::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }
}

pub fn decode_binary(bytes: &[u8]) -> Result<BmcpMessage, Error> {
    let mut reader = Reader { buf: bytes };

    let protocol_magic = u32::from_be_bytes(reader.take_array()?);
    if protocol_magic != PROTOCOL_MAGIC {
        return Err(Error::BadMagic);
    }

    let [version] = reader.take_array::<1>()?;
    if version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let chain_selector = u64::from_be_bytes(reader.take_array()?);
    let target_contract: [u8; 20] = reader.take_array()?;
    let calldata_len = u16::from_be_bytes(reader.take_array()?) as usize;
    let calldata = reader.take(calldata_len)?.to_vec();

    let nonce = match reader.remaining() {
        0 => None,
        _ => Some(u32::from_be_bytes(reader.take_array()?)),
    };
    let deadline = match reader.remaining() {
        0 => None,
        _ => Some(u32::from_be_bytes(reader.take_array()?)),
    };
    if reader.remaining() > 0 {
        return Err(Error::TrailingBytes(reader.remaining()));
    }

    let nonce = match (nonce, deadline) {
        (Some(NONCE_PLACEHOLDER), Some(deadline)) => {
            debug!(
                "Nonce 0x{:08x} with deadline {} read as absent; replay protection does not apply",
                NONCE_PLACEHOLDER, deadline
            );
            None
        }
        (nonce, _) => nonce,
    };

    Ok(BmcpMessage {
        protocol_magic,
        version,
        chain_selector,
        target_contract,
        calldata,
        nonce,
        deadline,
    })
}

/// Decode raw OP_RETURN payload bytes.
pub fn decode(input: impl AsRef<[u8]>) -> Result<BmcpMessage, Error> {
    decode_binary(input.as_ref())
}

/// Decode a hex payload, with or without a `0x` prefix.
pub fn decode_hex(input: &str) -> Result<BmcpMessage, Error> {
    decode_binary(&parse_hex(input)?)
}

pub(crate) fn parse_hex(input: &str) -> Result<Vec<u8>, Error> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| Error::InvalidHex(e.to_string()))
}

/// Parse a 20-byte `0x` address.
pub fn parse_address(input: &str) -> Result<[u8; 20], Error> {
    let bytes = parse_hex(input).map_err(|_| Error::InvalidTargetAddress(input.to_string()))?;
    <[u8; 20]>::try_from(bytes.as_slice()).map_err(|_| Error::InvalidTargetAddress(input.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    const SEPOLIA: u64 = 16015286601757825753;

    fn contract() -> [u8; 20] {
        parse_address("0x2BaE8224110482eC6dDF12faf359A35362d43573").unwrap()
    }

    #[test]
    fn test_layout() {
        let payload = encode_binary(SEPOLIA, &contract(), &[0xab, 0xcd], &EncodeOptions::default()).unwrap();

        assert_eq!(&payload[..4], b"BMCP");
        assert_eq!(payload[4], 1);
        assert_eq!(&payload[5..13], &SEPOLIA.to_be_bytes());
        assert_eq!(&payload[13..33], &contract());
        assert_eq!(&payload[33..35], &[0x00, 0x02]);
        assert_eq!(&payload[35..], &[0xab, 0xcd]);
    }

    #[test]
    fn test_round_trip_optional_fields() {
        let base = BmcpMessage::new(SEPOLIA, contract(), vec![1, 2, 3]);
        let cases = vec![
            base.clone(),
            base.clone().with_nonce(42),
            base.clone().with_deadline(1234567890),
            base.clone().with_nonce(0).with_deadline(9999999),
        ];

        for message in cases {
            let encoded = message.encode().unwrap();
            assert_eq!(decode_binary(&encoded).unwrap(), message);
        }
    }

    #[test]
    fn test_optional_fields_change_length() {
        let base = BmcpMessage::new(SEPOLIA, contract(), vec![]);
        assert_eq!(base.encode().unwrap().len(), HEADER_SIZE);
        assert_eq!(base.clone().with_nonce(1).encode().unwrap().len(), HEADER_SIZE + 4);
        assert_eq!(base.clone().with_deadline(1).encode().unwrap().len(), HEADER_SIZE + 8);
        assert_eq!(base.with_nonce(1).with_deadline(1).encode().unwrap().len(), HEADER_SIZE + 8);
    }

    #[test]
    fn test_reserved_nonce_rejected() {
        let message = BmcpMessage::new(SEPOLIA, contract(), vec![]).with_nonce(NONCE_PLACEHOLDER);
        assert_eq!(message.encode(), Err(Error::ReservedNonce));
    }

    #[test]
    fn test_placeholder_nonce_from_foreign_sender() {
        let mut with_deadline = BmcpMessage::new(SEPOLIA, contract(), vec![]).with_nonce(1).with_deadline(77).encode().unwrap();
        with_deadline[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&NONCE_PLACEHOLDER.to_be_bytes());
        let decoded = decode_binary(&with_deadline).unwrap();
        assert_eq!(decoded.nonce, None);
        assert_eq!(decoded.deadline, Some(77));

        let mut nonce_only = BmcpMessage::new(SEPOLIA, contract(), vec![]).with_nonce(1).encode().unwrap();
        nonce_only[HEADER_SIZE..].copy_from_slice(&NONCE_PLACEHOLDER.to_be_bytes());
        assert_eq!(decode_binary(&nonce_only).unwrap().nonce, Some(NONCE_PLACEHOLDER));
    }

    #[test]
    fn test_is_protocol_message() {
        assert!(!is_protocol_message(&[]));
        assert!(!is_protocol_message(&[0x42]));
        assert!(!is_protocol_message(&[0x42, 0x4d]));
        assert!(!is_protocol_message(&[0x42, 0x4d, 0x43]));
        assert!(!is_protocol_message(&[0, 0, 0, 0]));
        assert!(!is_protocol_message(b"NOT_BMCP"));
        assert!(is_protocol_message(b"BMCP"));

        let payload = encode_binary(SEPOLIA, &contract(), b"x", &EncodeOptions::default()).unwrap();
        assert!(is_protocol_message(&payload));
    }

    #[test]
    fn test_decode_short_buffer_is_truncated() {
        let bytes = [0x42, 0x4d];
        assert!(!is_protocol_message(&bytes));
        assert_eq!(decode_binary(&bytes), Err(Error::Truncated));
    }

    #[test]
    fn test_decode_bad_magic() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0x01, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(decode_binary(&bytes), Err(Error::BadMagic));
    }

    #[test]
    fn test_decode_unsupported_version() {
        let mut payload = encode_binary(SEPOLIA, &contract(), b"x", &EncodeOptions::default()).unwrap();
        payload[4] = 2;
        assert_eq!(decode_binary(&payload), Err(Error::UnsupportedVersion(2)));
    }

    #[test]
    fn test_decode_truncated_fields() {
        let payload = encode_binary(SEPOLIA, &contract(), &[7; 10], &EncodeOptions::default()).unwrap();
        for cut in [5, 12, 20, 33, 34, payload.len() - 1] {
            assert_eq!(decode_binary(&payload[..cut]), Err(Error::Truncated), "cut at {}", cut);
        }
    }

    #[test]
    fn test_decode_remainder_lengths() {
        let payload = encode_binary(SEPOLIA, &contract(), &[], &EncodeOptions::default()).unwrap();

        for extra in [1usize, 2, 3, 5, 6, 7] {
            let mut bytes = payload.clone();
            bytes.extend(std::iter::repeat(0u8).take(extra));
            assert_eq!(decode_binary(&bytes), Err(Error::Truncated), "extra {}", extra);
        }

        let mut bytes = payload.clone();
        bytes.extend([0u8; 9]);
        assert_eq!(decode_binary(&bytes), Err(Error::TrailingBytes(1)));
    }

    #[test]
    fn test_calldata_length_is_exact() {
        // calldata followed directly by nonce, no padding between them
        let message = BmcpMessage::new(SEPOLIA, contract(), vec![0xee; 3]).with_nonce(0x01020304);
        let encoded = message.encode().unwrap();
        assert_eq!(&encoded[encoded.len() - 4..], &[1, 2, 3, 4]);
        assert_eq!(decode_binary(&encoded).unwrap().nonce, Some(0x01020304));
    }

    #[test]
    fn test_size_limits() {
        let too_long = vec![0u8; MAX_CALLDATA_SIZE + 1];
        assert!(matches!(
            encode_binary(SEPOLIA, &contract(), &too_long, &EncodeOptions::default()),
            Err(Error::SizeExceeded { .. })
        ));

        let max = vec![0u8; MAX_CALLDATA_SIZE];
        let opts = EncodeOptions { nonce: Some(1), deadline: Some(2) };
        let payload = encode_binary(SEPOLIA, &contract(), &max, &opts).unwrap();
        assert_eq!(decode_binary(&payload).unwrap().calldata.len(), MAX_CALLDATA_SIZE);

        assert_eq!(validate_size(&vec![0u8; MAX_MESSAGE_SIZE]), Ok(MAX_MESSAGE_SIZE));
        assert_eq!(
            validate_size(&vec![0u8; MAX_MESSAGE_SIZE + 1]),
            Err(Error::SizeExceeded { size: MAX_MESSAGE_SIZE + 1, max: MAX_MESSAGE_SIZE })
        );
    }

    #[test]
    fn test_sepolia_on_report_scenario() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        let calldata = function::on_report("Hey From Bitcoin");
        let opts = EncodeOptions { nonce: Some(0), deadline: Some(now + 3600) };

        let registry = ChainRegistry::builtin();
        let payload = encode_for_chain(&registry, "SEPOLIA", &contract(), &calldata, &opts).unwrap();
        assert!(is_protocol_message(&payload));

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.protocol_magic, PROTOCOL_MAGIC);
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.chain_selector, SEPOLIA);
        assert_eq!(decoded.target_contract, contract());
        assert_eq!(decoded.calldata, calldata);
        assert_eq!(decoded.nonce, Some(0));
        assert_eq!(decoded.deadline, Some(now + 3600));
        assert_eq!(&decoded.calldata[..4], &function::KnownFunction::OnReport.selector());
    }

    #[test]
    fn test_encode_for_unknown_chain() {
        let registry = ChainRegistry::builtin();
        let result = encode_for_chain(&registry, "NOWHERE", &contract(), b"x", &EncodeOptions::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_selector_still_decodes() {
        let payload = encode_binary(0xdead_beef, &contract(), b"x", &EncodeOptions::default()).unwrap();
        assert_eq!(decode_binary(&payload).unwrap().chain_selector, 0xdead_beef);
    }

    #[test]
    fn test_decode_hex() {
        let message = BmcpMessage::new(SEPOLIA, contract(), vec![9, 9]).with_nonce(5);
        let hex_payload = hex::encode(message.encode().unwrap());

        assert_eq!(decode_hex(&hex_payload).unwrap(), message);
        assert_eq!(decode_hex(&format!("0x{}", hex_payload)).unwrap(), message);
        assert!(matches!(decode_hex("0xzz"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("invalid_address").is_err());
        assert_eq!(parse_address("0x0000000000000000000000000000000000000001").unwrap()[19], 1);
    }
}
