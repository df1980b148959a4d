//! Known destination functions and their ABI calldata.

const WORD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownFunction {
    OnReport,
    Transfer,
    Approve,
}

impl KnownFunction {
    pub const ALL: [KnownFunction; 3] = [KnownFunction::OnReport, KnownFunction::Transfer, KnownFunction::Approve];

    pub fn selector(&self) -> [u8; 4] {
        match self {
            KnownFunction::OnReport => [0xf2, 0x13, 0x55, 0xf4],
            KnownFunction::Transfer => [0xa9, 0x05, 0x9c, 0xbb],
            KnownFunction::Approve => [0x09, 0x5e, 0xa7, 0xb3],
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            KnownFunction::OnReport => "onReport(string)",
            KnownFunction::Transfer => "transfer(address,uint256)",
            KnownFunction::Approve => "approve(address,uint256)",
        }
    }

    pub fn from_selector(selector: [u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.selector() == selector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCall {
    Known(KnownFunction),
    Unknown([u8; 4]),
    /// Calldata shorter than a selector.
    Empty,
}

impl FunctionCall {
    pub fn signature(&self) -> &'static str {
        match self {
            FunctionCall::Known(f) => f.signature(),
            FunctionCall::Unknown(_) | FunctionCall::Empty => "unknown",
        }
    }
}

pub fn identify(calldata: &[u8]) -> FunctionCall {
    let Some(head) = calldata.get(..4) else {
        return FunctionCall::Empty;
    };
    let selector = [head[0], head[1], head[2], head[3]];
    match KnownFunction::from_selector(selector) {
        Some(f) => FunctionCall::Known(f),
        None => FunctionCall::Unknown(selector),
    }
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &[u8; 20]) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address);
    word
}

/// `onReport(string)` calldata.
pub fn on_report(message: &str) -> Vec<u8> {
    let bytes = message.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;

    let mut calldata = Vec::with_capacity(4 + 2 * WORD + padded);
    calldata.extend_from_slice(&KnownFunction::OnReport.selector());
    calldata.extend_from_slice(&uint_word(WORD as u128));
    calldata.extend_from_slice(&uint_word(bytes.len() as u128));
    calldata.extend_from_slice(bytes);
    calldata.resize(4 + 2 * WORD + padded, 0);
    calldata
}

pub fn transfer(to: &[u8; 20], amount: u128) -> Vec<u8> {
    address_amount_call(KnownFunction::Transfer, to, amount)
}

pub fn approve(spender: &[u8; 20], amount: u128) -> Vec<u8> {
    address_amount_call(KnownFunction::Approve, spender, amount)
}

fn address_amount_call(function: KnownFunction, address: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut calldata = Vec::with_capacity(4 + 2 * WORD);
    calldata.extend_from_slice(&function.selector());
    calldata.extend_from_slice(&address_word(address));
    calldata.extend_from_slice(&uint_word(amount));
    calldata
}

fn read_usize_word(bytes: &[u8], at: usize) -> Option<usize> {
    let word = bytes.get(at..at.checked_add(WORD)?)?;
    // anything above 8 bytes cannot be a valid offset or length here
    if word[..WORD - 8].iter().any(|&b| b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

/// Recover the message from `onReport(string)` calldata.
pub fn decode_on_report(calldata: &[u8]) -> Option<String> {
    if identify(calldata) != FunctionCall::Known(KnownFunction::OnReport) {
        return None;
    }
    let args = &calldata[4..];
    let offset = read_usize_word(args, 0)?;
    let len = read_usize_word(args, offset)?;
    let start = offset.checked_add(WORD)?;
    let data = args.get(start..start.checked_add(len)?)?;
    String::from_utf8(data.to_vec()).ok()
}
