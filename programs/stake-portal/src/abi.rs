//! Minimal Solidity ABI helpers for the handful of view calls and event
//! topics the service reads. Words are 32-byte big-endian.

use primitive_types::U256;
use sha3::{Digest, Keccak256};

use crate::chain::ChainError;

pub const WORD: usize = 32;
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic hash of an event signature, `0x` prefixed.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

pub fn is_hex_address(address: &str) -> bool {
    let Some(body) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) else {
        return false;
    };
    body.len() == 40 && body.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn address_bytes(address: &str) -> Result<[u8; 20], ChainError> {
    if !is_hex_address(address) {
        return Err(ChainError::Decode(format!("not an address: {}", address)));
    }
    let mut out = [0u8; 20];
    hex::decode_to_slice(&address[2..], &mut out)
        .map_err(|e| ChainError::Decode(e.to_string()))?;
    Ok(out)
}

/// EIP-55 mixed-case checksum encoding.
pub fn to_checksum_address(bytes: &[u8; 20]) -> String {
    let lower = hex::encode(bytes);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn encode_address(address: &str) -> Result<[u8; WORD], ChainError> {
    let bytes = address_bytes(address)?;
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

pub fn encode_uint(value: U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

/// `0x`-prefixed calldata for a call with static arguments.
pub fn encode_call(signature: &str, args: &[[u8; WORD]]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    format!("0x{}", hex::encode(data))
}

/// Topic filter value for an indexed address argument.
pub fn address_topic(address: &str) -> Result<String, ChainError> {
    Ok(format!("0x{}", hex::encode(encode_address(address)?)))
}

pub fn decode_hex(data: &str) -> Result<Vec<u8>, ChainError> {
    let body = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(body).map_err(|e| ChainError::Decode(e.to_string()))
}

pub fn word(data: &[u8], index: usize) -> Result<&[u8], ChainError> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .ok_or_else(|| ChainError::Decode(format!("missing word {}", index)))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, ChainError> {
    Ok(U256::from_big_endian(word(data, index)?))
}

pub fn decode_u64(data: &[u8], index: usize) -> Result<u64, ChainError> {
    u256_to_u64(decode_uint(data, index)?)
}

pub fn decode_bool(data: &[u8], index: usize) -> Result<bool, ChainError> {
    Ok(!decode_uint(data, index)?.is_zero())
}

pub fn decode_address(data: &[u8], index: usize) -> Result<String, ChainError> {
    let w = word(data, index)?;
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&w[12..]);
    Ok(to_checksum_address(&bytes))
}

/// Address carried in an indexed event topic.
pub fn topic_address(topic: &str) -> Result<String, ChainError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != WORD {
        return Err(ChainError::Decode(format!("topic has {} bytes", bytes.len())));
    }
    decode_address(&bytes, 0)
}

fn dynamic_array(data: &[u8], head_index: usize) -> Result<(usize, usize), ChainError> {
    let offset = u256_to_usize(decode_uint(data, head_index)?)?;
    if offset % WORD != 0 {
        return Err(ChainError::Decode(format!("unaligned offset {}", offset)));
    }
    let len_index = offset / WORD;
    let len = u256_to_usize(decode_uint(data, len_index)?)?;
    Ok((len_index + 1, len))
}

/// `uint256[]` whose offset sits in the head word `head_index`.
pub fn decode_uint_array(data: &[u8], head_index: usize) -> Result<Vec<U256>, ChainError> {
    let (first, len) = dynamic_array(data, head_index)?;
    (first..first + len).map(|i| decode_uint(data, i)).collect()
}

pub fn decode_address_array(data: &[u8], head_index: usize) -> Result<Vec<String>, ChainError> {
    let (first, len) = dynamic_array(data, head_index)?;
    (first..first + len).map(|i| decode_address(data, i)).collect()
}

pub fn u256_to_u64(value: U256) -> Result<u64, ChainError> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Decode(format!("{} overflows u64", value)));
    }
    Ok(value.low_u64())
}

fn u256_to_usize(value: U256) -> Result<usize, ChainError> {
    usize::try_from(u256_to_u64(value)?).map_err(|e| ChainError::Decode(e.to_string()))
}

/// Decimal ether string for a wei amount, same shape as ethers' `formatEther`.
pub fn format_ether(wei: U256) -> String {
    let unit = U256::exp10(18);
    let whole = wei / unit;
    let frac = wei % unit;
    let frac = format!("{:0>18}", frac.to_string());
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}.0", whole)
    } else {
        format!("{}.{}", whole, frac)
    }
}
