//! Just enough of the Solidity ABI to talk to the message registry:
//! static words, dynamic `string`/`bytes`, and function selectors.

use thiserror::Error;

use crate::hash::keccak256;

const WORD: usize = 32;

#[derive(Debug, Error)]
#[error("abi: {0}")]
pub struct AbiError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Uint(u128),
    Bool(bool),
    FixedBytes32([u8; 32]),
    Bytes(Vec<u8>),
    String(String),
}

impl Token {
    fn dynamic_payload(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    fn static_word(&self) -> [u8; WORD] {
        let mut word = [0u8; WORD];
        match self {
            Self::Address(a) => word[12..].copy_from_slice(a),
            Self::Uint(v) => word[16..].copy_from_slice(&v.to_be_bytes()),
            Self::Bool(b) => word[31] = u8::from(*b),
            Self::FixedBytes32(b) => word.copy_from_slice(b),
            Self::Bytes(_) | Self::String(_) => {}
        }
        word
    }
}

/// First four bytes of the Keccak-256 of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = WORD * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token.dynamic_payload() {
            Some(payload) => {
                head.extend_from_slice(&Token::Uint((head_len + tail.len()) as u128).static_word());
                tail.extend_from_slice(&Token::Uint(payload.len() as u128).static_word());
                tail.extend_from_slice(payload);
                let padding = (WORD - payload.len() % WORD) % WORD;
                tail.resize(tail.len() + padding, 0);
            }
            None => head.extend_from_slice(&token.static_word()),
        }
    }

    head.extend(tail);
    head
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

pub fn parse_address(s: &str) -> Result<[u8; 20], AbiError> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|_| AbiError(format!("address '{s}' is not 20 bytes")))
}

pub fn format_address(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}

pub fn parse_bytes32(s: &str) -> Result<[u8; 32], AbiError> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|_| AbiError(format!("'{s}' is not 32 bytes")))
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>, AbiError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| AbiError(format!("bad hex '{s}': {e}")))
}

/// Reads return data word by word.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], AbiError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| AbiError("offset overflow".into()))?;
        self.data
            .get(offset..end)
            .ok_or_else(|| AbiError(format!("return data too short: need {end}, have {}", self.data.len())))
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        self.slice(offset, WORD)
    }

    fn uint_at(&self, offset: usize) -> Result<u128, AbiError> {
        let word = self.word_at(offset)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(AbiError("uint does not fit in 128 bits".into()));
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(low))
    }

    pub fn uint(&self, index: usize) -> Result<u128, AbiError> {
        self.uint_at(index * WORD)
    }

    pub fn bool(&self, index: usize) -> Result<bool, AbiError> {
        Ok(self.uint(index)? != 0)
    }

    pub fn address(&self, index: usize) -> Result<[u8; 20], AbiError> {
        let word = self.word_at(index * WORD)?;
        let mut address = [0u8; 20];
        address.copy_from_slice(&word[12..]);
        Ok(address)
    }

    pub fn bytes32(&self, index: usize) -> Result<[u8; 32], AbiError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.word_at(index * WORD)?);
        Ok(out)
    }

    pub fn bytes(&self, index: usize) -> Result<Vec<u8>, AbiError> {
        let offset = usize::try_from(self.uint(index)?).map_err(|_| AbiError("offset too large".into()))?;
        let len = usize::try_from(self.uint_at(offset)?).map_err(|_| AbiError("length too large".into()))?;
        Ok(self.slice(offset + WORD, len)?.to_vec())
    }

    pub fn string(&self, index: usize) -> Result<String, AbiError> {
        String::from_utf8(self.bytes(index)?).map_err(|e| AbiError(format!("string is not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn dynamic_args_go_to_the_tail() {
        let encoded = encode(&[Token::Uint(7), Token::String("hi".into())]);

        // two head words, then length word and one padded data word
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(encoded[31], 7);
        assert_eq!(encoded[63], 64);
        assert_eq!(encoded[95], 2);
        assert_eq!(&encoded[96..98], b"hi");
        assert!(encoded[98..].iter().all(|b| *b == 0));
    }

    #[test]
    fn decoder_reads_registry_record() {
        let from = [0x11u8; 20];
        let to = [0x22u8; 20];
        let data = encode(&[
            Token::Address(from),
            Token::Address(to),
            Token::String("hello there".into()),
            Token::String(String::new()),
            Token::Uint(1_700_000_000),
            Token::Bool(true),
        ]);

        let d = Decoder::new(&data);
        assert_eq!(d.address(0).unwrap(), from);
        assert_eq!(d.address(1).unwrap(), to);
        assert_eq!(d.string(2).unwrap(), "hello there");
        assert_eq!(d.string(3).unwrap(), "");
        assert_eq!(d.uint(4).unwrap(), 1_700_000_000);
        assert!(d.bool(5).unwrap());
    }

    #[test]
    fn short_return_data_is_an_error() {
        let d = Decoder::new(&[0u8; 31]);
        assert!(d.uint(0).is_err());
    }

    #[test]
    fn addresses_round_through_hex() {
        let addr = parse_address("0x00000000000000000000000000000000000000ff").unwrap();
        assert_eq!(addr[19], 0xff);
        assert_eq!(format_address(&addr), "0x00000000000000000000000000000000000000ff");
        assert!(parse_address("0x1234").is_err());
    }
}
