use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use sqlx::{
    Postgres, Type,
    decode::Decode,
    encode::Encode,
    postgres::{PgHasArrayType, PgTypeInfo, PgValueRef},
};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub const FINGERPRINT_LEN: usize = 32;

const FRIENDLY_LEN: usize = 36;
const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("invalid workchain: {0}")]
    Workchain(String),
    #[error("invalid account hash: {0}")]
    Hash(String),
    #[error("invalid user-friendly address: {0}")]
    Friendly(String),
    #[error("checksum mismatch")]
    Checksum,
}

/// 32-byte account hash identifying an account inside a workchain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let arr: [u8; FINGERPRINT_LEN] = bytes.try_into().map_err(|_| {
            AddressError::Hash(format!(
                "expected {} bytes, got {}",
                FINGERPRINT_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let h = s.trim();
        if h.len() != FINGERPRINT_LEN * 2 {
            return Err(AddressError::Hash(format!(
                "expected {} hex chars, got {}",
                FINGERPRINT_LEN * 2,
                h.len()
            )));
        }
        let bytes =
            hex::decode(h).map_err(|e| AddressError::Hash(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// Stored as BYTEA; decoding rejects anything that is not exactly 32 bytes.
impl Type<Postgres> for Fingerprint {
    fn type_info() -> PgTypeInfo {
        <Vec<u8> as Type<Postgres>>::type_info()
    }
}

impl PgHasArrayType for Fingerprint {
    fn array_type_info() -> PgTypeInfo {
        <Vec<u8> as PgHasArrayType>::array_type_info()
    }
}

impl<'q> Encode<'q, Postgres> for Fingerprint {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>>
    {
        <&[u8] as Encode<Postgres>>::encode_by_ref(&self.0.as_slice(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for Fingerprint {
    fn decode(
        value: PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let bytes = <Vec<u8> as Decode<Postgres>>::decode(value)?;
        Ok(Fingerprint::from_slice(&bytes)?)
    }
}

/// Workchain plus account hash. Parses both the raw `wc:hex` form and the
/// 48-character user-friendly form; always renders the raw form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    pub workchain: i32,
    pub fingerprint: Fingerprint,
}

impl AccountAddress {
    pub fn new(workchain: i32, fingerprint: Fingerprint) -> Self {
        Self {
            workchain,
            fingerprint,
        }
    }

    /// User-friendly base64url form. Only workchains that fit in one signed
    /// byte are representable.
    pub fn to_friendly(
        &self,
        bounceable: bool,
        testnet: bool,
    ) -> Result<String, AddressError> {
        let wc = i8::try_from(self.workchain)
            .map_err(|_| AddressError::Workchain(self.workchain.to_string()))?;
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if testnet {
            tag |= TAG_TESTNET;
        }
        let mut buf = [0u8; FRIENDLY_LEN];
        buf[0] = tag;
        buf[1] = wc as u8;
        buf[2..34].copy_from_slice(self.fingerprint.as_bytes());
        let crc = crc16_xmodem(&buf[..34]);
        buf[34..].copy_from_slice(&crc.to_be_bytes());
        Ok(URL_SAFE.encode(buf))
    }

    fn parse_raw(s: &str) -> Result<Self, AddressError> {
        let (wc, hash) = s
            .split_once(':')
            .ok_or_else(|| AddressError::Workchain(s.to_string()))?;
        let workchain = wc
            .parse::<i32>()
            .map_err(|_| AddressError::Workchain(wc.to_string()))?;
        Ok(Self::new(workchain, hash.parse()?))
    }

    fn parse_friendly(s: &str) -> Result<Self, AddressError> {
        if s.len() != 48 {
            return Err(AddressError::Friendly(format!(
                "expected 48 chars, got {}",
                s.len()
            )));
        }
        let normalized: String = s
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                c => c,
            })
            .collect();
        let bytes = STANDARD
            .decode(normalized)
            .map_err(|e| AddressError::Friendly(e.to_string()))?;
        if bytes.len() != FRIENDLY_LEN {
            return Err(AddressError::Friendly(format!(
                "expected {} bytes, got {}",
                FRIENDLY_LEN,
                bytes.len()
            )));
        }
        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::Friendly(format!(
                "unknown tag 0x{:02x}",
                bytes[0]
            )));
        }
        let crc = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16_xmodem(&bytes[..34]) != crc {
            return Err(AddressError::Checksum);
        }
        let workchain = bytes[1] as i8 as i32;
        Ok(Self::new(workchain, Fingerprint::from_slice(&bytes[2..34])?))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, self.fingerprint)
    }
}

impl FromStr for AccountAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_friendly(s)
        }
    }
}

impl serde::Serialize for AccountAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for AccountAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AccountAddress::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0), the checksum used by friendly
/// addresses.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
