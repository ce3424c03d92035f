//! TON account addresses.
//!
//! Upstream APIs hand out addresses either in raw form (`0:83df…31a8`) or in the
//! user-friendly form (`EQCD39VS5jcp…`). The friendly form is 36 bytes encoded as
//! base64: `[tag, workchain, account(32), crc16(2)]`, which is what Telegram deep
//! links and explorers expect.

use std::fmt;
use std::str::FromStr;

use base64::prelude::{Engine, BASE64_STANDARD_NO_PAD, BASE64_URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

const PAYLOAD_LEN: usize = 34;
const FRIENDLY_BYTES_LEN: usize = PAYLOAD_LEN + 2;
pub const FRIENDLY_ADDRESS_LEN: usize = 48;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAddressFormat {
    #[error("address is empty")]
    MissingAccount,
    #[error("invalid workchain {0:?}")]
    InvalidWorkchain(String),
    #[error("account id must be 64 hex characters, got {0}")]
    InvalidHexLength(usize),
    #[error("account id is not valid hex")]
    InvalidHex,
    #[error("address is not valid base64")]
    InvalidBase64,
    #[error("friendly address must decode to 36 bytes, got {0}")]
    InvalidLength(usize),
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("unknown address tag {0:#04x}")]
    UnknownTag(u8),
}

/// Register initialisation of the CRC16 (poly `0x1021`, MSB first, no final XOR).
///
/// [`Crc16Variant::CcittFalse`] starts from `0xFFFF` and is what [`canonicalize`]
/// produces. [`Crc16Variant::Xmodem`] starts from `0x0000` and is what TON wallets
/// and explorers verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Crc16Variant {
    #[default]
    CcittFalse,
    Xmodem,
}

impl FromStr for Crc16Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "ccitt-false" | "ccitt" => Ok(Self::CcittFalse),
            "xmodem" => Ok(Self::Xmodem),
            other => Err(anyhow::anyhow!("Unknown CRC16 variant: {other}")),
        }
    }
}

impl Crc16Variant {
    fn init(self) -> u16 {
        match self {
            Crc16Variant::Xmodem => 0x0000,
            Crc16Variant::CcittFalse => 0xFFFF,
        }
    }
}

pub fn crc16(variant: Crc16Variant, data: &[u8]) -> u16 {
    let mut crc = variant.init();
    for byte in data {
        crc ^= (*byte as u16) << 8;
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

/// Account identity: workchain and 32-byte account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAccount {
    pub workchain: i8,
    pub account: [u8; 32],
}

impl RawAccount {
    /// Parses `<workchain>:<64 hex>`. Without a `:` the workchain is 0.
    pub fn parse_raw(raw: &str) -> Result<Self, InvalidAddressFormat> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InvalidAddressFormat::MissingAccount);
        }
        let (workchain, account_hex) = match raw.split_once(':') {
            Some((workchain, account_hex)) => (
                workchain
                    .parse::<i8>()
                    .map_err(|_| InvalidAddressFormat::InvalidWorkchain(workchain.to_string()))?,
                account_hex,
            ),
            None => (0, raw),
        };
        if account_hex.len() != 64 {
            return Err(InvalidAddressFormat::InvalidHexLength(account_hex.len()));
        }
        let mut account = [0u8; 32];
        hex::decode_to_slice(account_hex, &mut account)
            .map_err(|_| InvalidAddressFormat::InvalidHex)?;
        Ok(Self { workchain, account })
    }

    /// Accepts either the raw or the user-friendly form.
    pub fn parse(address: &str) -> Result<Self, InvalidAddressFormat> {
        let address = address.trim();
        if address.contains(':') || address.len() == 64 {
            Self::parse_raw(address)
        } else {
            FriendlyAddress::decode(address, Crc16Variant::Xmodem)
                .or_else(|_| FriendlyAddress::decode(address, Crc16Variant::CcittFalse))
                .map(|friendly| friendly.account)
        }
    }

    pub fn to_friendly(self, bounceable: bool, testnet: bool) -> FriendlyAddress {
        FriendlyAddress {
            account: self,
            bounceable,
            testnet,
        }
    }
}

impl fmt::Display for RawAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.account))
    }
}

impl FromStr for RawAccount {
    type Err = InvalidAddressFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyAddress {
    pub account: RawAccount,
    pub bounceable: bool,
    pub testnet: bool,
}

impl FriendlyAddress {
    pub fn tag(&self) -> u8 {
        let tag = if self.bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if self.testnet {
            tag | TAG_TESTNET
        } else {
            tag
        }
    }

    pub fn to_bytes(&self, variant: Crc16Variant) -> [u8; FRIENDLY_BYTES_LEN] {
        let mut bytes = [0u8; FRIENDLY_BYTES_LEN];
        bytes[0] = self.tag();
        bytes[1] = self.account.workchain as u8;
        bytes[2..PAYLOAD_LEN].copy_from_slice(&self.account.account);
        let checksum = crc16(variant, &bytes[..PAYLOAD_LEN]);
        bytes[PAYLOAD_LEN..].copy_from_slice(&checksum.to_be_bytes());
        bytes
    }

    pub fn encode(&self, variant: Crc16Variant) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(self.to_bytes(variant))
    }

    /// Decodes both the url-safe and the standard alphabet, with or without padding.
    pub fn decode(address: &str, variant: Crc16Variant) -> Result<Self, InvalidAddressFormat> {
        let address = address.trim().trim_end_matches('=');
        let bytes = if address.contains(['+', '/']) {
            BASE64_STANDARD_NO_PAD.decode(address)
        } else {
            BASE64_URL_SAFE_NO_PAD.decode(address)
        }
        .map_err(|_| InvalidAddressFormat::InvalidBase64)?;
        if bytes.len() != FRIENDLY_BYTES_LEN {
            return Err(InvalidAddressFormat::InvalidLength(bytes.len()));
        }

        let expected = crc16(variant, &bytes[..PAYLOAD_LEN]);
        let actual = u16::from_be_bytes([bytes[PAYLOAD_LEN], bytes[PAYLOAD_LEN + 1]]);
        if expected != actual {
            return Err(InvalidAddressFormat::ChecksumMismatch { expected, actual });
        }

        let tag = bytes[0];
        let bounceable = match tag & !TAG_TESTNET {
            TAG_BOUNCEABLE => true,
            TAG_NON_BOUNCEABLE => false,
            _ => return Err(InvalidAddressFormat::UnknownTag(tag)),
        };
        let mut account = [0u8; 32];
        account.copy_from_slice(&bytes[2..PAYLOAD_LEN]);
        Ok(Self {
            account: RawAccount {
                workchain: bytes[1] as i8,
                account,
            },
            bounceable,
            testnet: tag & TAG_TESTNET != 0,
        })
    }
}

/// Raw address to the url-safe friendly form, checksummed with CCITT-FALSE.
pub fn canonicalize(
    raw: &str,
    bounceable: bool,
    testnet: bool,
) -> Result<String, InvalidAddressFormat> {
    canonicalize_with(raw, bounceable, testnet, Crc16Variant::CcittFalse)
}

pub fn canonicalize_with(
    raw: &str,
    bounceable: bool,
    testnet: bool,
    variant: Crc16Variant,
) -> Result<String, InvalidAddressFormat> {
    Ok(RawAccount::parse_raw(raw)?
        .to_friendly(bounceable, testnet)
        .encode(variant))
}

/// Lowercase raw form of any accepted address, used as a stable set key.
pub fn normalize_address(address: &str) -> Option<String> {
    RawAccount::parse(address).ok().map(|account| account.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUNDATION: &str = "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8";
    const ELECTOR: &str = "-1:3333333333333333333333333333333333333333333333333333333333333333";

    #[test]
    fn crc16_check_values() {
        assert_eq!(crc16(Crc16Variant::Xmodem, b"123456789"), 0x31C3);
        assert_eq!(crc16(Crc16Variant::CcittFalse, b"123456789"), 0x29B1);
    }

    #[test]
    fn canonicalize_checksums_with_ccitt_false() {
        assert_eq!(
            canonicalize(ELECTOR, true, false).unwrap(),
            "Ef8zMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzM-J9"
        );
        let encoded = canonicalize(FOUNDATION, true, false).unwrap();
        assert_eq!(encoded, "EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqLQ1");
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let embedded = u16::from_be_bytes([bytes[34], bytes[35]]);
        assert_eq!(embedded, crc16(Crc16Variant::CcittFalse, &bytes[..34]));
        assert_eq!(embedded, 0xb435);
    }

    #[test]
    fn xmodem_matches_wallet_addresses() {
        assert_eq!(
            canonicalize_with(ELECTOR, true, false, Crc16Variant::Xmodem).unwrap(),
            "Ef8zMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzM0vF"
        );
        assert_eq!(
            canonicalize_with(FOUNDATION, true, false, Crc16Variant::Xmodem).unwrap(),
            "EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N"
        );
    }

    #[test]
    fn crc16_variant_names() {
        assert_eq!(Crc16Variant::default(), Crc16Variant::CcittFalse);
        assert_eq!("xmodem".parse::<Crc16Variant>().unwrap(), Crc16Variant::Xmodem);
        assert_eq!("CCITT_FALSE".parse::<Crc16Variant>().unwrap(), Crc16Variant::CcittFalse);
        assert!("crc32".parse::<Crc16Variant>().is_err());
    }

    #[test]
    fn output_is_url_safe_and_unpadded() {
        let encoded = canonicalize(FOUNDATION, false, true).unwrap();
        assert_eq!(encoded.len(), FRIENDLY_ADDRESS_LEN);
        assert!(!encoded.contains(['+', '/', '=']));
    }

    #[test]
    fn decode_reproduces_payload() {
        for variant in [Crc16Variant::Xmodem, Crc16Variant::CcittFalse] {
            for (bounceable, testnet) in [(true, false), (false, false), (true, true), (false, true)] {
                let account = RawAccount::parse_raw(ELECTOR).unwrap();
                let friendly = account.to_friendly(bounceable, testnet);
                let encoded = friendly.encode(variant);
                let decoded = FriendlyAddress::decode(&encoded, variant).unwrap();
                assert_eq!(decoded, friendly);
                assert_eq!(decoded.to_bytes(variant), friendly.to_bytes(variant));
                assert_eq!(decoded.account.to_string(), ELECTOR);
            }
        }
    }

    #[test]
    fn canonicalize_is_deterministic() {
        assert_eq!(
            canonicalize_with(FOUNDATION, true, false, Crc16Variant::CcittFalse),
            canonicalize_with(FOUNDATION, true, false, Crc16Variant::CcittFalse)
        );
    }

    #[test]
    fn flags_change_tag_and_output() {
        let tags: Vec<u8> = [(true, false), (false, false), (true, true), (false, true)]
            .into_iter()
            .map(|(b, t)| RawAccount::parse_raw(FOUNDATION).unwrap().to_friendly(b, t).tag())
            .collect();
        assert_eq!(tags, vec![0x11, 0x51, 0x91, 0xD1]);

        let bounceable = canonicalize(FOUNDATION, true, false).unwrap();
        let non_bounceable = canonicalize(FOUNDATION, false, false).unwrap();
        let testnet = canonicalize(FOUNDATION, true, true).unwrap();
        assert_ne!(bounceable, non_bounceable);
        assert_ne!(bounceable, testnet);
        assert!(non_bounceable.starts_with("UQ"));
    }

    #[test]
    fn rejects_malformed_raw_addresses() {
        assert!(matches!(
            canonicalize("not-an-address", true, false),
            Err(InvalidAddressFormat::InvalidHexLength(_))
        ));
        assert_eq!(
            canonicalize("0:deadbeef", true, false),
            Err(InvalidAddressFormat::InvalidHexLength(8))
        );
        assert!(matches!(
            canonicalize(&format!("wc:{}", "00".repeat(32)), true, false),
            Err(InvalidAddressFormat::InvalidWorkchain(_))
        ));
        assert!(matches!(
            canonicalize(&format!("300:{}", "00".repeat(32)), true, false),
            Err(InvalidAddressFormat::InvalidWorkchain(_))
        ));
        assert_eq!(
            canonicalize(&format!("0:{}", "zz".repeat(32)), true, false),
            Err(InvalidAddressFormat::InvalidHex)
        );
        assert_eq!(canonicalize("", true, false), Err(InvalidAddressFormat::MissingAccount));
    }

    #[test]
    fn missing_workchain_defaults_to_basechain() {
        let bare = &FOUNDATION[2..];
        assert_eq!(
            canonicalize(bare, true, false).unwrap(),
            canonicalize(FOUNDATION, true, false).unwrap()
        );
    }

    #[test]
    fn decode_rejects_corrupted_checksum() {
        let mut bytes = RawAccount::parse_raw(FOUNDATION)
            .unwrap()
            .to_friendly(true, false)
            .to_bytes(Crc16Variant::Xmodem);
        bytes[35] ^= 0x01;
        let corrupted = BASE64_URL_SAFE_NO_PAD.encode(bytes);
        assert!(matches!(
            FriendlyAddress::decode(&corrupted, Crc16Variant::Xmodem),
            Err(InvalidAddressFormat::ChecksumMismatch { .. })
        ));
        let short = BASE64_URL_SAFE_NO_PAD.encode([0x11u8, 0x00, 0x83, 0xdf]);
        assert_eq!(
            FriendlyAddress::decode(&short, Crc16Variant::Xmodem),
            Err(InvalidAddressFormat::InvalidLength(4))
        );
        assert_eq!(
            FriendlyAddress::decode("not base64!", Crc16Variant::Xmodem),
            Err(InvalidAddressFormat::InvalidBase64)
        );
    }

    #[test]
    fn normalizes_friendly_and_raw_forms() {
        let upper = FOUNDATION.to_uppercase();
        assert_eq!(normalize_address(&upper).as_deref(), Some(FOUNDATION));
        assert_eq!(
            normalize_address("EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N").as_deref(),
            Some(FOUNDATION)
        );
        assert_eq!(
            normalize_address("EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N=").as_deref(),
            Some(FOUNDATION)
        );
        assert_eq!(
            normalize_address("EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqLQ1").as_deref(),
            Some(FOUNDATION)
        );
        assert_eq!(normalize_address("garbage"), None);
    }
}
