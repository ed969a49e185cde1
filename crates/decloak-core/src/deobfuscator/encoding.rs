//! String encodings recognized inside decoders.

use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;

/// The obfuscator's base64 alphabet, lowercase letters first. The trailing
/// `=` is part of the literal it embeds in decoders.
pub const OBFUSCATOR_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    None,
    Base64,
    Rc4,
    Xor(u32),
}

impl Encoding {
    /// Decodes an array entry. `key` is the decoder's second argument, which
    /// only RC4 uses.
    pub fn decode(self, value: &str, key: Option<&str>) -> Option<String> {
        match self {
            Encoding::None => Some(value.to_string()),
            Encoding::Base64 => base64_decode(value),
            Encoding::Rc4 => rc4(&base64_decode(value)?, key?),
            Encoding::Xor(n) => Some(xor(value, n)),
        }
    }
}

fn engine() -> Option<GeneralPurpose> {
    let alphabet = Alphabet::new(OBFUSCATOR_ALPHABET.trim_end_matches('=')).ok()?;
    let config = GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true);
    Some(GeneralPurpose::new(&alphabet, config))
}

/// Base64 with the obfuscator's alphabet, then UTF-8.
pub fn base64_decode(value: &str) -> Option<String> {
    let bytes = engine()?.decode(value.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

/// RC4 over UTF-16 code units, as the generated decoder computes it with
/// `charCodeAt` and `String.fromCharCode`.
pub fn rc4(data: &str, key: &str) -> Option<String> {
    let key: Vec<u32> = key.encode_utf16().map(u32::from).collect();
    if key.is_empty() {
        return None;
    }
    let mut s: Vec<u32> = (0..256).collect();
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) % 256;
        s.swap(i, j);
    }

    let (mut i, mut j) = (0usize, 0usize);
    let output: Vec<u16> = data
        .encode_utf16()
        .map(|unit| {
            i = (i + 1) % 256;
            j = (j + s[i] as usize) % 256;
            s.swap(i, j);
            let k = s[(s[i] + s[j]) as usize % 256];
            (u32::from(unit) ^ k) as u16
        })
        .collect();
    Some(String::from_utf16_lossy(&output))
}

pub fn xor(value: &str, key: u32) -> String {
    let units: Vec<u16> = value
        .encode_utf16()
        .map(|unit| (u32::from(unit) ^ key) as u16)
        .collect();
    String::from_utf16_lossy(&units)
}
