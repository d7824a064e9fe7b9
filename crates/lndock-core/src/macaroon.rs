//! Minimal macaroon V2 binary codec.
//!
//! The daemon carries the peer's macaroon and walks its first-party caveats
//! for the `permissions` capability list; it never verifies the signature
//! chain. Only the parts of the V2 binary layout needed for that are
//! implemented: a version byte, varint-framed fields, and EOS-delimited
//! header / caveat / signature sections.

use thiserror::Error;

const VERSION: u8 = 2;

const FIELD_EOS: u64 = 0;
const FIELD_LOCATION: u64 = 1;
const FIELD_IDENTIFIER: u64 = 2;
const FIELD_VID: u64 = 4;
const FIELD_SIGNATURE: u64 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacaroonError {
    #[error("macaroon is empty")]
    Empty,
    #[error("unsupported macaroon version {0}")]
    UnsupportedVersion(u8),
    #[error("truncated macaroon")]
    Truncated,
    #[error("varint overflow")]
    VarintOverflow,
    #[error("unexpected field type {0}")]
    UnexpectedField(u64),
    #[error("section is missing its identifier")]
    MissingIdentifier,
    #[error("macaroon has no signature")]
    MissingSignature,
    #[error("trailing bytes after signature")]
    TrailingBytes,
}

/// One restriction attached to the macaroon. First-party caveats carry only
/// an identifier; third-party caveats add a verification id and usually a
/// discharge location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub identifier: Vec<u8>,
    pub verification_id: Option<Vec<u8>>,
    pub location: Option<Vec<u8>>,
}

impl Caveat {
    pub fn first_party(identifier: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            verification_id: None,
            location: None,
        }
    }

    pub fn is_first_party(&self) -> bool {
        self.verification_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    pub location: Option<Vec<u8>>,
    pub identifier: Vec<u8>,
    pub caveats: Vec<Caveat>,
    pub signature: Vec<u8>,
}

impl Macaroon {
    pub fn decode(raw: &[u8]) -> Result<Self, MacaroonError> {
        let mut reader = Reader::new(raw);
        let version = reader.byte().map_err(|_| MacaroonError::Empty)?;
        if version != VERSION {
            return Err(MacaroonError::UnsupportedVersion(version));
        }

        let (location, identifier) = reader.section()?;
        let identifier = identifier.ok_or(MacaroonError::MissingIdentifier)?;

        let mut caveats = Vec::new();
        loop {
            if reader.peek_eos()? {
                reader.byte()?;
                break;
            }
            caveats.push(reader.caveat()?);
        }

        let (tag, signature) = reader.field()?;
        if tag != FIELD_SIGNATURE {
            return Err(MacaroonError::MissingSignature);
        }
        if !reader.done() {
            return Err(MacaroonError::TrailingBytes);
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![VERSION];
        if let Some(location) = &self.location {
            write_field(&mut out, FIELD_LOCATION, location);
        }
        write_field(&mut out, FIELD_IDENTIFIER, &self.identifier);
        out.push(FIELD_EOS as u8);
        for caveat in &self.caveats {
            if let Some(location) = &caveat.location {
                write_field(&mut out, FIELD_LOCATION, location);
            }
            write_field(&mut out, FIELD_IDENTIFIER, &caveat.identifier);
            if let Some(vid) = &caveat.verification_id {
                write_field(&mut out, FIELD_VID, vid);
            }
            out.push(FIELD_EOS as u8);
        }
        out.push(FIELD_EOS as u8);
        write_field(&mut out, FIELD_SIGNATURE, &self.signature);
        out
    }

    pub fn first_party_caveats(&self) -> impl Iterator<Item = &Caveat> {
        self.caveats.iter().filter(|caveat| caveat.is_first_party())
    }
}

fn write_field(out: &mut Vec<u8>, tag: u64, content: &[u8]) {
    write_varint(out, tag);
    write_varint(out, content.len() as u64);
    out.extend_from_slice(content);
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct Reader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos == self.raw.len()
    }

    fn byte(&mut self) -> Result<u8, MacaroonError> {
        let byte = *self.raw.get(self.pos).ok_or(MacaroonError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek_eos(&self) -> Result<bool, MacaroonError> {
        let byte = *self.raw.get(self.pos).ok_or(MacaroonError::Truncated)?;
        Ok(u64::from(byte) == FIELD_EOS)
    }

    fn varint(&mut self) -> Result<u64, MacaroonError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 63 && byte > 1 {
                return Err(MacaroonError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn field(&mut self) -> Result<(u64, Vec<u8>), MacaroonError> {
        let tag = self.varint()?;
        let len = self.varint()? as usize;
        let end = self.pos.checked_add(len).ok_or(MacaroonError::Truncated)?;
        if end > self.raw.len() {
            return Err(MacaroonError::Truncated);
        }
        let content = self.raw[self.pos..end].to_vec();
        self.pos = end;
        Ok((tag, content))
    }

    /// Reads an optional-location + identifier header terminated by EOS.
    fn section(&mut self) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), MacaroonError> {
        let mut location = None;
        let mut identifier = None;
        loop {
            if self.peek_eos()? {
                self.byte()?;
                return Ok((location, identifier));
            }
            let (tag, content) = self.field()?;
            match tag {
                FIELD_LOCATION if location.is_none() => location = Some(content),
                FIELD_IDENTIFIER if identifier.is_none() => identifier = Some(content),
                other => return Err(MacaroonError::UnexpectedField(other)),
            }
        }
    }

    fn caveat(&mut self) -> Result<Caveat, MacaroonError> {
        let mut location = None;
        let mut identifier = None;
        let mut verification_id = None;
        loop {
            if self.peek_eos()? {
                self.byte()?;
                break;
            }
            let (tag, content) = self.field()?;
            match tag {
                FIELD_LOCATION if location.is_none() => location = Some(content),
                FIELD_IDENTIFIER if identifier.is_none() => identifier = Some(content),
                FIELD_VID if verification_id.is_none() => verification_id = Some(content),
                other => return Err(MacaroonError::UnexpectedField(other)),
            }
        }
        Ok(Caveat {
            identifier: identifier.ok_or(MacaroonError::MissingIdentifier)?,
            verification_id,
            location,
        })
    }
}
