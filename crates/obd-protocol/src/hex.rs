//! Hexadecimal ASCII frame parsing
//!
//! Adapter answers arrive either as space-delimited byte pairs
//! (`41 0C 1A F8`) or as one contiguous string (`410C1AF8`), depending on
//! whether `ATS0` took effect. Both are normalised to the same compact form.

use crate::error::ObdError;

/// Strip whitespace and prompt characters and upper-case the rest
pub fn compact(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_whitespace() && *c != '>')
        .flat_map(char::to_uppercase)
        .collect()
}

/// A response line decoded into raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexFrame {
    bytes: Vec<u8>,
}

impl HexFrame {
    /// Parse a response line, returning `None` if it is not an even-length hex string
    pub fn parse(line: &str) -> Option<Self> {
        Self::try_parse(line).ok()
    }

    /// Parse a response line, reporting why it is not a hex frame
    pub fn try_parse(line: &str) -> Result<Self, ObdError> {
        let compact = compact(line);
        if compact.is_empty() {
            return Err(ObdError::InvalidResponse("empty frame".to_string()));
        }
        if compact.len() % 2 != 0 {
            return Err(ObdError::InvalidResponse(format!(
                "odd number of hex digits in {:?}",
                line
            )));
        }

        let bytes = compact
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .ok_or_else(|| ObdError::InvalidResponse(format!("not hex: {:?}", line)))
            })
            .collect::<Result<Vec<u8>, ObdError>>()?;

        Ok(Self { bytes })
    }

    /// Raw bytes of the frame
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
