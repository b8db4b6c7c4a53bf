use crate::encoding::{DecodeError, Decoder, WINDOWS_1252};

pub const ISO_8859_1_NAME: &str = "ISO-8859-1";
pub const ASCII_NAME: &str = "US-ASCII";
pub const WINDOWS_1252_NAME: &str = "Windows-1252";

pub struct Iso8859_1Decoder;

impl Decoder for Iso8859_1Decoder {
    fn name(&self) -> &'static str {
        ISO_8859_1_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }
        let mut write = 0;
        for &b in src {
            let c = b as char;
            write += c.len_utf8();
            dst.push(c);
        }
        Ok((src.len(), write))
    }
}

pub struct AsciiDecoder;

impl Decoder for AsciiDecoder {
    fn name(&self) -> &'static str {
        ASCII_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }
        for (i, &b) in src.iter().enumerate() {
            if b >= 0x80 {
                return Err(DecodeError::Malformed {
                    read: i + 1,
                    write: i,
                    length: 1,
                    offset: 0,
                });
            }
            dst.push(b as char);
        }
        Ok((src.len(), src.len()))
    }
}

pub struct Windows1252Decoder;

impl Decoder for Windows1252Decoder {
    fn name(&self) -> &'static str {
        WINDOWS_1252_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }
        let mut write = 0;
        for &b in src {
            let c = match b {
                0x80..=0x9F => WINDOWS_1252[(b - 0x80) as usize],
                _ => b as char,
            };
            write += c.len_utf8();
            dst.push(c);
        }
        Ok((src.len(), write))
    }
}
