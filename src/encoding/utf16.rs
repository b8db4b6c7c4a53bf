use crate::encoding::{DecodeError, Decoder};

pub const UTF16_NAME: &str = "UTF-16";
pub const UTF16BE_NAME: &str = "UTF-16BE";
pub const UTF16LE_NAME: &str = "UTF-16LE";

/// Decode one 16-bit unit stream into `dst`, pairing surrogates.
///
/// `read16` extracts a unit from two bytes in the appropriate byte order.
/// `pending` carries an unpaired high surrogate between calls.
fn decode_units(
    src: &[u8],
    dst: &mut String,
    finish: bool,
    pending: &mut Option<u16>,
    read16: fn([u8; 2]) -> u16,
) -> Result<(usize, usize), DecodeError> {
    if src.is_empty() {
        return Err(DecodeError::InputIsEmpty);
    }

    let mut read = 0;
    let mut write = 0;
    for unit in src.chunks_exact(2) {
        let unit = read16([unit[0], unit[1]]);
        read += 2;
        match pending.take() {
            Some(high) => {
                if (0xDC00..=0xDFFF).contains(&unit) {
                    let c = 0x10000 + (((high as u32) & 0x3FF) << 10) + ((unit as u32) & 0x3FF);
                    let c = char::from_u32(c).ok_or(DecodeError::InvalidCodepoint {
                        read,
                        write,
                        value: c,
                    })?;
                    write += c.len_utf8();
                    dst.push(c);
                } else {
                    // The previous unit was a high surrogate with no low
                    // surrogate following it.
                    return Err(DecodeError::Malformed {
                        read,
                        write,
                        length: 2,
                        offset: 2,
                    });
                }
            }
            None => match unit {
                0xD800..=0xDBFF => *pending = Some(unit),
                0xDC00..=0xDFFF => {
                    return Err(DecodeError::Malformed {
                        read,
                        write,
                        length: 2,
                        offset: 0,
                    });
                }
                _ => {
                    let c = char::from_u32(unit as u32).ok_or(DecodeError::InvalidCodepoint {
                        read,
                        write,
                        value: unit as u32,
                    })?;
                    write += c.len_utf8();
                    dst.push(c);
                }
            },
        }
    }

    let rem = src.len() - read;
    if finish && (rem != 0 || pending.is_some()) {
        return Err(DecodeError::Malformed {
            read: src.len(),
            write,
            length: rem + if pending.is_some() { 2 } else { 0 },
            offset: 0,
        });
    }
    // An unpaired high surrogate stays buffered; report its bytes as consumed.
    Ok((read, write))
}

#[derive(Debug, Default)]
pub struct UTF16BEDecoder {
    pending: Option<u16>,
}

impl Decoder for UTF16BEDecoder {
    fn name(&self) -> &'static str {
        UTF16BE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_units(src, dst, finish, &mut self.pending, u16::from_be_bytes)
    }
}

#[derive(Debug, Default)]
pub struct UTF16LEDecoder {
    pending: Option<u16>,
}

impl Decoder for UTF16LEDecoder {
    fn name(&self) -> &'static str {
        UTF16LE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_units(src, dst, finish, &mut self.pending, u16::from_le_bytes)
    }
}

/// Byte-order-agnostic UTF-16, resolved by the leading byte order mark.
/// Without a BOM the stream is treated as big-endian per RFC 2781.
#[derive(Debug, Default)]
pub struct UTF16Decoder {
    resolved: Option<bool>, // Some(true) = big-endian
    pending: Option<u16>,
}

impl Decoder for UTF16Decoder {
    fn name(&self) -> &'static str {
        UTF16_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }

        let mut skip = 0;
        let be = match self.resolved {
            Some(be) => be,
            None => {
                if src.len() < 2 && !finish {
                    return Ok((0, 0));
                }
                let be = match src {
                    [0xFE, 0xFF, ..] => {
                        skip = 2;
                        true
                    }
                    [0xFF, 0xFE, ..] => {
                        skip = 2;
                        false
                    }
                    _ => true,
                };
                self.resolved = Some(be);
                be
            }
        };

        let read16 = if be { u16::from_be_bytes } else { u16::from_le_bytes };
        if src.len() == skip {
            return Ok((skip, 0));
        }
        decode_units(&src[skip..], dst, finish, &mut self.pending, read16)
            .map(|(read, write)| (read + skip, write))
            .map_err(|err| match err {
                DecodeError::Malformed {
                    read,
                    write,
                    length,
                    offset,
                } => DecodeError::Malformed {
                    read: read + skip,
                    write,
                    length,
                    offset,
                },
                err => err,
            })
    }
}
