use crate::encoding::{DecodeError, Decoder};

pub const UCS4BE_NAME: &str = "UCS-4BE";
pub const UCS4LE_NAME: &str = "UCS-4LE";

/// Shared UCS-4 group decoding.
///
/// `carry` buffers an incomplete four byte group between calls; `filled` is
/// the number of carried bytes. Code points above `U+10FFFF` or within the
/// surrogate range are rejected.
fn decode_groups(
    src: &[u8],
    dst: &mut String,
    finish: bool,
    carry: &mut [u8; 4],
    filled: &mut usize,
    read32: fn([u8; 4]) -> u32,
) -> Result<(usize, usize), DecodeError> {
    if src.is_empty() {
        return Err(DecodeError::InputIsEmpty);
    }

    let mut read = 0;
    let mut write = 0;

    // Complete a group left over from the previous chunk first.
    if *filled > 0 {
        while *filled < 4 && read < src.len() {
            carry[*filled] = src[read];
            *filled += 1;
            read += 1;
        }
        if *filled < 4 {
            if finish {
                return Err(DecodeError::Malformed {
                    read,
                    write,
                    length: *filled,
                    offset: 0,
                });
            }
            return Ok((read, 0));
        }
        let value = read32(*carry);
        *filled = 0;
        let c = check_scalar(value, read, write)?;
        write += c.len_utf8();
        dst.push(c);
    }

    for group in src[read..].chunks_exact(4) {
        let value = read32([group[0], group[1], group[2], group[3]]);
        read += 4;
        let c = check_scalar(value, read, write)?;
        write += c.len_utf8();
        dst.push(c);
    }

    let rem = src.len() - read;
    if rem > 0 {
        if finish {
            return Err(DecodeError::Malformed {
                read: src.len(),
                write,
                length: rem,
                offset: 0,
            });
        }
        carry[..rem].copy_from_slice(&src[read..]);
        *filled = rem;
        read += rem;
    }

    Ok((read, write))
}

fn check_scalar(value: u32, read: usize, write: usize) -> Result<char, DecodeError> {
    if value > 0x10FFFF || (0xD800..=0xDFFF).contains(&value) {
        return Err(DecodeError::InvalidCodepoint { read, write, value });
    }
    char::from_u32(value).ok_or(DecodeError::InvalidCodepoint { read, write, value })
}

#[derive(Debug, Default)]
pub struct Ucs4BEDecoder {
    carry: [u8; 4],
    filled: usize,
}

impl Decoder for Ucs4BEDecoder {
    fn name(&self) -> &'static str {
        UCS4BE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_groups(
            src,
            dst,
            finish,
            &mut self.carry,
            &mut self.filled,
            u32::from_be_bytes,
        )
    }
}

#[derive(Debug, Default)]
pub struct Ucs4LEDecoder {
    carry: [u8; 4],
    filled: usize,
}

impl Decoder for Ucs4LEDecoder {
    fn name(&self) -> &'static str {
        UCS4LE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_groups(
            src,
            dst,
            finish,
            &mut self.carry,
            &mut self.filled,
            u32::from_le_bytes,
        )
    }
}
