mod latin;
mod ucs4;
mod utf16;

use std::{
    borrow::Cow,
    str::{from_utf8, from_utf8_unchecked},
};

pub use latin::{
    ASCII_NAME, AsciiDecoder, ISO_8859_1_NAME, Iso8859_1Decoder, WINDOWS_1252_NAME,
    Windows1252Decoder,
};
pub use ucs4::{UCS4BE_NAME, UCS4LE_NAME, Ucs4BEDecoder, Ucs4LEDecoder};
pub use utf16::{UTF16_NAME, UTF16BE_NAME, UTF16BEDecoder, UTF16Decoder, UTF16LE_NAME, UTF16LEDecoder};

/// A stateful byte-to-character transducer.
///
/// Decoders carry over incomplete multi-byte sequences between calls, so a
/// caller may feed input in arbitrarily sized chunks. `finish` marks the last
/// chunk; a dangling partial sequence then becomes a [`DecodeError::Malformed`].
pub trait Decoder {
    fn name(&self) -> &'static str;
    /// If no error occurs, return `Ok((read_bytes, written_bytes))`.
    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError>;
}

#[derive(Debug, Clone)]
pub enum DecodeError {
    /// Input buffer is empty.
    InputIsEmpty,
    /// Malformed byte sequence found at `src[read - length - offset..read - offset]`.
    ///
    /// The input and output buffers have consumed `read` and `write` bytes
    /// respectively.
    Malformed {
        read: usize,
        write: usize,
        length: usize,
        offset: usize,
    },
    /// A decoded code point lies outside the Unicode scalar value range
    /// (greater than `U+10FFFF` or within `U+D800..=U+DFFF`).
    InvalidCodepoint { read: usize, write: usize, value: u32 },
    /// Other errors.
    Other { msg: Cow<'static, str> },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputIsEmpty => write!(f, "input buffer is empty"),
            Self::Malformed { read, length, offset, .. } => write!(
                f,
                "malformed byte sequence of length {length} ending {offset} bytes before offset {read}"
            ),
            Self::InvalidCodepoint { value, .. } => {
                write!(f, "0x{value:X} is not a Unicode scalar value")
            }
            Self::Other { msg } => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub const UTF8_NAME: &str = "UTF-8";

pub struct UTF8Decoder;

impl Decoder for UTF8Decoder {
    fn name(&self) -> &'static str {
        UTF8_NAME
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

        match from_utf8(src) {
            Ok(s) => {
                dst.push_str(s);
                Ok((src.len(), src.len()))
            }
            Err(err) => {
                let up_to = err.valid_up_to();
                dst.push_str(unsafe {
                    // # Safety
                    // `src[..up_to]` is valid UTF-8 by the `Utf8Error` contract.
                    from_utf8_unchecked(&src[..up_to])
                });
                match err.error_len() {
                    Some(len) => Err(DecodeError::Malformed {
                        read: up_to + len,
                        write: up_to,
                        length: len,
                        offset: 0,
                    }),
                    // A partial sequence at the end of the chunk.
                    None if finish => Err(DecodeError::Malformed {
                        read: src.len(),
                        write: up_to,
                        length: src.len() - up_to,
                        offset: 0,
                    }),
                    None => Ok((up_to, up_to)),
                }
            }
        }
    }
}

/// Look up a decoder by encoding name.
///
/// Names are matched case-insensitively and a few common aliases are accepted
/// (`latin1`, `cp1252`, and the hyphen-less spellings).
pub fn find_decoder(encoding_name: &str) -> Option<Box<dyn Decoder>> {
    let mut normalized = encoding_name.trim().to_ascii_uppercase();
    normalized.retain(|c| c != '-' && c != '_');
    match normalized.as_str() {
        "UTF8" => Some(Box::new(UTF8Decoder)),
        "UTF16" | "ISO106461" | "UCS2" => Some(Box::new(UTF16Decoder::default())),
        "UTF16BE" => Some(Box::new(UTF16BEDecoder::default())),
        "UTF16LE" => Some(Box::new(UTF16LEDecoder::default())),
        "UCS4" | "UTF32" | "ISO10646UCS4" => Some(Box::new(Ucs4BEDecoder::default())),
        "UCS4BE" | "UTF32BE" => Some(Box::new(Ucs4BEDecoder::default())),
        "UCS4LE" | "UTF32LE" => Some(Box::new(Ucs4LEDecoder::default())),
        "ISO88591" | "LATIN1" | "L1" => Some(Box::new(Iso8859_1Decoder)),
        "USASCII" | "ASCII" | "ISO646US" => Some(Box::new(AsciiDecoder)),
        "WINDOWS1252" | "CP1252" => Some(Box::new(Windows1252Decoder)),
        _ => None,
    }
}

/// Examine the first bytes of a stream for a byte order mark or an unambiguous
/// encoding signature.
///
/// Returns the matching decoder together with the number of signature bytes to
/// skip, or `None` when the head is not recognized (the caller then decodes
/// with its default and sniffs an in-stream declaration instead).
pub fn detect_bom(head: &[u8]) -> Option<(Box<dyn Decoder>, usize)> {
    match *head {
        // 4-byte UCS-4 byte order marks take priority over their UTF-16 prefixes.
        [0xFF, 0xFE, 0xFF, 0xFE, ..] => Some((Box::new(Ucs4LEDecoder::default()), 4)),
        [0xFE, 0xFF, 0xFE, 0xFF, ..] => Some((Box::new(Ucs4BEDecoder::default()), 4)),
        [0xFE, 0xFF, ..] => Some((Box::new(UTF16BEDecoder::default()), 2)),
        [0xFF, 0xFE, ..] => Some((Box::new(UTF16LEDecoder::default()), 2)),
        [0xEF, 0xBB, 0xBF, ..] => Some((Box::new(UTF8Decoder), 3)),
        // No byte order mark, but a '<' encoded as a four byte group betrays
        // the unit width and byte order.
        [0x00, 0x00, 0x00, 0x3C, ..] => Some((Box::new(Ucs4BEDecoder::default()), 0)),
        [0x3C, 0x00, 0x00, 0x00, ..] => Some((Box::new(Ucs4LEDecoder::default()), 0)),
        [0x00, 0x3C, ..] => Some((Box::new(UTF16BEDecoder::default()), 0)),
        [0x3C, 0x00, ..] => Some((Box::new(UTF16LEDecoder::default()), 0)),
        _ => None,
    }
}

/// The Windows-1252 mapping of the `0x80..=0x9F` range.
///
/// HTML authored on Windows routinely contains `&#147;`-style references that
/// actually mean the Windows-1252 glyphs, so HTML mode remaps this range both
/// when decoding Windows-1252 bytes and when expanding character references.
/// Positions left undefined by Windows-1252 map to themselves.
pub(crate) const WINDOWS_1252: [char; 32] = [
    '\u{20AC}', // 0x80 EURO SIGN
    '\u{0081}',
    '\u{201A}', // 0x82 SINGLE LOW-9 QUOTATION MARK
    '\u{0192}', // 0x83 LATIN SMALL LETTER F WITH HOOK
    '\u{201E}', // 0x84 DOUBLE LOW-9 QUOTATION MARK
    '\u{2026}', // 0x85 HORIZONTAL ELLIPSIS
    '\u{2020}', // 0x86 DAGGER
    '\u{2021}', // 0x87 DOUBLE DAGGER
    '\u{02C6}', // 0x88 MODIFIER LETTER CIRCUMFLEX ACCENT
    '\u{2030}', // 0x89 PER MILLE SIGN
    '\u{0160}', // 0x8A LATIN CAPITAL LETTER S WITH CARON
    '\u{2039}', // 0x8B SINGLE LEFT-POINTING ANGLE QUOTATION MARK
    '\u{0152}', // 0x8C LATIN CAPITAL LIGATURE OE
    '\u{008D}',
    '\u{017D}', // 0x8E LATIN CAPITAL LETTER Z WITH CARON
    '\u{008F}',
    '\u{0090}',
    '\u{2018}', // 0x91 LEFT SINGLE QUOTATION MARK
    '\u{2019}', // 0x92 RIGHT SINGLE QUOTATION MARK
    '\u{201C}', // 0x93 LEFT DOUBLE QUOTATION MARK
    '\u{201D}', // 0x94 RIGHT DOUBLE QUOTATION MARK
    '\u{2022}', // 0x95 BULLET
    '\u{2013}', // 0x96 EN DASH
    '\u{2014}', // 0x97 EM DASH
    '\u{02DC}', // 0x98 SMALL TILDE
    '\u{2122}', // 0x99 TRADE MARK SIGN
    '\u{0161}', // 0x9A LATIN SMALL LETTER S WITH CARON
    '\u{203A}', // 0x9B SINGLE RIGHT-POINTING ANGLE QUOTATION MARK
    '\u{0153}', // 0x9C LATIN SMALL LIGATURE OE
    '\u{009D}',
    '\u{017E}', // 0x9E LATIN SMALL LETTER Z WITH CARON
    '\u{0178}', // 0x9F LATIN CAPITAL LETTER Y WITH DIAERESIS
];

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut dyn Decoder, src: &[u8]) -> String {
        let mut dst = String::new();
        let (read, _) = decoder.decode(src, &mut dst, true).unwrap();
        assert_eq!(read, src.len());
        dst
    }

    #[test]
    fn bom_detection() {
        let (d, skip) = detect_bom(&[0xEF, 0xBB, 0xBF, b'<']).unwrap();
        assert_eq!((d.name(), skip), (UTF8_NAME, 3));
        let (d, skip) = detect_bom(&[0xFE, 0xFF, 0x00, 0x3C]).unwrap();
        assert_eq!((d.name(), skip), (UTF16BE_NAME, 2));
        let (d, skip) = detect_bom(&[0xFF, 0xFE, 0x3C, 0x00]).unwrap();
        assert_eq!((d.name(), skip), (UTF16LE_NAME, 2));
        let (d, skip) = detect_bom(&[0x00, 0x00, 0x00, 0x3C]).unwrap();
        assert_eq!((d.name(), skip), (UCS4BE_NAME, 0));
        let (d, skip) = detect_bom(&[0x3C, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!((d.name(), skip), (UCS4LE_NAME, 0));
        let (d, skip) = detect_bom(&[0xFF, 0xFE, 0xFF, 0xFE]).unwrap();
        assert_eq!((d.name(), skip), (UCS4LE_NAME, 4));
        assert!(detect_bom(b"<html>").is_none());
    }

    #[test]
    fn utf8_partial_sequence_carryover() {
        let mut decoder = UTF8Decoder;
        let bytes = "é".as_bytes();
        let mut dst = String::new();
        // Only the leading byte: not an error until the stream finishes.
        let (read, write) = decoder.decode(&bytes[..1], &mut dst, false).unwrap();
        assert_eq!((read, write), (0, 0));
        assert!(decoder.decode(&bytes[..1], &mut dst, true).is_err());
        assert_eq!(decode_all(&mut decoder, bytes), "é");
    }

    #[test]
    fn ucs4_group_decoding() {
        let mut be = Ucs4BEDecoder::default();
        assert_eq!(
            decode_all(&mut be, &[0x00, 0x00, 0x00, 0x3C, 0x00, 0x01, 0xF6, 0x00]),
            "<\u{1F600}"
        );
        let mut le = Ucs4LEDecoder::default();
        assert_eq!(decode_all(&mut le, &[0x3C, 0x00, 0x00, 0x00]), "<");
    }

    #[test]
    fn ucs4_rejects_surrogates_and_overflow() {
        let mut be = Ucs4BEDecoder::default();
        let mut dst = String::new();
        assert!(matches!(
            be.decode(&[0x00, 0x00, 0xD8, 0x00], &mut dst, true),
            Err(DecodeError::InvalidCodepoint { value: 0xD800, .. })
        ));
        let mut be = Ucs4BEDecoder::default();
        assert!(matches!(
            be.decode(&[0x00, 0x11, 0x00, 0x00], &mut dst, true),
            Err(DecodeError::InvalidCodepoint { value: 0x110000, .. })
        ));
    }

    #[test]
    fn ucs4_incomplete_group_carryover() {
        let mut be = Ucs4BEDecoder::default();
        let mut dst = String::new();
        be.decode(&[0x00, 0x00], &mut dst, false).unwrap();
        be.decode(&[0x00, 0x3C], &mut dst, false).unwrap();
        assert_eq!(dst, "<");
    }

    #[test]
    fn utf16_surrogate_pairs() {
        let mut be = UTF16BEDecoder::default();
        assert_eq!(
            decode_all(&mut be, &[0xD8, 0x3D, 0xDE, 0x00]),
            "\u{1F600}"
        );
        let mut le = UTF16LEDecoder::default();
        assert_eq!(decode_all(&mut le, &[0x3C, 0x00]), "<");
        // An unpaired high surrogate at the end of the stream is malformed.
        let mut be = UTF16BEDecoder::default();
        let mut dst = String::new();
        assert!(be.decode(&[0xD8, 0x3D], &mut dst, true).is_err());
    }

    #[test]
    fn windows_1252_c1_range() {
        let mut decoder = Windows1252Decoder;
        assert_eq!(decode_all(&mut decoder, &[0x80, 0x93, 0x94]), "€“”");
        // Undefined positions pass through.
        assert_eq!(decode_all(&mut decoder, &[0x81]), "\u{81}");
    }

    #[test]
    fn decoder_lookup_aliases() {
        assert_eq!(find_decoder("utf-8").unwrap().name(), UTF8_NAME);
        assert_eq!(find_decoder("Latin1").unwrap().name(), ISO_8859_1_NAME);
        assert_eq!(find_decoder("windows-1252").unwrap().name(), WINDOWS_1252_NAME);
        assert_eq!(find_decoder("UTF-16LE").unwrap().name(), UTF16LE_NAME);
        assert!(find_decoder("EBCDIC").is_none());
    }
}
