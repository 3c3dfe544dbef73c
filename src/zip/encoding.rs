//! Legacy text encodings for entry names and comments.
//!
//! Names without the UTF-8 flag (bit 11) are, by convention, IBM code page
//! 437. Archives from other locales frequently use the system code page
//! instead, so any WHATWG encoding label is accepted as an override.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::Encoding;

/// Characters for bytes 0x80-0xFF in code page 437.
const CP437_HIGH: [char; 128] = [
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}',
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}',
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}',
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00A2}', '\u{00A3}', '\u{00A5}', '\u{20A7}', '\u{0192}',
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}',
    '\u{00BF}', '\u{2310}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255D}', '\u{255C}', '\u{255B}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252C}', '\u{251C}', '\u{2500}', '\u{253C}', '\u{255E}', '\u{255F}',
    '\u{255A}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256C}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256B}',
    '\u{256A}', '\u{2518}', '\u{250C}', '\u{2588}', '\u{2584}', '\u{258C}', '\u{2590}', '\u{2580}',
    '\u{03B1}', '\u{00DF}', '\u{0393}', '\u{03C0}', '\u{03A3}', '\u{03C3}', '\u{00B5}', '\u{03C4}',
    '\u{03A6}', '\u{0398}', '\u{03A9}', '\u{03B4}', '\u{221E}', '\u{03C6}', '\u{03B5}', '\u{2229}',
    '\u{2261}', '\u{00B1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00F7}', '\u{2248}',
    '\u{00B0}', '\u{2219}', '\u{00B7}', '\u{221A}', '\u{207F}', '\u{00B2}', '\u{25A0}', '\u{00A0}',
];

/// How bytes of a name or comment without the UTF-8 flag are interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Cp437,
    Other(&'static Encoding),
}

impl TextEncoding {
    /// Look up an encoding by label. `cp437`, `ibm437` and `437` select the
    /// built-in table; anything else goes through the WHATWG label registry.
    pub fn for_label(label: &str) -> Option<Self> {
        let trimmed = label.trim();
        if ["cp437", "ibm437", "437"]
            .iter()
            .any(|l| trimmed.eq_ignore_ascii_case(l))
        {
            return Some(TextEncoding::Cp437);
        }
        Encoding::for_label(trimmed.as_bytes()).map(TextEncoding::Other)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Cp437 => "IBM437",
            TextEncoding::Other(encoding) => encoding.name(),
        }
    }

    /// Decode raw name or comment bytes. Unmappable input is replaced, never rejected.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            TextEncoding::Cp437 => {
                if bytes.is_ascii() {
                    // ASCII is valid UTF-8
                    Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
                } else {
                    Cow::Owned(bytes.iter().map(|&b| cp437_char(b)).collect())
                }
            }
            TextEncoding::Other(encoding) => encoding.decode_without_bom_handling(bytes).0,
        }
    }

    /// Encode text for writing. Characters without a mapping become `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            TextEncoding::Cp437 => {
                if text.is_ascii() {
                    Cow::Borrowed(text.as_bytes())
                } else {
                    Cow::Owned(text.chars().map(cp437_byte).collect())
                }
            }
            TextEncoding::Other(encoding) => {
                let (bytes, _, _) = encoding.encode(text);
                bytes
            }
        }
    }
}

impl fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextEncoding({})", self.name())
    }
}

fn cp437_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

fn cp437_byte(ch: char) -> u8 {
    if ch.is_ascii() {
        return ch as u8;
    }
    CP437_HIGH
        .iter()
        .position(|&c| c == ch)
        .map(|i| 0x80 + i as u8)
        .unwrap_or(b'?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_high_half() {
        let enc = TextEncoding::Cp437;
        assert_eq!(enc.decode(b"caf\x82.txt"), "café.txt");
        assert_eq!(enc.decode(&[0xC9, 0xCD, 0xBB]), "╔═╗");
        assert_eq!(enc.encode("café.txt").as_ref(), b"caf\x82.txt");
        assert_eq!(enc.encode("日本").as_ref(), b"??");
    }

    #[test]
    fn ascii_is_borrowed() {
        assert!(matches!(TextEncoding::Cp437.decode(b"plain/name.txt"), Cow::Borrowed(_)));
    }

    #[test]
    fn labels() {
        assert_eq!(TextEncoding::for_label("IBM437"), Some(TextEncoding::Cp437));
        let sjis = TextEncoding::for_label("shift_jis").unwrap();
        assert_eq!(sjis.name(), "Shift_JIS");
        assert_eq!(sjis.decode(b"\x93\xfa\x96\x7b"), "日本");
        assert!(TextEncoding::for_label("no-such-encoding").is_none());
    }
}
