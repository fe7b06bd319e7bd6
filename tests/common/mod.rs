//! Minimal data-set writer for building test files.
#![allow(dead_code)]

use dicom::core::Tag;
use dicom_dictionary_std::uids;
use std::path::{Path, PathBuf};

const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);
const UNDEFINED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    ExplicitLe,
    ImplicitLe,
    ExplicitBe,
    /// No preamble or meta group; implicit VR, big-endian.
    LegacyBe,
}

impl Syntax {
    pub const PART10: [Syntax; 3] = [Syntax::ExplicitLe, Syntax::ImplicitLe, Syntax::ExplicitBe];

    fn uid(self) -> Option<&'static str> {
        match self {
            Syntax::ExplicitLe => Some(uids::EXPLICIT_VR_LITTLE_ENDIAN),
            Syntax::ImplicitLe => Some(uids::IMPLICIT_VR_LITTLE_ENDIAN),
            Syntax::ExplicitBe => Some(uids::EXPLICIT_VR_BIG_ENDIAN),
            Syntax::LegacyBe => None,
        }
    }

    fn explicit(self) -> bool {
        matches!(self, Syntax::ExplicitLe | Syntax::ExplicitBe)
    }

    fn big_endian(self) -> bool {
        matches!(self, Syntax::ExplicitBe | Syntax::LegacyBe)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Bytes(Vec<u8>),
    U16(u16),
    Sequence {
        items: Vec<Vec<Element>>,
        undefined: bool,
    },
    /// Undefined-length value of defined-length fragment items.
    Fragments(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: Tag,
    pub vr: [u8; 2],
    pub value: Value,
}

/// Text value padded to even length, with NUL for UI and blank otherwise.
pub fn text(tag: Tag, vr: &str, value: &str) -> Element {
    let vr: [u8; 2] = vr.as_bytes().try_into().expect("two-letter VR");
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(if &vr == b"UI" { 0 } else { b' ' });
    }
    Element {
        tag,
        vr,
        value: Value::Bytes(bytes),
    }
}

pub fn us(tag: Tag, value: u16) -> Element {
    Element {
        tag,
        vr: *b"US",
        value: Value::U16(value),
    }
}

pub fn sequence(tag: Tag, items: Vec<Vec<Element>>, undefined: bool) -> Element {
    Element {
        tag,
        vr: *b"SQ",
        value: Value::Sequence { items, undefined },
    }
}

pub fn encapsulated(tag: Tag, fragments: Vec<Vec<u8>>) -> Element {
    Element {
        tag,
        vr: *b"OB",
        value: Value::Fragments(fragments),
    }
}

/// Numbers joined with backslashes, as DS text.
pub fn decimals(tag: Tag, values: &[f32]) -> Element {
    let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    text(tag, "DS", &joined.join("\\"))
}

struct Writer {
    syntax: Syntax,
    out: Vec<u8>,
}

impl Writer {
    fn u16(&mut self, value: u16) {
        if self.syntax.big_endian() {
            self.out.extend(value.to_be_bytes());
        } else {
            self.out.extend(value.to_le_bytes());
        }
    }

    fn u32(&mut self, value: u32) {
        if self.syntax.big_endian() {
            self.out.extend(value.to_be_bytes());
        } else {
            self.out.extend(value.to_le_bytes());
        }
    }

    fn tag(&mut self, tag: Tag) {
        self.u16(tag.0);
        self.u16(tag.1);
    }

    fn header(&mut self, element: &Element, length: u32) {
        self.tag(element.tag);
        if !self.syntax.explicit() {
            self.u32(length);
            return;
        }
        self.out.extend(element.vr);
        let long = matches!(
            &element.vr,
            b"OB" | b"OD" | b"OF" | b"OL" | b"OW" | b"SQ" | b"UN" | b"UT"
        );
        if long {
            self.out.extend([0, 0]);
            self.u32(length);
        } else {
            self.u16(length as u16);
        }
    }

    fn element(&mut self, element: &Element) {
        match &element.value {
            Value::Bytes(bytes) => {
                self.header(element, bytes.len() as u32);
                self.out.extend(bytes);
            }
            Value::U16(value) => {
                self.header(element, 2);
                self.u16(*value);
            }
            Value::Sequence { items, undefined } => {
                let body = self.items(items, *undefined);
                if *undefined {
                    self.header(element, UNDEFINED);
                    self.out.extend(body);
                    self.tag(SEQUENCE_DELIMITATION);
                    self.u32(0);
                } else {
                    self.header(element, body.len() as u32);
                    self.out.extend(body);
                }
            }
            Value::Fragments(fragments) => {
                self.header(element, UNDEFINED);
                for fragment in fragments {
                    self.tag(ITEM);
                    self.u32(fragment.len() as u32);
                    self.out.extend(fragment);
                }
                self.tag(SEQUENCE_DELIMITATION);
                self.u32(0);
            }
        }
    }

    fn items(&self, items: &[Vec<Element>], undefined: bool) -> Vec<u8> {
        let mut writer = Writer {
            syntax: self.syntax,
            out: Vec::new(),
        };
        for item in items {
            let content = data_set(self.syntax, item);
            writer.tag(ITEM);
            if undefined {
                writer.u32(UNDEFINED);
                writer.out.extend(content);
                writer.tag(ITEM_DELIMITATION);
                writer.u32(0);
            } else {
                writer.u32(content.len() as u32);
                writer.out.extend(content);
            }
        }
        writer.out
    }
}

/// Encodes `elements` in the order given.
pub fn data_set(syntax: Syntax, elements: &[Element]) -> Vec<u8> {
    let mut writer = Writer {
        syntax,
        out: Vec::new(),
    };
    for element in elements {
        writer.element(element);
    }
    writer.out
}

/// A complete file: preamble, meta group and data set for Part 10 syntaxes,
/// the bare data set for legacy ones.
pub fn file(syntax: Syntax, elements: &[Element]) -> Vec<u8> {
    let body = data_set(syntax, elements);
    let Some(uid) = syntax.uid() else {
        return body;
    };

    let meta_elements = [text(Tag(0x0002, 0x0010), "UI", uid)];
    let meta = data_set(Syntax::ExplicitLe, &meta_elements);
    let mut out = vec![0u8; 128];
    out.extend(b"DICM");
    out.extend(0x0002u16.to_le_bytes());
    out.extend(0x0000u16.to_le_bytes());
    out.extend(b"UL");
    out.extend(4u16.to_le_bytes());
    out.extend((meta.len() as u32).to_le_bytes());
    out.extend(meta);
    out.extend(body);
    out
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("fixture should be written");
    path
}
