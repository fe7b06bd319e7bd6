//! Tag/length/value scanning over ACR-NEMA and DICOM Part 10 streams.
//!
//! A [`ParserSession`] owns one open stream together with everything that
//! was negotiated for it (transfer syntax, byte order, VR encoding). Nothing
//! is shared between sessions, so separate files can be scanned on separate
//! threads.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use dicom::core::{Tag, VR};
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{self, ArchType};
use crate::enums::{LookupPass, TransferSyntax, ValueType};
use crate::sequence::{SequenceWalker, WalkEvent};
use crate::sequence_tags::is_sequence_tag;

pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
pub const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

const PREAMBLE_LEN: u64 = 128;
const MAGIC: &[u8; 4] = b"DICM";
const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
const META_GROUP: u16 = 0x0002;
const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Default byte budget for text values fetched through the convenience
/// readers.
pub const TEXT_LIMIT: u32 = 1024;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream ended early at offset {offset}")]
    ShortRead { offset: u64 },

    #[error("Cannot seek to offset {offset}")]
    SeekFailure { offset: u64 },

    #[error("Sequences nested deeper than {depth} levels")]
    SequenceDepthExceeded { depth: usize },

    #[error("Element {0} not found")]
    NotFound(Tag),

    #[error("Element {tag} has {length} bytes, more than the requested limit")]
    ValueTooLarge {
        tag: Tag,
        length: u32,
        truncated: Box<Decoded>,
    },
}

impl ReadError {
    /// Recovers the usable, truncated value of a `ValueTooLarge` failure.
    pub fn into_truncated(self) -> Result<Decoded, ReadError> {
        match self {
            ReadError::ValueTooLarge { truncated, .. } => Ok(*truncated),
            other => Err(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadError::NotFound(_))
    }
}

/// Header of one element as found in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub tag: Tag,
    /// `None` when the element was encoded with implicit VR.
    pub vr: Option<VR>,
    pub length: u32,
    /// Offset of the first header byte.
    pub offset: u64,
    /// Offset of the first value byte.
    pub value_offset: u64,
}

impl ElementHeader {
    pub fn is_undefined_length(&self) -> bool {
        self.length == UNDEFINED_LENGTH
    }

    /// Offset just past the value, when the length is defined.
    pub fn value_end(&self) -> Option<u64> {
        (!self.is_undefined_length()).then(|| self.value_offset + u64::from(self.length))
    }
}

/// A raw element: header fields plus value bytes in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub tag: Tag,
    pub vr: Option<VR>,
    pub length: u32,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Words(Vec<u16>),
    DoubleWords(Vec<u32>),
    Text(String),
}

impl ElementValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_words(&self) -> Option<&[u16]> {
        match self {
            ElementValue::Words(words) => Some(words),
            _ => None,
        }
    }

    pub fn as_double_words(&self) -> Option<&[u32]> {
        match self {
            ElementValue::DoubleWords(words) => Some(words),
            _ => None,
        }
    }
}

/// Outcome of a successful `get_element`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub tag: Tag,
    pub value: ElementValue,
    pub bytes_decoded: usize,
    /// Words read for `BI`/`BD`, non-blank backslash-separated values for
    /// text.
    pub items: usize,
    pub pass: LookupPass,
}

/// Controls the group-ordered scan and its exhaustive fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupPolicy {
    pub group_ordered_first: bool,
    pub exhaustive_fallback: bool,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            group_ordered_first: true,
            exhaustive_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Encoding {
    arch: ArchType,
    explicit_vr: bool,
}

/// What the pre-pass learned about a stream's framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    pub transfer_syntax: TransferSyntax,
    pub transfer_syntax_uid: Option<String>,
    pub arch: ArchType,
    pub explicit_vr: bool,
    /// First byte of the File Meta group, when the stream has one.
    pub meta_start: Option<u64>,
    pub data_set_start: u64,
}

/// Reads the Part 10 header, if any, and settles how the data set is
/// encoded. The stream position afterwards is unspecified; sessions seek
/// explicitly before every scan.
pub fn detect_transfer_syntax<R: Read + Seek>(
    stream: &mut R,
    legacy_arch: ArchType,
) -> Result<StreamLayout, ReadError> {
    let legacy = StreamLayout {
        transfer_syntax: TransferSyntax::Legacy,
        transfer_syntax_uid: None,
        arch: legacy_arch,
        explicit_vr: false,
        meta_start: None,
        data_set_start: 0,
    };

    stream
        .seek(SeekFrom::Start(PREAMBLE_LEN))
        .map_err(|_| ReadError::SeekFailure {
            offset: PREAMBLE_LEN,
        })?;
    let mut magic = [0u8; 4];
    if read_up_to(stream, &mut magic)? < magic.len() || &magic != MAGIC {
        return Ok(legacy);
    }

    let meta_start = PREAMBLE_LEN + MAGIC.len() as u64;
    let mut cursor = Cursor {
        stream,
        pos: meta_start,
    };
    let meta = Encoding {
        arch: ArchType::LITTLE_ENDIAN,
        explicit_vr: true,
    };

    let mut uid = None;
    let data_set_start = loop {
        let Some(header) = cursor.next_header(meta)? else {
            break cursor.pos;
        };
        if header.tag.0 != META_GROUP {
            break header.offset;
        }
        if header.tag == TRANSFER_SYNTAX_UID {
            let bytes = cursor.read_value(&header, header.length, meta.arch)?;
            uid = Some(text_from_bytes(&bytes));
        } else {
            cursor.skip_value(&header)?;
        }
    };

    let layout = match uid {
        Some(uid) => {
            let transfer_syntax = TransferSyntax::from_uid(&uid);
            let arch = match transfer_syntax {
                TransferSyntax::ExplicitVrBigEndian => ArchType::BIG_ENDIAN,
                _ => ArchType::LITTLE_ENDIAN,
            };
            StreamLayout {
                transfer_syntax,
                transfer_syntax_uid: Some(uid),
                arch,
                explicit_vr: transfer_syntax.is_explicit_vr(),
                meta_start: Some(meta_start),
                data_set_start,
            }
        }
        None => {
            debug!("file meta group carries no transfer syntax, reading as implicit VR");
            StreamLayout {
                meta_start: Some(meta_start),
                data_set_start,
                ..legacy
            }
        }
    };
    Ok(layout)
}

/// One open stream and its negotiated encoding.
pub struct ParserSession<R> {
    stream: R,
    pos: u64,
    layout: StreamLayout,
    policy: LookupPolicy,
    fallback_count: usize,
}

impl ParserSession<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        Self::open_with(path, ArchType::default(), LookupPolicy::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        legacy_arch: ArchType,
        policy: LookupPolicy,
    ) -> Result<Self, ReadError> {
        let file = File::open(path.as_ref())?;
        Self::with_options(BufReader::new(file), legacy_arch, policy)
    }
}

impl<R: Read + Seek> ParserSession<R> {
    pub fn new(stream: R) -> Result<Self, ReadError> {
        Self::with_options(stream, ArchType::default(), LookupPolicy::default())
    }

    pub fn with_options(
        mut stream: R,
        legacy_arch: ArchType,
        policy: LookupPolicy,
    ) -> Result<Self, ReadError> {
        let layout = detect_transfer_syntax(&mut stream, legacy_arch)?;
        debug!(
            transfer_syntax = ?layout.transfer_syntax,
            data_set_start = layout.data_set_start,
            "opened session"
        );
        let pos = layout.data_set_start;
        stream
            .seek(SeekFrom::Start(pos))
            .map_err(|_| ReadError::SeekFailure { offset: pos })?;
        Ok(Self {
            stream,
            pos,
            layout,
            policy,
            fallback_count: 0,
        })
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    pub fn arch(&self) -> ArchType {
        self.layout.arch
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Lookups that only succeeded on the exhaustive pass.
    pub fn fallback_count(&self) -> usize {
        self.fallback_count
    }

    pub fn set_policy(&mut self, policy: LookupPolicy) {
        self.policy = policy;
    }

    fn data_set_encoding(&self) -> Encoding {
        Encoding {
            arch: self.layout.arch,
            explicit_vr: self.layout.explicit_vr,
        }
    }

    fn cursor(&mut self) -> Cursor<'_, R> {
        Cursor {
            stream: &mut self.stream,
            pos: self.pos,
        }
    }

    fn with_cursor<T>(
        &mut self,
        f: impl FnOnce(&mut Cursor<'_, R>) -> Result<T, ReadError>,
    ) -> Result<T, ReadError> {
        let mut cursor = Cursor {
            stream: &mut self.stream,
            pos: self.pos,
        };
        let result = f(&mut cursor);
        self.pos = cursor.pos;
        result
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), ReadError> {
        let mut cursor = self.cursor();
        cursor.seek_to(offset)?;
        self.pos = offset;
        Ok(())
    }

    /// Reads the data-set element header at the current position.
    pub fn next_header(&mut self) -> Result<Option<ElementHeader>, ReadError> {
        let encoding = self.data_set_encoding();
        self.with_cursor(|cursor| cursor.next_header(encoding))
    }

    pub fn skip_value(&mut self, header: &ElementHeader) -> Result<(), ReadError> {
        self.with_cursor(|cursor| cursor.skip_value(header))
    }

    /// Fills `buffer` with as much of the value of `header` as fits and
    /// returns the count read. The position ends past the whole value.
    pub fn read_value_into(
        &mut self,
        header: &ElementHeader,
        buffer: &mut [u8],
    ) -> Result<usize, ReadError> {
        let arch = self.layout.arch;
        self.with_cursor(|cursor| {
            let wanted = (header.length as usize).min(buffer.len());
            let offset = cursor.pos;
            codec::read_exact(cursor.stream, &mut buffer[..wanted], offset)?;
            cursor.pos += wanted as u64;
            if arch.swapped_text {
                codec::swap_text_pairs(&mut buffer[..wanted]);
            }
            if let Some(end) = header.value_end() {
                cursor.seek_to(end)?;
            }
            Ok(wanted)
        })
    }

    /// Reads the value of `header` as text, capped at `limit` bytes.
    pub fn read_value_text(
        &mut self,
        header: &ElementHeader,
        limit: u32,
    ) -> Result<String, ReadError> {
        let arch = self.layout.arch;
        let bytes = self.with_cursor(|cursor| {
            let bytes = cursor.read_value(header, limit, arch)?;
            if let Some(end) = header.value_end() {
                cursor.seek_to(end)?;
            }
            Ok(bytes)
        })?;
        Ok(text_from_bytes(&bytes))
    }

    /// Positions the stream at the value of the first top-level `tag`, or
    /// of the first nested one when only the exhaustive pass finds it
    /// inside a sequence.
    ///
    /// Runs the group-ordered pass, then the exhaustive pass if the policy
    /// allows it and the first pass came back with `NotFound`.
    pub fn find_element(&mut self, tag: Tag) -> Result<(ElementHeader, LookupPass), ReadError> {
        if !self.policy.group_ordered_first {
            return self
                .scan_for(tag, LookupPass::Exhaustive)
                .map(|header| (header, LookupPass::Exhaustive));
        }

        let fast = self.scan_for(tag, LookupPass::GroupOrdered);
        match fast {
            Ok(header) => Ok((header, LookupPass::GroupOrdered)),
            Err(err) if !err.is_not_found() || !self.policy.exhaustive_fallback => Err(err),
            Err(err) => {
                let header = self.scan_for(tag, LookupPass::Exhaustive).map_err(|retry| {
                    debug!(%tag, first = %err, "exhaustive pass failed too");
                    retry
                })?;
                self.fallback_count += 1;
                debug!(%tag, "element found only by the exhaustive pass");
                Ok((header, LookupPass::Exhaustive))
            }
        }
    }

    /// Group-ordered scans stay at the top level. Exhaustive scans also
    /// descend into sequence items and fall back to the first nested
    /// match when no top-level element carries `tag`.
    fn scan_for(&mut self, tag: Tag, pass: LookupPass) -> Result<ElementHeader, ReadError> {
        let in_meta = tag.0 == META_GROUP && self.layout.meta_start.is_some();
        let (start, encoding) = match self.layout.meta_start {
            Some(meta_start) if in_meta => (
                meta_start,
                Encoding {
                    arch: ArchType::LITTLE_ENDIAN,
                    explicit_vr: true,
                },
            ),
            _ => (self.layout.data_set_start, self.data_set_encoding()),
        };
        let descend = pass == LookupPass::Exhaustive && !in_meta;
        self.seek_to(start)?;

        self.with_cursor(|cursor| {
            let mut walker = SequenceWalker::new();
            let mut nested: Option<ElementHeader> = None;
            // Depth of an open encapsulated value whose items are fragments.
            let mut fragments: Option<usize> = None;
            loop {
                walker.unwind(cursor.pos);
                if fragments.is_some_and(|depth| walker.depth() < depth) {
                    fragments = None;
                }
                let Some(header) = cursor.next_header(encoding)? else {
                    return match nested {
                        Some(header) => {
                            debug!(%tag, offset = header.offset, "only a nested element matched");
                            cursor.seek_to(header.value_offset)?;
                            Ok(header)
                        }
                        None => Err(ReadError::NotFound(tag)),
                    };
                };
                if in_meta && header.tag.0 != META_GROUP {
                    return Err(ReadError::NotFound(tag));
                }
                if walker.depth() == 0 {
                    if pass == LookupPass::GroupOrdered && header.tag.0 > tag.0 {
                        return Err(ReadError::NotFound(tag));
                    }
                    if header.tag == tag {
                        return Ok(header);
                    }
                } else if descend && header.tag == tag && nested.is_none() {
                    nested = Some(header);
                }
                match walker.observe(&header)? {
                    WalkEvent::SequenceStart { depth } => {
                        if is_encapsulated(&header) {
                            fragments.get_or_insert(depth);
                        }
                        if let Some(end) = header.value_end() {
                            if !descend {
                                walker.leave();
                                cursor.seek_to(end)?;
                            }
                        }
                    }
                    WalkEvent::ItemStart { depth } => {
                        let opaque = !descend || depth == 0 || fragments == Some(depth);
                        if let Some(end) = header.value_end().filter(|_| opaque) {
                            cursor.seek_to(end)?;
                        }
                    }
                    WalkEvent::Element { .. } => cursor.skip_value(&header)?,
                    WalkEvent::ItemEnd { .. } | WalkEvent::SequenceEnd { .. } => {}
                }
            }
        })
    }

    /// Finds `tag` and decodes its value as `value_type`, reading at most
    /// `max_len` value bytes.
    pub fn get_element(
        &mut self,
        tag: Tag,
        value_type: ValueType,
        max_len: u32,
    ) -> Result<Decoded, ReadError> {
        let (header, pass) = self.find_element(tag)?;
        let arch = if header.tag.0 == META_GROUP && self.layout.meta_start.is_some() {
            ArchType::LITTLE_ENDIAN
        } else {
            self.layout.arch
        };
        self.with_cursor(|cursor| decode_value(cursor, &header, value_type, max_len, arch, pass))
    }

    /// Text of `tag`; an over-long value is truncated to [`TEXT_LIMIT`].
    pub fn read_text(&mut self, tag: Tag) -> Result<String, ReadError> {
        let decoded = match self.get_element(tag, ValueType::AT, TEXT_LIMIT) {
            Err(err @ ReadError::ValueTooLarge { .. }) => {
                warn!(%tag, "text value truncated");
                err.into_truncated()?
            }
            other => other?,
        };
        match decoded.value {
            ElementValue::Text(text) => Ok(text),
            _ => Err(ReadError::NotFound(tag)),
        }
    }

    /// Up to `count` numbers from the backslash-separated text of `tag`.
    pub fn read_floats(&mut self, tag: Tag, count: usize) -> Result<Vec<f32>, ReadError> {
        let text = self.read_text(tag)?;
        Ok(extract_floats(&text, count))
    }

    /// First number of `tag`; an empty or non-numeric value counts as
    /// missing.
    pub fn read_float(&mut self, tag: Tag) -> Result<f32, ReadError> {
        let text = self.read_text(tag)?;
        text.split('\\')
            .next()
            .and_then(leading_float)
            .ok_or(ReadError::NotFound(tag))
    }

    /// First binary 16-bit word of `tag`.
    pub fn read_u16(&mut self, tag: Tag) -> Result<u16, ReadError> {
        let decoded = match self.get_element(tag, ValueType::BI, 2) {
            Err(err @ ReadError::ValueTooLarge { .. }) => err.into_truncated()?,
            other => other?,
        };
        decoded
            .value
            .as_words()
            .and_then(|words| words.first().copied())
            .ok_or(ReadError::NotFound(tag))
    }

    /// Raw bytes of `tag`, at most `max_len` of them.
    pub fn read_data_element(&mut self, tag: Tag, max_len: u32) -> Result<DataElement, ReadError> {
        let (header, _) = self.find_element(tag)?;
        let arch = self.layout.arch;
        let value = self.with_cursor(|cursor| cursor.read_value(&header, max_len, arch))?;
        Ok(DataElement {
            tag: header.tag,
            vr: header.vr,
            length: header.length,
            value,
        })
    }

    /// Every top-level data-set element, nested content skipped, values
    /// capped at `max_len` bytes.
    pub fn top_level_elements(&mut self, max_len: u32) -> Result<Vec<DataElement>, ReadError> {
        let start = self.layout.data_set_start;
        let encoding = self.data_set_encoding();
        self.seek_to(start)?;
        self.with_cursor(|cursor| {
            let mut walker = SequenceWalker::new();
            let mut elements = Vec::new();
            loop {
                walker.unwind(cursor.pos);
                let Some(header) = cursor.next_header(encoding)? else {
                    return Ok(elements);
                };
                let depth = walker.depth();
                match walker.observe(&header)? {
                    WalkEvent::SequenceStart { .. } => {
                        if depth == 0 {
                            elements.push(DataElement {
                                tag: header.tag,
                                vr: header.vr,
                                length: header.length,
                                value: Vec::new(),
                            });
                        }
                        if let Some(end) = header.value_end() {
                            walker.leave();
                            cursor.seek_to(end)?;
                        }
                    }
                    WalkEvent::ItemStart { .. } => {
                        if let Some(end) = header.value_end() {
                            cursor.seek_to(end)?;
                        }
                    }
                    WalkEvent::Element { depth: 0 } => {
                        let value = cursor.read_value(&header, max_len, encoding.arch)?;
                        if let Some(end) = header.value_end() {
                            cursor.seek_to(end)?;
                        }
                        elements.push(DataElement {
                            tag: header.tag,
                            vr: header.vr,
                            length: header.length,
                            value,
                        });
                    }
                    WalkEvent::Element { .. } => cursor.skip_value(&header)?,
                    WalkEvent::ItemEnd { .. } | WalkEvent::SequenceEnd { .. } => {}
                }
            }
        })
    }
}

/// Position-tracking view over a stream.
struct Cursor<'a, R> {
    stream: &'a mut R,
    pos: u64,
}

impl<R: Read + Seek> Cursor<'_, R> {
    fn seek_to(&mut self, offset: u64) -> Result<(), ReadError> {
        if offset == self.pos {
            return Ok(());
        }
        self.stream
            .seek(SeekFrom::Start(offset))
            .map_err(|_| ReadError::SeekFailure { offset })?;
        self.pos = offset;
        Ok(())
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), ReadError> {
        codec::read_exact(self.stream, buffer, self.pos)?;
        self.pos += buffer.len() as u64;
        Ok(())
    }

    fn read_u16(&mut self, arch: ArchType) -> Result<u16, ReadError> {
        let value = codec::read_u16(self.stream, arch, self.pos)?;
        self.pos += 2;
        Ok(value)
    }

    fn read_u32(&mut self, arch: ArchType) -> Result<u32, ReadError> {
        let value = codec::read_u32(self.stream, arch, self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    fn skip_value(&mut self, header: &ElementHeader) -> Result<(), ReadError> {
        match header.value_end() {
            Some(end) => self.seek_to(end),
            None => Ok(()),
        }
    }

    /// `None` at a clean end of stream.
    fn next_header(&mut self, encoding: Encoding) -> Result<Option<ElementHeader>, ReadError> {
        let offset = self.pos;
        let mut raw_group = [0u8; 2];
        match read_up_to(self.stream, &mut raw_group)? {
            0 => return Ok(None),
            2 => self.pos += 2,
            _ => return Err(ReadError::ShortRead { offset }),
        }
        let group = encoding.arch.decode_u16(raw_group);
        let element = self.read_u16(encoding.arch)?;
        let tag = Tag(group, element);

        let vr = self.probe_vr(tag, encoding.explicit_vr)?;
        let length = match vr {
            Some(_) if element == 0 => {
                self.seek_to(self.pos + 2)?;
                4
            }
            Some(vr) if has_long_length(vr) => {
                self.seek_to(self.pos + 2)?;
                self.read_u32(encoding.arch)?
            }
            Some(_) => u32::from(self.read_u16(encoding.arch)?),
            None => self.read_u32(encoding.arch)?,
        };

        Ok(Some(ElementHeader {
            tag,
            vr,
            length,
            offset,
            value_offset: self.pos,
        }))
    }

    /// Reads the two bytes a VR would occupy and keeps them only when they
    /// are plausible here; otherwise rewinds so the element is read as
    /// implicit VR.
    fn probe_vr(&mut self, tag: Tag, explicit_vr: bool) -> Result<Option<VR>, ReadError> {
        if tag.0 == 0xFFFE {
            return Ok(None);
        }
        let mut code = [0u8; 2];
        self.read_exact(&mut code)?;
        let vr = if explicit_vr {
            VR::from_binary(code)
        } else if &code == b"SQ" && is_sequence_tag(tag) {
            // legacy writers spell out SQ even under implicit VR
            Some(VR::SQ)
        } else {
            None
        };
        if vr.is_none() {
            self.seek_to(self.pos - 2)?;
        }
        Ok(vr)
    }

    fn read_value(
        &mut self,
        header: &ElementHeader,
        limit: u32,
        arch: ArchType,
    ) -> Result<Vec<u8>, ReadError> {
        if header.is_undefined_length() {
            return Ok(Vec::new());
        }
        let mut value = vec![0u8; header.length.min(limit) as usize];
        self.read_exact(&mut value)?;
        if arch.swapped_text {
            codec::swap_text_pairs(&mut value);
        }
        Ok(value)
    }
}

/// Undefined-length values that are not sequences hold fragment items,
/// as encapsulated Pixel Data does.
fn is_encapsulated(header: &ElementHeader) -> bool {
    header.tag == PIXEL_DATA || matches!(header.vr, Some(vr) if vr != VR::SQ && vr != VR::UN)
}

fn has_long_length(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OD
            | VR::OF
            | VR::OL
            | VR::OV
            | VR::OW
            | VR::SQ
            | VR::SV
            | VR::UC
            | VR::UN
            | VR::UR
            | VR::UT
            | VR::UV
    )
}

fn decode_value<R: Read + Seek>(
    cursor: &mut Cursor<'_, R>,
    header: &ElementHeader,
    value_type: ValueType,
    max_len: u32,
    arch: ArchType,
    pass: LookupPass,
) -> Result<Decoded, ReadError> {
    let tag = header.tag;
    let too_large = |decoded: Decoded| ReadError::ValueTooLarge {
        tag,
        length: header.length,
        truncated: Box::new(decoded),
    };

    if header.is_undefined_length() {
        let value = match value_type {
            ValueType::BI => ElementValue::Words(Vec::new()),
            ValueType::BD => ElementValue::DoubleWords(Vec::new()),
            ValueType::AN | ValueType::AT => ElementValue::Text(String::new()),
        };
        return Err(too_large(Decoded {
            tag,
            value,
            bytes_decoded: 0,
            items: 0,
            pass,
        }));
    }

    let readable = header.length.min(max_len);
    let decoded = match value_type {
        ValueType::BI => {
            let count = readable as usize / 2;
            let mut words = Vec::with_capacity(count);
            for _ in 0..count {
                words.push(cursor.read_u16(arch)?);
            }
            Decoded {
                tag,
                bytes_decoded: count * 2,
                items: count,
                value: ElementValue::Words(words),
                pass,
            }
        }
        ValueType::BD => {
            let count = readable as usize / 4;
            let mut words = Vec::with_capacity(count);
            for _ in 0..count {
                words.push(cursor.read_u32(arch)?);
            }
            Decoded {
                tag,
                bytes_decoded: count * 4,
                items: count,
                value: ElementValue::DoubleWords(words),
                pass,
            }
        }
        ValueType::AN | ValueType::AT => {
            let bytes = cursor.read_value(header, readable, arch)?;
            let text = text_from_bytes(&bytes);
            Decoded {
                tag,
                bytes_decoded: bytes.len(),
                items: count_items(&text),
                value: ElementValue::Text(text),
                pass,
            }
        }
    };

    if header.length > max_len {
        return Err(too_large(decoded));
    }
    Ok(decoded)
}

/// ASCII text up to the first NUL, surrounding blanks removed.
fn text_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// Non-blank backslash-separated values.
fn count_items(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.split('\\')
        .filter(|value| !value.trim().is_empty())
        .count()
}

/// Parses up to `count` numbers from backslash-separated text. A value
/// that does not start with a finite number reads as zero.
pub fn extract_floats(text: &str, count: usize) -> Vec<f32> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split('\\')
        .take(count)
        .map(|value| leading_float(value).unwrap_or(0.0))
        .collect()
}

/// Longest numeric prefix of `value`. NaN, infinities and overflowing
/// exponents are rejected.
fn leading_float(value: &str) -> Option<f32> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map_or(value.len(), |(index, _)| index);
    (1..=end)
        .rev()
        .find_map(|len| value[..len].parse::<f32>().ok())
        .filter(|parsed| parsed.is_finite())
}

/// `atoi`-style integer prefix; anything else reads as zero.
pub fn leading_int(value: &str) -> i64 {
    let value = value.trim();
    let sign_len = usize::from(value.starts_with(['+', '-']));
    let digits = value[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    value[..sign_len + digits].parse().unwrap_or(0)
}

fn read_up_to<R: Read>(stream: &mut R, buffer: &mut [u8]) -> Result<usize, ReadError> {
    let mut filled = 0;
    while filled < buffer.len() {
        match stream.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(ReadError::Io(err)),
        }
    }
    Ok(filled)
}
