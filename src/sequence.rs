//! Bookkeeping for nested sequences and items during a linear scan.

use dicom::core::VR;

use crate::reader::{ElementHeader, ITEM, ITEM_DELIMITATION, ReadError, SEQUENCE_DELIMITATION};
use crate::sequence_tags::is_sequence_tag;

/// Deepest nesting accepted before the stream is considered corrupt.
pub const MAX_SEQUENCE_DEPTH: usize = 99;

/// One open sequence. `None` ends are delimited by tags instead of lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceFrame {
    pub sequence_end: Option<u64>,
    pub item_end: Option<u64>,
}

/// What an element header means for the nesting structure. Depths count
/// open sequences; top-level elements sit at depth 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEvent {
    /// A sequence was opened and is now at `depth`.
    SequenceStart { depth: usize },
    /// The sequence at `depth` was closed.
    SequenceEnd { depth: usize },
    ItemStart { depth: usize },
    ItemEnd { depth: usize },
    Element { depth: usize },
}

#[derive(Debug, Default)]
pub struct SequenceWalker {
    frames: Vec<SequenceFrame>,
}

impl SequenceWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts inside a sequence whose header has just been read.
    pub fn within(header: &ElementHeader) -> Self {
        Self {
            frames: vec![SequenceFrame {
                sequence_end: header.value_end(),
                item_end: None,
            }],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self) -> Option<&SequenceFrame> {
        self.frames.last()
    }

    /// Drops the innermost frame without reporting it, for callers that
    /// skip a defined-length sequence in one seek.
    pub fn leave(&mut self) {
        self.frames.pop();
    }

    /// Closes every item and sequence whose recorded end lies at or before
    /// `offset`, innermost first.
    pub fn unwind(&mut self, offset: u64) -> Vec<WalkEvent> {
        let mut events = Vec::new();
        loop {
            let depth = self.frames.len();
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            if frame.item_end.is_some_and(|end| offset >= end) {
                frame.item_end = None;
                events.push(WalkEvent::ItemEnd { depth });
            } else if frame.sequence_end.is_some_and(|end| offset >= end) {
                self.frames.pop();
                events.push(WalkEvent::SequenceEnd { depth });
            } else {
                break;
            }
        }
        events
    }

    /// Classifies `header` and updates the frame stack. The caller decides
    /// whether to skip or read the value.
    pub fn observe(&mut self, header: &ElementHeader) -> Result<WalkEvent, ReadError> {
        let depth = self.depth();
        if header.tag == SEQUENCE_DELIMITATION {
            if self.frames.pop().is_some() {
                return Ok(WalkEvent::SequenceEnd { depth });
            }
            return Ok(WalkEvent::Element { depth });
        }
        if header.tag == ITEM_DELIMITATION {
            if let Some(frame) = self.frames.last_mut() {
                frame.item_end = None;
            }
            return Ok(WalkEvent::ItemEnd { depth });
        }
        if header.tag == ITEM {
            if let Some(frame) = self.frames.last_mut() {
                frame.item_end = header.value_end();
            }
            return Ok(WalkEvent::ItemStart { depth });
        }
        if opens_sequence(header) {
            if depth >= MAX_SEQUENCE_DEPTH {
                return Err(ReadError::SequenceDepthExceeded {
                    depth: MAX_SEQUENCE_DEPTH,
                });
            }
            self.frames.push(SequenceFrame {
                sequence_end: header.value_end(),
                item_end: None,
            });
            return Ok(WalkEvent::SequenceStart { depth: depth + 1 });
        }
        Ok(WalkEvent::Element { depth })
    }
}

/// Undefined-length values are always item containers (sequences and
/// encapsulated pixel data alike). Otherwise an explicit VR decides, and
/// the standard dictionary covers implicit VR.
fn opens_sequence(header: &ElementHeader) -> bool {
    if header.is_undefined_length() {
        return true;
    }
    match header.vr {
        Some(VR::SQ) => true,
        Some(VR::UN) | None => is_sequence_tag(header.tag),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::UNDEFINED_LENGTH;
    use dicom::core::Tag;

    fn header(tag: Tag, vr: Option<VR>, length: u32, value_offset: u64) -> ElementHeader {
        ElementHeader {
            tag,
            vr,
            length,
            offset: value_offset - 8,
            value_offset,
        }
    }

    #[test]
    fn defined_length_sequence_closes_at_its_end() {
        let mut walker = SequenceWalker::new();
        let sq = header(Tag(0x3006, 0x0020), None, 40, 100);
        assert_eq!(
            walker.observe(&sq).unwrap(),
            WalkEvent::SequenceStart { depth: 1 }
        );
        let item = header(ITEM, None, 32, 108);
        assert_eq!(
            walker.observe(&item).unwrap(),
            WalkEvent::ItemStart { depth: 1 }
        );
        assert!(walker.unwind(120).is_empty());
        assert_eq!(
            walker.unwind(140),
            vec![
                WalkEvent::ItemEnd { depth: 1 },
                WalkEvent::SequenceEnd { depth: 1 }
            ]
        );
        assert_eq!(walker.depth(), 0);
    }

    #[test]
    fn undefined_length_sequence_waits_for_delimiter() {
        let mut walker = SequenceWalker::new();
        let sq = header(Tag(0x0009, 0x1010), Some(VR::UN), UNDEFINED_LENGTH, 20);
        assert_eq!(
            walker.observe(&sq).unwrap(),
            WalkEvent::SequenceStart { depth: 1 }
        );
        assert!(walker.unwind(u64::MAX).is_empty());
        let delimiter = header(SEQUENCE_DELIMITATION, None, 0, 60);
        assert_eq!(
            walker.observe(&delimiter).unwrap(),
            WalkEvent::SequenceEnd { depth: 1 }
        );
        assert_eq!(walker.depth(), 0);
    }

    #[test]
    fn explicit_vr_overrides_dictionary() {
        let mut walker = SequenceWalker::new();
        let plain = header(Tag(0x3006, 0x0020), Some(VR::LO), 4, 20);
        assert_eq!(
            walker.observe(&plain).unwrap(),
            WalkEvent::Element { depth: 0 }
        );
        let private = header(Tag(0x0029, 0x1010), Some(VR::SQ), 0, 40);
        assert_eq!(
            walker.observe(&private).unwrap(),
            WalkEvent::SequenceStart { depth: 1 }
        );
    }

    #[test]
    fn depth_is_capped() {
        let mut walker = SequenceWalker::new();
        for depth in 1..=MAX_SEQUENCE_DEPTH {
            let sq = header(Tag(0x0008, 0x1115), None, UNDEFINED_LENGTH, 16 + depth as u64);
            assert_eq!(
                walker.observe(&sq).unwrap(),
                WalkEvent::SequenceStart { depth }
            );
        }
        let sq = header(Tag(0x0008, 0x1115), None, UNDEFINED_LENGTH, 500);
        assert!(matches!(
            walker.observe(&sq),
            Err(ReadError::SequenceDepthExceeded { depth: 99 })
        ));
    }
}
