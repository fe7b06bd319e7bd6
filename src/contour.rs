//! RT Structure Set ROI and contour extraction.

use std::collections::TryReserveError;
use std::io::{Read, Seek};

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::reader::{ParserSession, ReadError, TEXT_LIMIT, extract_floats, leading_int};
use crate::sequence::{SequenceWalker, WalkEvent};

/// Bytes reserved per point for verbose ASCII coordinates.
const BYTES_PER_POINT: usize = 27;

#[derive(Debug, Error)]
pub enum ContourError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("Cannot allocate a contour of {points} points")]
    OutOfMemory { points: usize },

    #[error("Structure set has no {0} sequence")]
    MissingSequence(Tag),

    #[error("ROI Name appears before any ROI Number")]
    RoiNameWithoutNumber,
}

/// Ordered `(x, y, z)` points, one row per point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contour {
    pub points: Array2<f32>,
}

impl Contour {
    pub fn num_points(&self) -> usize {
        self.points.nrows()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourRoi {
    pub number: i32,
    /// Blanks and slashes replaced by `_`.
    pub name: String,
    pub contours: Vec<Contour>,
}

impl ContourRoi {
    pub fn num_contours(&self) -> usize {
        self.contours.len()
    }

    pub fn contour_num_points(&self) -> Vec<usize> {
        self.contours.iter().map(Contour::num_points).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContourStructureSet {
    pub rois: Vec<ContourRoi>,
}

impl ContourStructureSet {
    pub fn roi(&self, index: usize) -> Option<&ContourRoi> {
        self.rois.get(index)
    }

    pub fn roi_by_number(&self, number: i32) -> Option<&ContourRoi> {
        self.rois.iter().find(|roi| roi.number == number)
    }
}

/// A contour whose point buffer is allocated but not yet attached to an ROI.
struct PendingContour {
    declared: usize,
    coords: Vec<f32>,
}

impl PendingContour {
    fn allocate(points: usize) -> Result<Self, ContourError> {
        let out_of_memory = |_: TryReserveError| ContourError::OutOfMemory { points };
        let len = points
            .checked_mul(3)
            .ok_or(ContourError::OutOfMemory { points })?;
        let mut coords = Vec::new();
        coords.try_reserve_exact(len).map_err(out_of_memory)?;
        coords.resize(len, 0.0);
        Ok(Self {
            declared: points,
            coords,
        })
    }

    fn into_contour(self) -> Contour {
        let points = Array2::from_shape_vec((self.declared, 3), self.coords)
            .unwrap_or_else(|_| Array2::zeros((0, 3)));
        Contour { points }
    }
}

/// Reads structure sets. The text scratch buffer is kept between calls and
/// only ever grows.
#[derive(Debug, Default)]
pub struct ContourSetExtractor {
    scratch: Vec<u8>,
}

impl ContourSetExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// Collects the ROIs, then attaches each ROI Contour item's contours to
    /// the ROI it references. Contours referencing an unknown ROI are
    /// dropped.
    pub fn extract<R: Read + Seek>(
        &mut self,
        session: &mut ParserSession<R>,
    ) -> Result<ContourStructureSet, ContourError> {
        let mut set = ContourStructureSet {
            rois: Self::read_rois(session)?,
        };
        debug!(rois = set.rois.len(), "read structure set ROIs");

        match session.find_element(tags::ROI_CONTOUR_SEQUENCE) {
            Ok((header, _)) => {
                let walker = SequenceWalker::within(&header);
                self.read_contours(session, walker, &mut set)?;
            }
            Err(ReadError::NotFound(_)) => {
                warn!("structure set has no ROI Contour Sequence");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(set)
    }

    fn read_rois<R: Read + Seek>(
        session: &mut ParserSession<R>,
    ) -> Result<Vec<ContourRoi>, ContourError> {
        let header = match session.find_element(tags::STRUCTURE_SET_ROI_SEQUENCE) {
            Ok((header, _)) => header,
            Err(ReadError::NotFound(tag)) => return Err(ContourError::MissingSequence(tag)),
            Err(err) => return Err(err.into()),
        };

        let mut walker = SequenceWalker::within(&header);
        let mut rois: Vec<ContourRoi> = Vec::new();
        loop {
            walker.unwind(session.position());
            if walker.depth() == 0 {
                break;
            }
            let Some(element) = session.next_header()? else {
                break;
            };
            match walker.observe(&element)? {
                WalkEvent::Element { depth: 1 } if element.tag == tags::ROI_NUMBER => {
                    let text = session.read_value_text(&element, TEXT_LIMIT)?;
                    rois.push(ContourRoi {
                        number: i32::try_from(leading_int(&text)).unwrap_or(0),
                        name: String::new(),
                        contours: Vec::new(),
                    });
                }
                WalkEvent::Element { depth: 1 } if element.tag == tags::ROI_NAME => {
                    let text = session.read_value_text(&element, TEXT_LIMIT)?;
                    let roi = rois
                        .last_mut()
                        .ok_or(ContourError::RoiNameWithoutNumber)?;
                    roi.name = sanitize_roi_name(&text);
                }
                WalkEvent::Element { .. } => session.skip_value(&element)?,
                _ => {}
            }
        }
        Ok(rois)
    }

    fn read_contours<R: Read + Seek>(
        &mut self,
        session: &mut ParserSession<R>,
        mut walker: SequenceWalker,
        set: &mut ContourStructureSet,
    ) -> Result<(), ContourError> {
        let mut pending: Vec<PendingContour> = Vec::new();
        loop {
            walker.unwind(session.position());
            if walker.depth() == 0 {
                break;
            }
            let Some(element) = session.next_header()? else {
                break;
            };
            let WalkEvent::Element { .. } = walker.observe(&element)? else {
                continue;
            };

            if element.tag == tags::NUMBER_OF_CONTOUR_POINTS {
                let text = session.read_value_text(&element, TEXT_LIMIT)?;
                let points = usize::try_from(leading_int(&text)).unwrap_or(0);
                pending.push(PendingContour::allocate(points)?);
            } else if element.tag == tags::CONTOUR_DATA {
                self.read_contour_data(session, &element, &mut pending)?;
            } else if element.tag == tags::REFERENCED_ROI_NUMBER {
                let text = session.read_value_text(&element, TEXT_LIMIT)?;
                let number = i32::try_from(leading_int(&text)).unwrap_or(0);
                let contours = std::mem::take(&mut pending);
                attach(set, number, contours);
            } else {
                session.skip_value(&element)?;
            }
        }
        if !pending.is_empty() {
            warn!(
                contours = pending.len(),
                "contours without a Referenced ROI Number dropped"
            );
        }
        Ok(())
    }

    fn read_contour_data<R: Read + Seek>(
        &mut self,
        session: &mut ParserSession<R>,
        element: &crate::reader::ElementHeader,
        pending: &mut Vec<PendingContour>,
    ) -> Result<(), ContourError> {
        let length = element.length as usize;
        let declared = pending.last().map_or(0, |contour| contour.declared);
        let needed = (length + 1).max(BYTES_PER_POINT.saturating_mul(declared));
        if self.scratch.len() < needed {
            self.scratch
                .try_reserve_exact(needed - self.scratch.len())
                .map_err(|_| ContourError::OutOfMemory { points: declared })?;
            self.scratch.resize(needed, 0);
        }

        let read = session.read_value_into(element, &mut self.scratch[..length])?;
        let text = String::from_utf8_lossy(&self.scratch[..read]);

        let contour = match pending.last_mut() {
            Some(contour) => contour,
            None => {
                // Contour Data without a preceding point count
                let points = extract_floats(&text, usize::MAX).len() / 3;
                warn!(points, "Contour Data without Number of Contour Points");
                pending.push(PendingContour::allocate(points)?);
                pending
                    .last_mut()
                    .ok_or(ContourError::OutOfMemory { points })?
            }
        };

        let values = extract_floats(&text, contour.coords.len());
        if values.len() < contour.coords.len() {
            warn!(
                expected = contour.coords.len(),
                found = values.len(),
                "Contour Data shorter than Number of Contour Points"
            );
        }
        contour.coords[..values.len()].copy_from_slice(&values);
        if contour.declared == 0 {
            debug!("zero-point contour accepted");
        }
        Ok(())
    }
}

fn attach(set: &mut ContourStructureSet, number: i32, contours: Vec<PendingContour>) {
    if contours.is_empty() || number == 0 {
        return;
    }
    match set.rois.iter_mut().find(|roi| roi.number == number) {
        Some(roi) => roi
            .contours
            .extend(contours.into_iter().map(PendingContour::into_contour)),
        None => warn!(
            number,
            contours = contours.len(),
            "contours reference an unknown ROI and were dropped"
        ),
    }
}

/// Trims the name and replaces blanks and path separators with `_`.
pub fn sanitize_roi_name(name: &str) -> String {
    name.trim_matches([' ', '\0'])
        .chars()
        .map(|c| if matches!(c, ' ' | '/' | '\\') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_roi_name(" Tumor 1 "), "Tumor_1");
        assert_eq!(sanitize_roi_name("L/R\\lung"), "L_R_lung");
        assert_eq!(sanitize_roi_name("Liver"), "Liver");
    }

    #[test]
    fn pending_contour_shapes_points() {
        let mut pending = PendingContour::allocate(2).unwrap();
        pending.coords.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let contour = pending.into_contour();
        assert_eq!(contour.num_points(), 2);
        assert_eq!(contour.points[[1, 2]], 6.0);
    }

    #[test]
    fn absurd_point_count_is_out_of_memory() {
        let err = PendingContour::allocate(usize::MAX / 2).err().unwrap();
        assert!(matches!(err, ContourError::OutOfMemory { .. }));
    }

    #[test]
    fn unknown_roi_drops_contours() {
        let mut set = ContourStructureSet {
            rois: vec![ContourRoi {
                number: 1,
                name: "Liver".into(),
                contours: Vec::new(),
            }],
        };
        attach(&mut set, 9, vec![PendingContour::allocate(3).unwrap()]);
        assert_eq!(set.rois[0].num_contours(), 0);
        attach(&mut set, 1, vec![PendingContour::allocate(3).unwrap()]);
        assert_eq!(set.rois[0].contour_num_points(), vec![3]);
    }
}
