use crate::{
    codec::ArchType,
    enums::{LocationSource, SliceOrder, ValueType},
    reader::{LookupPolicy, ParserSession, ReadError, leading_int},
};

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    fs,
    io::{Read, Seek},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Series assigned to files that carry no Series Instance UID.
pub const DUMMY_SERIES_UID: &str = "DUMMY-SERIES";

/// Per-component tolerance when comparing direction cosines.
pub const ORIENTATION_TOLERANCE: f32 = 0.01;

// Retired ACR-NEMA attributes still written by old scanners.
const IMAGE_POSITION: Tag = Tag(0x0020, 0x0030);
const IMAGE_ORIENTATION: Tag = Tag(0x0020, 0x0035);
const LOCATION: Tag = Tag(0x0020, 0x0050);

/// Largest Number of Frames accepted from a single file.
pub const MAX_FRAMES: usize = 1 << 20;

const DEFAULT_ORIENTATION: [f32; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

#[derive(Debug, Error)]
pub enum CollateError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error(
        "Image orientation of {} is {found:?}, series expects {expected:?}",
        path.display()
    )]
    OrientationMismatch {
        path: PathBuf,
        expected: [f32; 6],
        found: [f32; 6],
    },

    #[error("Cannot parse the acquisition time of {}", path.display())]
    SliceTime { path: PathBuf },

    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("{} declares {frames} frames", path.display())]
    FrameCount { path: PathBuf, frames: usize },

    #[error("Cannot allocate locations for {frames} frames")]
    OutOfMemory { frames: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollateError {
    /// Errors that abort a whole batch rather than excluding one file.
    /// Runaway sequence nesting is fatal; other read failures only exclude
    /// the file.
    pub fn is_fatal(&self) -> bool {
        match self {
            CollateError::Read { source, .. } => {
                matches!(source, ReadError::SequenceDepthExceeded { .. })
            }
            CollateError::FrameCount { .. } => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollateOptions {
    pub order: SliceOrder,
    /// Sort by Acquisition Number before location.
    pub use_acquisition: bool,
    /// Overrides the spacing read from the files.
    pub nominal_spacing: Option<f32>,
    pub lookup: LookupPolicy,
    /// Byte order of files without a Part 10 header.
    pub legacy_arch: ArchType,
}

impl Default for CollateOptions {
    fn default() -> Self {
        Self {
            order: SliceOrder::Location,
            use_acquisition: false,
            nominal_spacing: None,
            lookup: LookupPolicy::default(),
            legacy_arch: ArchType::default(),
        }
    }
}

/// Geometry and ordering keys of one slice file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSlice {
    pub path: PathBuf,
    pub series_uid: Option<String>,
    pub rows: u16,
    pub columns: u16,
    /// Position along the slice normal, or seconds for time ordering.
    pub location: f32,
    pub location_source: LocationSource,
    pub acquisition_number: Option<i32>,
    /// Acquisition Time in seconds since midnight.
    pub timestamp: Option<f64>,
    pub rescale_slope: Option<f32>,
    pub image_position: Option<[f32; 3]>,
    pub slice_location: Option<f32>,
    pub instance_number: Option<f32>,
    /// Row then column direction cosines, when the file states them.
    pub orientation: Option<[f32; 6]>,
    pub frames: usize,
    pub frame_offsets: Vec<f32>,
    pub pixel_size: [f32; 2],
    pub nominal_spacing: f32,
    pub volume_time: f32,
}

impl SeriesSlice {
    pub fn row_cosines(&self) -> [f32; 3] {
        let o = self.orientation.unwrap_or(DEFAULT_ORIENTATION);
        [o[0], o[1], o[2]]
    }

    pub fn column_cosines(&self) -> [f32; 3] {
        let o = self.orientation.unwrap_or(DEFAULT_ORIENTATION);
        [o[3], o[4], o[5]]
    }

    /// Row × column.
    pub fn normal(&self) -> [f32; 3] {
        cross(self.row_cosines(), self.column_cosines())
    }

    fn sort_key(&self, use_acquisition: bool) -> (i32, f32) {
        let acquisition = if use_acquisition {
            self.acquisition_number.unwrap_or(0)
        } else {
            0
        };
        (acquisition, self.location)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesGroup {
    pub series_uid: String,
    pub slices: Vec<SeriesSlice>,
    pub volume_time: f32,
    /// Shared by every group of one collation; zero without image positions.
    pub origin: [f32; 3],
    /// The input order was not ascending and the slices were re-sorted.
    pub reordered: bool,
}

impl SeriesGroup {
    pub fn frame_count(&self) -> usize {
        self.slices.iter().map(|slice| slice.frames).sum()
    }

    pub fn locations(&self) -> Vec<f32> {
        self.slices.iter().map(|slice| slice.location).collect()
    }

    /// Whether every slice location came from the file itself.
    pub fn locations_authoritative(&self) -> bool {
        self.slices
            .iter()
            .all(|slice| slice.location_source.is_authoritative())
    }

    /// Grid Frame Offset Vector of the slice with the most frames.
    pub fn frame_offsets(&self) -> &[f32] {
        self.slices
            .iter()
            .max_by_key(|slice| slice.frames)
            .map(|slice| slice.frame_offsets.as_slice())
            .unwrap_or_default()
    }
}

/// Location frame shared by all series of one collation.
struct Reference {
    origin: [f32; 3],
    normal: [f32; 3],
}

pub struct SeriesCollator;

impl SeriesCollator {
    /// Collate slice files into ordered series groups
    ///
    /// # Arguments
    ///
    /// * `paths` - Candidate slice files, in input order
    /// * `options` - Ordering and parsing options
    ///
    /// # Errors
    ///
    /// Returns error if no file is a valid image, or on an orientation
    /// mismatch or an unparseable acquisition time
    pub fn collate(
        paths: &[impl AsRef<Path> + Sync],
        options: &CollateOptions,
    ) -> Result<Vec<SeriesGroup>, CollateError> {
        let probed: Vec<_> = paths
            .par_iter()
            .map(|path| Self::probe(path.as_ref(), options))
            .collect();

        let mut slices = Vec::with_capacity(probed.len());
        for result in probed {
            match result {
                Ok(Some(slice)) => slices.push(slice),
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(%err, "file excluded"),
            }
        }
        Self::collate_slices(slices, options)
    }

    /// Collate every regular file in a directory, in file-name order.
    pub fn collate_directory(
        path: impl AsRef<Path>,
        options: &CollateOptions,
    ) -> Result<Vec<SeriesGroup>, CollateError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        if paths.is_empty() {
            return Err(CollateError::NoValidImages);
        }
        paths.sort();

        Self::collate(&paths, options)
    }

    /// Reads the ordering keys of one file.
    ///
    /// `Ok(None)` means the file is not an image (no Rows/Columns).
    pub fn probe(path: &Path, options: &CollateOptions) -> Result<Option<SeriesSlice>, CollateError> {
        let read_error = |source| CollateError::Read {
            path: path.to_owned(),
            source,
        };
        let mut session =
            ParserSession::open_with(path, options.legacy_arch, options.lookup).map_err(read_error)?;
        Self::probe_session(&mut session, path, options)
    }

    /// Like [`SeriesCollator::probe`], over an already open session.
    pub fn probe_session<R: Read + Seek>(
        session: &mut ParserSession<R>,
        path: &Path,
        options: &CollateOptions,
    ) -> Result<Option<SeriesSlice>, CollateError> {
        let read_error = |source| CollateError::Read {
            path: path.to_owned(),
            source,
        };

        let Some(rows) = required(session.read_u16(tags::ROWS)).map_err(read_error)? else {
            debug!(path = %path.display(), "no Rows, not an image");
            return Ok(None);
        };
        let Some(columns) = required(session.read_u16(tags::COLUMNS)).map_err(read_error)? else {
            debug!(path = %path.display(), "no Columns, not an image");
            return Ok(None);
        };
        if rows == 0 || columns == 0 {
            debug!(path = %path.display(), rows, columns, "empty image excluded");
            return Ok(None);
        }

        let series_uid = soft(path, session.read_text(tags::SERIES_INSTANCE_UID))?
            .filter(|uid| !uid.is_empty());

        let acquisition_time = soft(path, session.read_text(tags::ACQUISITION_TIME))?;
        let timestamp = acquisition_time.as_deref().and_then(hms_to_seconds);
        if options.order == SliceOrder::Time && timestamp.is_none() {
            return Err(CollateError::SliceTime {
                path: path.to_owned(),
            });
        }

        let image_position = first_of([tags::IMAGE_POSITION_PATIENT, IMAGE_POSITION], |tag| {
            read_array::<_, 3>(session, path, tag)
        })?;
        let orientation = first_of([tags::IMAGE_ORIENTATION_PATIENT, IMAGE_ORIENTATION], |tag| {
            read_array::<_, 6>(session, path, tag)
        })?;
        let slice_location = first_of([tags::SLICE_LOCATION, LOCATION], |tag| {
            soft(path, session.read_float(tag))
        })?;
        let instance_number = soft(path, session.read_float(tags::INSTANCE_NUMBER))?;
        let acquisition_number = soft(path, session.read_text(tags::ACQUISITION_NUMBER))?
            .filter(|text| !text.is_empty())
            .map(|text| i32::try_from(leading_int(&text)).unwrap_or(0));
        let rescale_slope = soft(path, session.read_float(tags::RESCALE_SLOPE))?;

        let frames = soft(path, session.read_text(tags::NUMBER_OF_FRAMES))?
            .map_or(1, |text| usize::try_from(leading_int(&text)).unwrap_or(1))
            .max(1);
        if frames > MAX_FRAMES {
            return Err(CollateError::FrameCount {
                path: path.to_owned(),
                frames,
            });
        }
        let frame_offsets = if frames > 1 {
            read_long_floats(session, path, tags::GRID_FRAME_OFFSET_VECTOR, frames)?
        } else {
            Vec::new()
        };

        let pixel_size = first_of([tags::PIXEL_SPACING, tags::IMAGER_PIXEL_SPACING], |tag| {
            soft(path, session.read_floats(tag, 2)).map(|values| values.filter(|v| !v.is_empty()))
        })?
        .map_or([1.0, 1.0], |values| {
            [values[0], values.get(1).copied().unwrap_or(values[0])]
        });

        let nominal_spacing = match options.nominal_spacing {
            Some(spacing) => spacing,
            None => Self::nominal_spacing(session, path)?,
        };

        let volume_time = first_of(
            [tags::CONTENT_TIME, tags::ACQUISITION_TIME, tags::SERIES_TIME],
            |tag| soft(path, session.read_float(tag)),
        )?
        .unwrap_or(0.0);

        Ok(Some(SeriesSlice {
            path: path.to_owned(),
            series_uid,
            rows,
            columns,
            location: 0.0,
            location_source: LocationSource::Default,
            acquisition_number,
            timestamp,
            rescale_slope,
            image_position,
            slice_location,
            instance_number,
            orientation,
            frames,
            frame_offsets,
            pixel_size,
            nominal_spacing,
            volume_time,
        }))
    }

    fn nominal_spacing<R: Read + Seek>(
        session: &mut ParserSession<R>,
        path: &Path,
    ) -> Result<f32, CollateError> {
        let cine_rate = soft(path, session.read_float(tags::CINE_RATE))?.unwrap_or(0.0);
        if cine_rate > 0.0 {
            return Ok(1.0 / cine_rate);
        }
        Ok(soft(path, session.read_float(tags::SPACING_BETWEEN_SLICES))?.unwrap_or(1.0))
    }

    /// Groups probed slices by series, locates, validates and orders them.
    ///
    /// Slices are expected in input order; the first one defines the
    /// location frame of every series.
    pub fn collate_slices(
        slices: Vec<SeriesSlice>,
        options: &CollateOptions,
    ) -> Result<Vec<SeriesGroup>, CollateError> {
        let Some(first) = slices.first() else {
            return Err(CollateError::NoValidImages);
        };
        let reference = Reference {
            origin: match (options.order, first.image_position) {
                (SliceOrder::Location, Some(position)) => position,
                _ => [0.0; 3],
            },
            normal: first.normal(),
        };

        let mut groups = Self::group_by_series(slices);
        for group in &mut groups {
            Self::check_orientation(group)?;
            Self::locate(group, &reference, options);
            group.origin = reference.origin;
            group.reordered = Self::sort_slices(&mut group.slices, options.use_acquisition);
            if group.reordered {
                info!(series = %group.series_uid, "slices not in location order, re-sorted");
            }
        }

        groups.sort_by(|a, b| a.volume_time.total_cmp(&b.volume_time));
        Ok(groups)
    }

    fn group_by_series(slices: Vec<SeriesSlice>) -> Vec<SeriesGroup> {
        let mut groups: Vec<SeriesGroup> = Vec::new();
        for slice in slices {
            let uid = slice.series_uid.as_deref().unwrap_or(DUMMY_SERIES_UID);
            match groups.iter_mut().find(|group| group.series_uid == uid) {
                Some(group) => group.slices.push(slice),
                None => groups.push(SeriesGroup {
                    series_uid: uid.to_owned(),
                    volume_time: slice.volume_time,
                    origin: [0.0; 3],
                    reordered: false,
                    slices: vec![slice],
                }),
            }
        }
        groups
    }

    fn check_orientation(group: &SeriesGroup) -> Result<(), CollateError> {
        let mut stated = group
            .slices
            .iter()
            .filter_map(|slice| slice.orientation.map(|orientation| (slice, orientation)));
        let Some((_, expected)) = stated.next() else {
            return Ok(());
        };
        for (slice, found) in stated {
            let matches = expected
                .iter()
                .zip(found)
                .all(|(a, b)| (a - b).abs() <= ORIENTATION_TOLERANCE);
            if !matches {
                return Err(CollateError::OrientationMismatch {
                    path: slice.path.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    fn locate(group: &mut SeriesGroup, reference: &Reference, options: &CollateOptions) {
        for (index, slice) in group.slices.iter_mut().enumerate() {
            let (location, source) = match (options.order, slice.timestamp, slice.image_position) {
                (SliceOrder::Time, Some(timestamp), _) => {
                    (timestamp as f32, LocationSource::AcquisitionTime)
                }
                (SliceOrder::Location, _, Some(position)) => {
                    let offset = sub(position, reference.origin);
                    (dot(offset, reference.normal), LocationSource::ImagePosition)
                }
                _ => match (slice.slice_location, slice.instance_number) {
                    (Some(location), _) => (location, LocationSource::SliceLocation),
                    (None, Some(number)) => {
                        warn!(path = %slice.path.display(), number, "no slice location, using Instance Number");
                        (number, LocationSource::InstanceNumber)
                    }
                    (None, None) => {
                        let location = index as f32 * slice.nominal_spacing;
                        warn!(path = %slice.path.display(), location, "no slice location, using default");
                        (location, LocationSource::Default)
                    }
                },
            };
            slice.location = location;
            slice.location_source = source;
        }
    }

    /// Re-sorts the slices when an adjacent pair is out of order. Returns
    /// whether a sort happened.
    fn sort_slices(slices: &mut [SeriesSlice], use_acquisition: bool) -> bool {
        let descending = slices.windows(2).any(|pair| {
            let (a, b) = (
                pair[0].sort_key(use_acquisition),
                pair[1].sort_key(use_acquisition),
            );
            a.0 > b.0 || (a.0 == b.0 && a.1 > b.1)
        });
        if descending {
            slices.sort_by(|a, b| {
                let (a, b) = (a.sort_key(use_acquisition), b.sort_key(use_acquisition));
                a.0.cmp(&b.0).then(a.1.total_cmp(&b.1))
            });
        }
        descending
    }
}

/// Maps `NotFound` to `None`; every other error is kept.
fn required<T>(result: Result<T, ReadError>) -> Result<Option<T>, ReadError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ReadError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Optional attribute: a failure reads as missing, except runaway
/// sequence nesting, which stops the batch.
fn soft<T>(path: &Path, result: Result<T, ReadError>) -> Result<Option<T>, CollateError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ReadError::NotFound(_)) => Ok(None),
        Err(source @ ReadError::SequenceDepthExceeded { .. }) => Err(CollateError::Read {
            path: path.to_owned(),
            source,
        }),
        Err(err) => {
            debug!(path = %path.display(), %err, "optional attribute unreadable");
            Ok(None)
        }
    }
}

/// The first of `tags` that reads as present.
fn first_of<T, const N: usize>(
    tags: [Tag; N],
    mut read: impl FnMut(Tag) -> Result<Option<T>, CollateError>,
) -> Result<Option<T>, CollateError> {
    for tag in tags {
        if let Some(value) = read(tag)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn read_array<R: Read + Seek, const N: usize>(
    session: &mut ParserSession<R>,
    path: &Path,
    tag: Tag,
) -> Result<Option<[f32; N]>, CollateError> {
    Ok(soft(path, session.read_floats(tag, N))?.and_then(|values| values.try_into().ok()))
}

/// Multi-valued numbers that may exceed the default text limit.
fn read_long_floats<R: Read + Seek>(
    session: &mut ParserSession<R>,
    path: &Path,
    tag: Tag,
    count: usize,
) -> Result<Vec<f32>, CollateError> {
    let limit = u32::try_from(count.saturating_mul(24)).unwrap_or(u32::MAX);
    let decoded = match session.get_element(tag, ValueType::AN, limit) {
        Err(err @ ReadError::ValueTooLarge { .. }) => err.into_truncated(),
        other => other,
    };
    Ok(soft(path, decoded)?
        .and_then(|decoded| {
            decoded
                .value
                .as_text()
                .map(|text| crate::reader::extract_floats(text, count))
        })
        .unwrap_or_default())
}

/// Converts `HHMMSS.frac` to seconds; `None` when fewer than six digits
/// precede the fraction.
pub fn hms_to_seconds(hms: &str) -> Option<f64> {
    let hms = hms.trim();
    let whole_end = hms.find('.').unwrap_or(hms.len());
    if whole_end < 6 {
        return None;
    }
    let seconds_start = whole_end - 2;
    let hours = leading_int(hms.get(seconds_start - 4..seconds_start - 2)?);
    let minutes = leading_int(hms.get(seconds_start - 2..seconds_start)?);
    let seconds: f64 = hms.get(seconds_start..)?.parse().ok()?;
    let total = 60.0 * (60.0 * hours as f64 + minutes as f64) + seconds;
    (total.is_finite() && total >= 0.0).then_some(total)
}

pub(crate) fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - b[1] * a[2],
        b[0] * a[2] - a[0] * b[2],
        a[0] * b[1] - b[0] * a[1],
    ]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(name: &str, uid: Option<&str>, location: Option<f32>) -> SeriesSlice {
        SeriesSlice {
            path: PathBuf::from(name),
            series_uid: uid.map(str::to_owned),
            rows: 4,
            columns: 4,
            location: 0.0,
            location_source: LocationSource::Default,
            acquisition_number: None,
            timestamp: None,
            rescale_slope: None,
            image_position: None,
            slice_location: location,
            instance_number: None,
            orientation: Some(DEFAULT_ORIENTATION),
            frames: 1,
            frame_offsets: Vec::new(),
            pixel_size: [1.0, 1.0],
            nominal_spacing: 2.5,
            volume_time: 0.0,
        }
    }

    #[test]
    fn parses_acquisition_time() {
        assert_eq!(hms_to_seconds("101530"), Some(37_530.0));
        assert_eq!(hms_to_seconds("101530.25"), Some(37_530.25));
        assert_eq!(hms_to_seconds("20240101101530.5"), Some(37_530.5));
        assert_eq!(hms_to_seconds("1015"), None);
        assert_eq!(hms_to_seconds(""), None);
    }

    #[test]
    fn increasing_input_is_not_reordered() {
        let slices = [10.0, 20.0, 30.0]
            .into_iter()
            .enumerate()
            .map(|(i, l)| slice(&format!("{i}"), Some("A"), Some(l)))
            .collect();
        let groups = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].reordered);
        assert_eq!(groups[0].locations(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn reversed_input_is_sorted() {
        let slices = [40.0, 30.0, 20.0, 10.0]
            .into_iter()
            .enumerate()
            .map(|(i, l)| slice(&format!("{i}"), Some("A"), Some(l)))
            .collect();
        let groups = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap();
        assert!(groups[0].reordered);
        assert_eq!(groups[0].locations(), vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(groups[0].slices[0].path, PathBuf::from("3"));
    }

    #[test]
    fn acquisition_number_takes_precedence() {
        let mut slices: Vec<_> = [(2, 10.0), (1, 30.0), (1, 20.0)]
            .into_iter()
            .map(|(acq, l)| {
                let mut s = slice("x", Some("A"), Some(l));
                s.acquisition_number = Some(acq);
                s
            })
            .collect();
        let options = CollateOptions {
            use_acquisition: true,
            ..Default::default()
        };
        assert!(SeriesCollator::sort_slices(&mut slices, options.use_acquisition));
        let keys: Vec<_> = slices
            .iter()
            .map(|s| (s.acquisition_number, s.slice_location))
            .collect();
        assert_eq!(
            keys,
            vec![(Some(1), Some(20.0)), (Some(1), Some(30.0)), (Some(2), Some(10.0))]
        );
    }

    #[test]
    fn files_without_uid_share_dummy_series() {
        let slices = vec![
            slice("a", None, Some(1.0)),
            slice("b", Some("S1"), Some(1.0)),
            slice("c", None, Some(2.0)),
        ];
        let groups = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].series_uid, DUMMY_SERIES_UID);
        assert_eq!(groups[0].slices.len(), 2);
    }

    #[test]
    fn orientation_mismatch_is_fatal() {
        let mut tilted = slice("b", Some("A"), Some(2.0));
        tilted.orientation = Some([1.0, 0.0, 0.0, 0.0, 0.98, 0.2]);
        let slices = vec![slice("a", Some("A"), Some(1.0)), tilted];
        let err = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap_err();
        assert!(matches!(err, CollateError::OrientationMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn orientation_within_tolerance_is_accepted() {
        let mut close = slice("b", Some("A"), Some(2.0));
        close.orientation = Some([0.995, 0.0, 0.0, 0.0, 1.0, 0.009]);
        let slices = vec![slice("a", Some("A"), Some(1.0)), close];
        assert!(SeriesCollator::collate_slices(slices, &CollateOptions::default()).is_ok());
    }

    #[test]
    fn image_position_projects_onto_normal() {
        let positions = [[0.0, 0.0, -5.0], [0.0, 0.0, 5.0], [3.0, 1.0, 0.0]];
        let slices = positions
            .into_iter()
            .map(|p| {
                let mut s = slice("x", Some("A"), None);
                s.image_position = Some(p);
                s
            })
            .collect();
        let groups = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap();
        assert_eq!(groups[0].origin, [0.0, 0.0, -5.0]);
        assert_eq!(groups[0].locations(), vec![0.0, 5.0, 10.0]);
        assert!(groups[0].locations_authoritative());
    }

    #[test]
    fn missing_locations_fall_back_to_spacing() {
        let slices = vec![slice("a", Some("A"), None), slice("b", Some("A"), None)];
        let groups = SeriesCollator::collate_slices(slices, &CollateOptions::default()).unwrap();
        assert_eq!(groups[0].locations(), vec![0.0, 2.5]);
        assert!(!groups[0].locations_authoritative());
    }

    #[test]
    fn series_follow_volume_time() {
        let mut late = slice("a", Some("late"), Some(1.0));
        late.volume_time = 120_000.0;
        let mut early = slice("b", Some("early"), Some(1.0));
        early.volume_time = 100_000.0;
        let groups =
            SeriesCollator::collate_slices(vec![late, early], &CollateOptions::default()).unwrap();
        let uids: Vec<_> = groups.iter().map(|g| g.series_uid.as_str()).collect();
        assert_eq!(uids, vec!["early", "late"]);
    }

    #[test]
    fn empty_input_has_no_images() {
        let err = SeriesCollator::collate_slices(Vec::new(), &CollateOptions::default()).unwrap_err();
        assert!(matches!(err, CollateError::NoValidImages));
    }
}
