//! # DICOM-scene library
//!
//! This crate reconstructs scene geometry from sets of legacy ACR-NEMA and
//! DICOM slice files, and reads RT Structure Set contours.

//!
//! Files are scanned directly as tag/length/value streams instead of being
//! loaded into an object model, so old ACR-NEMA files without a Part 10
//! header, written for any of the historical receiver byte orders, read as
//! well as Explicit VR Little Endian, Implicit VR Little Endian and
//! Explicit VR Big Endian files. Each open file is a [`ParserSession`];
//! sessions share nothing, so slice files are probed in parallel using
//! rayon.
//!
//! The crate provides:
//!  - Element lookup with a fast group-ordered pass and an observable
//!    exhaustive fallback for files whose tags are out of order
//!  - Nested sequence walking for defined and undefined lengths
//!  - RT Structure Set ROI and contour extraction
//!  - Series grouping, slice location, orientation validation and ordering
//!  - 3D and 4D scene geometry (origin, axes, spacing, subscene locations)
//!
//!  Pixel data, the descriptive header fields of a scene file and the
//!  contour rasterizer are out of scope.
//!
//! # Examples
//!
//! ## Assembling the geometry of a slice directory
//!
//! ```no_run
//! # use dicom_scene::{CollateOptions, SeriesCollator, SliceOrder, VolumeAssembler};
//! let options = CollateOptions::default();
//! let groups = SeriesCollator::collate_directory("dicom", &options)
//!     .expect("should have collated the directory");
//! let scene = VolumeAssembler::assemble(&groups, SliceOrder::Location)
//!     .expect("should have assembled a scene");
//! println!("{}D scene, subscenes {:?}", scene.dimension, scene.subscene_counts);
//! ```
//!
//! ## Reading a structure set
//!
//! ```no_run
//! # use dicom_scene::{ContourSetExtractor, ParserSession};
//! let mut session = ParserSession::open("rtstruct.dcm").expect("should open the file");
//! let set = ContourSetExtractor::new()
//!     .extract(&mut session)
//!     .expect("should have read the structure set");
//! for roi in &set.rois {
//!     println!("{} {}: {:?}", roi.number, roi.name, roi.contour_num_points());
//! }
//! ```

pub mod codec;
pub mod contour;
pub mod enums;
pub mod reader;
pub mod sequence;
mod sequence_tags;
pub mod series_collator;
pub mod volume;

pub use codec::{ArchType, ByteOrder};
pub use contour::{Contour, ContourError, ContourRoi, ContourSetExtractor, ContourStructureSet};
pub use enums::{LocationSource, LookupPass, SliceOrder, TransferSyntax, ValueType};
pub use reader::{
    DataElement, Decoded, ElementHeader, ElementValue, LookupPolicy, ParserSession, ReadError,
    StreamLayout, detect_transfer_syntax,
};
pub use sequence::{MAX_SEQUENCE_DEPTH, SequenceFrame, SequenceWalker, WalkEvent};
pub use sequence_tags::is_sequence_tag;
pub use series_collator::{CollateError, CollateOptions, SeriesCollator, SeriesGroup, SeriesSlice};
pub use volume::{SceneGeometry, VolumeAssembler};
