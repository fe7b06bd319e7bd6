use crate::enums::SliceOrder;
use crate::series_collator::{CollateError, SeriesGroup, SeriesSlice};

use serde::Serialize;
use tracing::debug;

/// Geometry of an assembled 3D or 4D scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneGeometry {
    /// 3 for a single series, 4 when series form a time axis.
    pub dimension: u8,
    pub origin: [f32; 3],
    pub row_axis: [f32; 3],
    pub column_axis: [f32; 3],
    /// Row axis × column axis.
    pub normal_axis: [f32; 3],
    /// Pixel spacing along rows and columns.
    pub pixel_size: [f32; 2],
    /// Columns, rows.
    pub image_size: [u16; 2],
    /// `[slices]` in 3D, `[volumes, slices of volume 0, ...]` in 4D.
    pub subscene_counts: Vec<usize>,
    /// 3D: one location per slice. 4D: the volume times, then the slice
    /// locations of every volume.
    pub subscene_locations: Vec<f32>,
    pub locations_authoritative: bool,
    pub slice_spacing: f32,
    pub slice_order: SliceOrder,
}

impl SceneGeometry {
    pub fn num_volumes(&self) -> usize {
        match self.dimension {
            4 => self.subscene_counts.first().copied().unwrap_or(0),
            _ => 1,
        }
    }

    /// Flat domain: origin then axes, row-major. 3 + 9 values in 3D; in 4D
    /// the time origin and a homogeneous 4×4 axis block, 4 + 16 values.
    pub fn domain(&self) -> Vec<f32> {
        let mut domain = Vec::with_capacity(20);
        domain.extend(self.origin);
        if self.dimension == 4 {
            domain.push(0.0);
            for axis in [self.row_axis, self.column_axis, self.normal_axis] {
                domain.extend(axis);
                domain.push(0.0);
            }
            domain.extend([0.0, 0.0, 0.0, 1.0]);
        } else {
            for axis in [self.row_axis, self.column_axis, self.normal_axis] {
                domain.extend(axis);
            }
        }
        domain
    }
}

pub struct VolumeAssembler;

impl VolumeAssembler {
    /// Combine collated series into a scene geometry
    ///
    /// The first slice of the first series defines axes, pixel size and
    /// spacing. More than one series makes a 4D scene ordered by volume
    /// time.
    ///
    /// # Errors
    ///
    /// Returns error if there is no series or the first series is empty
    pub fn assemble(
        groups: &[SeriesGroup],
        order: SliceOrder,
    ) -> Result<SceneGeometry, CollateError> {
        let Some(reference) = groups.first().and_then(|group| group.slices.first()) else {
            return Err(CollateError::NoValidImages);
        };

        let locations_authoritative = groups.iter().all(SeriesGroup::locations_authoritative);
        let (dimension, subscene_counts, subscene_locations) = if groups.len() > 1 {
            Self::time_series_locations(groups)?
        } else {
            Self::single_series_locations(&groups[0], locations_authoritative)?
        };
        debug!(
            dimension,
            subscenes = ?subscene_counts,
            "assembled scene geometry"
        );

        Ok(SceneGeometry {
            dimension,
            origin: groups[0].origin,
            row_axis: reference.row_cosines(),
            column_axis: reference.column_cosines(),
            normal_axis: reference.normal(),
            pixel_size: reference.pixel_size,
            image_size: [reference.columns, reference.rows],
            subscene_counts,
            subscene_locations,
            locations_authoritative,
            slice_spacing: reference.nominal_spacing,
            slice_order: order,
        })
    }

    fn single_series_locations(
        group: &SeriesGroup,
        authoritative: bool,
    ) -> Result<(u8, Vec<usize>, Vec<f32>), CollateError> {
        let frames = group.frame_count();
        let offsets = group.frame_offsets();
        let spacing = group
            .slices
            .first()
            .map_or(1.0, |slice| slice.nominal_spacing);

        let mut locations = location_buffer(frames)?;
        locations.extend((0..frames).map(|frame| {
            let base = if authoritative {
                frame_slice(&group.slices, frame, frames).location
            } else {
                frame as f32 * spacing
            };
            base + offsets.get(frame).copied().unwrap_or(0.0)
        }));
        Ok((3, vec![frames], locations))
    }

    fn time_series_locations(
        groups: &[SeriesGroup],
    ) -> Result<(u8, Vec<usize>, Vec<f32>), CollateError> {
        let total = groups
            .iter()
            .try_fold(groups.len(), |total, group| total.checked_add(group.frame_count()))
            .ok_or(CollateError::OutOfMemory { frames: usize::MAX })?;
        let mut counts = vec![groups.len()];
        let mut locations = location_buffer(total)?;
        locations.extend(groups.iter().map(|group| group.volume_time));
        for group in groups {
            let frames = group.frame_count();
            counts.push(frames);
            locations.extend(
                (0..frames).map(|frame| frame_slice(&group.slices, frame, frames).location),
            );
        }
        Ok((4, counts, locations))
    }
}

fn location_buffer(frames: usize) -> Result<Vec<f32>, CollateError> {
    let mut locations = Vec::new();
    locations
        .try_reserve_exact(frames)
        .map_err(|_| CollateError::OutOfMemory { frames })?;
    Ok(locations)
}

/// Slice holding `frame` when `frames` are spread evenly over the slices.
fn frame_slice(slices: &[SeriesSlice], frame: usize, frames: usize) -> &SeriesSlice {
    &slices[frame * slices.len() / frames]
}
