use dicom_dictionary_std::uids;
use serde::Serialize;

/// How a requested element value is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    /// Binary 16-bit integers.
    BI,
    /// Binary 32-bit integers.
    BD,
    /// ASCII numeric text.
    AN,
    /// ASCII text.
    AT,
}

/// Key used to place slices along the scene's third axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SliceOrder {
    #[default]
    Location,
    /// Acquisition Time, for cine series without spatial spread.
    Time,
}

/// Which scan found an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupPass {
    /// Stops as soon as the top-level group passes the target.
    GroupOrdered,
    /// Reads the whole data set.
    Exhaustive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LocationSource {
    AcquisitionTime,
    ImagePosition,
    SliceLocation,
    InstanceNumber,
    /// File index times the nominal spacing; not authoritative.
    Default,
}

impl LocationSource {
    pub fn is_authoritative(self) -> bool {
        !matches!(self, LocationSource::InstanceNumber | LocationSource::Default)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferSyntax {
    #[default]
    ExplicitVrLittleEndian,
    ImplicitVrLittleEndian,
    ExplicitVrBigEndian,
    /// No Part 10 header: an ACR-NEMA stream in the caller's architecture.
    Legacy,
}

impl TransferSyntax {
    pub fn from_uid(uid: &str) -> Self {
        match uid.trim_end_matches(['\0', ' ']) {
            uids::IMPLICIT_VR_LITTLE_ENDIAN | uids::PAPYRUS3_IMPLICIT_VR_LITTLE_ENDIAN => {
                TransferSyntax::ImplicitVrLittleEndian
            }
            uids::EXPLICIT_VR_BIG_ENDIAN => TransferSyntax::ExplicitVrBigEndian,
            _ => TransferSyntax::ExplicitVrLittleEndian,
        }
    }

    pub fn is_explicit_vr(self) -> bool {
        matches!(
            self,
            TransferSyntax::ExplicitVrLittleEndian | TransferSyntax::ExplicitVrBigEndian
        )
    }
}
