use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

pub mod ids;
pub mod mock;
pub mod runtime;
pub mod types;

#[cfg(test)]
mod tests;

pub use ids::{AssetId, CompactSkinningDataId, MorphTargetBufferId, ResourceId, VertexBufferId};
pub use runtime::AvatarNative;

/// Raw status codes as reported by the native runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    DataNotAvailable = 1,
    Failure = -1,
    InvalidArgument = -2,
    BufferTooSmall = -3,
    NotFound = -4,
    #[num_enum(default)]
    Unknown = -128,
}

impl ResultCode {
    /// `Success` proceeds, `DataNotAvailable` is the "feature absent" signal, everything else failed.
    pub fn into_result(self) -> Result<(), NativeError> {
        match self {
            ResultCode::Success => Ok(()),
            ResultCode::DataNotAvailable => Err(NativeError::DataNotAvailable),
            code => Err(NativeError::Failed { code }),
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The queried feature is absent for this asset. Not a failure, the caller degrades.
    #[error("The requested data is not available")]
    DataNotAvailable,

    #[error("The native call failed with {code:?}")]
    Failed { code: ResultCode },

    #[error("The destination buffer holds {actual} elements, but {expected} are required")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

impl NativeError {
    pub fn is_data_not_available(&self) -> bool {
        matches!(self, NativeError::DataNotAvailable)
    }

    pub fn code(&self) -> ResultCode {
        match self {
            NativeError::DataNotAvailable => ResultCode::DataNotAvailable,
            NativeError::Failed { code } => *code,
            NativeError::BufferSizeMismatch { .. } => ResultCode::BufferTooSmall,
        }
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

/// Ensures a caller provided destination matches the amount of elements the runtime is about to copy.
pub fn check_destination(expected: usize, actual: usize) -> NativeResult<()> {
    if expected != actual {
        return Err(NativeError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}
