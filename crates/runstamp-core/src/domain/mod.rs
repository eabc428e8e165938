//! Domain model (timestamp, artifacts, mode, errors).

pub mod artifact;
pub mod errors;
pub mod mode;
pub mod timestamp;

pub use artifact::{
    AccessToken, ArtifactHandle, ArtifactId, Download, ListQuery, UploadAck, UploadOptions,
};
pub use errors::{RemoteError, StoreError};
pub use mode::Mode;
pub use timestamp::{StoredTimestamp, ValidationError, validate};
