//! canopy-bundle: build and stage the static half of a site.
//!
//! [`AssetBundle::build`] runs the configured build command in a scratch
//! environment and captures the output directory as a [`FileSet`].
//! [`AssetBundle::upload`] writes that file set to a [`BlobStore`] under a
//! fresh generation prefix, so nothing already being served is overwritten.
//! The caller flips traffic to the new generation only once the upload
//! reports success.
//!
//! [`BlobStore`]: canopy_state::BlobStore

pub mod bundle;
pub mod error;
pub mod fileset;

pub use bundle::{AssetBundle, UploadReport};
pub use error::{BuildError, UploadError};
pub use fileset::{FileEntry, FileSet, is_generation};
