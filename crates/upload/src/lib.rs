//! Uploading inspections to remote storage.
//!
//! [`Uploader`] turns an inspection into a remote folder of sequentially
//! numbered media files and a public link, reporting progress as a stream of
//! [`UploadEvent`]s. [`classify`] maps any failure onto the small set of
//! categories the user is shown.

pub mod classify;
pub mod error;
pub mod naming;
mod uploader;

pub use crate::uploader::{
    DEFAULT_ROOT_FOLDER, ItemOutcome, UploadEvent, UploadOutcome, UploadReport, UploadSettings, Uploader,
};
