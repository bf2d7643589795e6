//! Local application state.
//!
//! The inspection list and the connected account live in memory and are
//! written through to a [`KeyValueStore`](kv::KeyValueStore) on every change.
//! [`UploadingSet`] tracks which inspections have an upload in progress; it is
//! never persisted, which is why loading resets `Uploading` inspections back to
//! `Active`.

mod account;
pub mod error;
pub mod kv;
mod models;
mod records;
mod store;
mod uploading;

pub use crate::account::Account;
pub use crate::models::{Credentials, DEFAULT_VALIDITY, Inspection, MediaCapture, MediaItem, MediaKind, Status};
pub use crate::store::InspectionStore;
pub use crate::uploading::{Progress, UploadTicket, UploadingSet};
