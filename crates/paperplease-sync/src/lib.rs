//! Sync layer: ticket images from Drive in, audit rows to a Sheets log out.

#[cfg(feature = "http")]
pub mod drive;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sheets;

#[cfg(feature = "http")]
pub use drive::{DriveClient, DriveImage};
#[cfg(feature = "http")]
pub use http::SyncError;
#[cfg(feature = "http")]
pub use sheets::{AUDIT_LOG_HEADERS, AUDIT_LOG_SHEET, SheetRow, SheetsClient};
