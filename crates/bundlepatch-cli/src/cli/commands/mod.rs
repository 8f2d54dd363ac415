pub(crate) mod decompress;
pub(crate) mod export;
pub(crate) mod import;
pub(crate) mod package;
pub(crate) mod reporting;

mod dispatch;

pub use dispatch::dispatch;
