//! Error kinds surfaced across crate boundaries.
//!
//! Per the directory layer's contract, most operations report failure as a
//! plain `bool`/`Option` (name too long, duplicate name, lookup miss, wrong
//! entry kind): no error value carries information a caller would act on
//! differently. `Error` exists only for the one case that does.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file offset exceeds the inode's direct-block capacity")]
    FileTooLarge,
}
