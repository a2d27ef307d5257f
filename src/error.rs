//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the cover cache")]
    Storage,
    #[display("could not read catalog {}", _0.display())]
    CatalogRead(#[error(not(source))] PathBuf),
    #[display("could not write catalog {}", _0.display())]
    CatalogWrite(#[error(not(source))] PathBuf),
}
