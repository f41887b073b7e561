mod errors;
mod shutdown;

pub use self::errors::{Error, ErrorKind, Result};
pub use self::shutdown::Shutdown;
