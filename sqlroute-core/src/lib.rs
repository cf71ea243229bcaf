pub mod error;
pub mod format;
pub mod host;
pub mod timestamp;
pub mod traits;
pub mod value;

pub use error::*;
pub use format::*;
pub use host::*;
pub use timestamp::*;
pub use traits::*;
pub use value::*;
