pub mod codes;
pub mod ffi;
pub mod sdk;
pub mod types;

pub use codes::SdkError;
pub use sdk::*;
pub use types::*;
