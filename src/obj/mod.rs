pub mod options;
pub mod slice;
pub mod status;
