pub mod arena;
pub mod bytewise_comparator_impl;
pub mod cache;
pub mod coding;
pub mod comparator;
pub(crate) mod crc32c;
#[cfg(unix)]
use libc::c_int;
/// Base flags for opening files on Unix systems, enabling close-on-exec behavior.
#[cfg(unix)]
pub const K_OPEN_BASE_FLAGS: c_int = libc::O_CLOEXEC;
pub mod env;
pub mod filter_policy;
pub mod hash;
pub mod random_access_file;
pub mod statistics;
#[cfg(test)]
pub(crate) mod test_util;
pub mod writable_file;
pub use hash::hash;
