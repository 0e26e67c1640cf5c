//! Status codes carried in reply documents.
//!
//! Replies reuse conventional errno values so peers can classify failures
//! without knowing which handler produced them.

/// Success.
pub const OK: i32 = 0;
/// Malformed document, missing or ill-typed attribute, bad regex.
pub const EINVAL: i32 = libc::EINVAL;
/// Named object, set, or message does not exist.
pub const ENOENT: i32 = libc::ENOENT;
/// Unknown handler, schema, or mode.
pub const ENOTSUP: i32 = libc::ENOTSUP;
/// Name or correlation key already in use.
pub const EEXIST: i32 = libc::EEXIST;
/// Allocation failure.
pub const ENOMEM: i32 = libc::ENOMEM;
/// Reply will be delivered asynchronously.
pub const EINPROGRESS: i32 = libc::EINPROGRESS;
/// Record or message larger than allowed.
pub const E2BIG: i32 = libc::E2BIG;
/// Security context check failed.
pub const EACCES: i32 = libc::EACCES;
/// Object is enabled and cannot be changed.
pub const EBUSY: i32 = libc::EBUSY;
/// Peer connection is gone.
pub const ENOTCONN: i32 = libc::ENOTCONN;
/// Transport level I/O failure.
pub const EIO: i32 = libc::EIO;
