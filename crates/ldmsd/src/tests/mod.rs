//! Test suites for the ldmsd daemon.

mod forward_behaviour;
pub(crate) mod support;

use crate::status;

/// Resolves a status name used in feature files.
pub(crate) fn status_named(name: &str) -> Result<i32, String> {
    let code = match name {
        "ok" => status::OK,
        "EINVAL" => status::EINVAL,
        "ENOENT" => status::ENOENT,
        "ENOTSUP" => status::ENOTSUP,
        "EEXIST" => status::EEXIST,
        "EACCES" => status::EACCES,
        "EBUSY" => status::EBUSY,
        "ENOTCONN" => status::ENOTCONN,
        "EIO" => status::EIO,
        "E2BIG" => status::E2BIG,
        other => return Err(format!("unknown status name '{other}'")),
    };
    Ok(code)
}
