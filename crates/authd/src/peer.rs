//! Peer admission from `SO_PEERCRED`.
//!
//! The daemon trusts the kernel-reported credentials of the connecting
//! process, not anything in the request. Admission requires the peer uid
//! to be root or a member of the `linuxio` group, either via its primary
//! gid or its supplementary groups.

use std::ffi::CString;

use nix::unistd::{Gid, Group, Uid, User, getgrouplist};
use tracing::warn;

use crate::error::AuthdError;

/// Resolves the admitted group, failing when it is not defined.
pub fn resolve_group(name: &str) -> Result<Gid, AuthdError> {
    match Group::from_name(name)? {
        Some(group) => Ok(group.gid),
        None => Err(AuthdError::GroupMissing(name.to_owned())),
    }
}

/// Decides whether the peer may talk to the daemon.
pub fn peer_allowed(uid: u32, gid: u32, admitted: Gid) -> Result<bool, AuthdError> {
    let uid = Uid::from_raw(uid);
    if uid.is_root() {
        return Ok(true);
    }
    if Gid::from_raw(gid) == admitted {
        return Ok(true);
    }

    let Some(user) = User::from_uid(uid)? else {
        warn!(uid = uid.as_raw(), "peer uid has no account");
        return Ok(false);
    };
    let name = CString::new(user.name.as_bytes()).map_err(|_| {
        AuthdError::MalformedRequest("peer account name embeds NUL".to_owned())
    })?;
    let groups = getgrouplist(&name, user.gid)?;
    Ok(groups.contains(&admitted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_admitted() {
        let admitted = Gid::from_raw(65_534);
        assert!(peer_allowed(0, 0, admitted).expect("check succeeds"));
    }

    #[test]
    fn primary_gid_match_is_admitted_without_lookup() {
        let admitted = Gid::from_raw(4242);
        assert!(peer_allowed(12_345, 4242, admitted).expect("check succeeds"));
    }

    #[test]
    fn unknown_uid_is_rejected() {
        // uid 2^31-2 should not exist on any test host.
        let admitted = Gid::from_raw(4242);
        assert!(!peer_allowed(2_147_483_646, 1, admitted).expect("check succeeds"));
    }
}
