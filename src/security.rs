#![forbid(unsafe_code)]

//! Process-level guards shared by the tubegrab binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The extractor runs arbitrary
/// site code fetched at download time, so it only ever runs unprivileged.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it under a dedicated service account");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_uid_is_allowed() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "tubegrab backend").is_ok());
    }

    #[test]
    fn root_uid_is_rejected_with_process_name() {
        let err = ensure_not_root_for(Uid::from_raw(0), "tubegrab backend").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("tubegrab backend"));
        assert!(message.contains("must not be run as root"));
    }
}
