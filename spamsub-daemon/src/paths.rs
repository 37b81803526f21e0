use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn spamsub_root(home: &Path) -> PathBuf {
    spamsub_core::config::spamsub_dir_path(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    spamsub_root(home).join(DAEMON_SOCKET)
}
