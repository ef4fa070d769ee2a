//! Per-anchor mutual exclusion.
//!
//! The lock is taken with flock(1) around a child shell, so it is held for
//! exactly the child's lifetime and released on every exit path, including a
//! dropped connection. A contended acquirer blocks until the holder exits.

use sf_remote::{RemotePath, Script, ShellCommand};

use crate::layout::WorkspaceLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorLock {
    anchors_dir: RemotePath,
    lock_path: RemotePath,
}

impl AnchorLock {
    pub fn new(layout: &WorkspaceLayout, repo: &str) -> Self {
        Self {
            anchors_dir: layout.anchors_dir(),
            lock_path: layout.lock_path(repo),
        }
    }

    pub fn lock_path(&self) -> &RemotePath {
        &self.lock_path
    }

    /// `mkdir -p <anchors> && flock <lock> sh -c '<script>'`
    pub fn scope(&self, script: &Script) -> String {
        let mkdir = ShellCommand::new("mkdir").arg("-p").path(&self.anchors_dir);
        let locked = ShellCommand::new("flock")
            .path(&self.lock_path)
            .arg("sh")
            .arg("-c")
            .arg(script.render());
        format!("{} && {}", mkdir.render(), locked.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn flock_available() -> bool {
        Command::new("sh")
            .arg("-c")
            .arg("command -v flock")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn scope_renders_single_round_trip() {
        let layout = WorkspaceLayout::new(RemotePath::absolute("/srv/sf"));
        let lock = AnchorLock::new(&layout, "core");
        let script = Script::new().run(ShellCommand::new("true"));
        assert_eq!(
            lock.scope(&script),
            "'mkdir' '-p' '/srv/sf/anchors' && 'flock' '/srv/sf/anchors/core.lock' 'sh' '-c' 'set -e; '\"'\"'true'\"'\"''"
        );
    }

    #[test]
    fn second_acquirer_waits_for_first_release() {
        if !flock_available() {
            eprintln!("skipping: flock not installed");
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let root = RemotePath::absolute(temp.path().to_string_lossy());
        let layout = WorkspaceLayout::new(root);
        let lock = AnchorLock::new(&layout, "core");
        let log = RemotePath::absolute(temp.path().join("log").to_string_lossy());
        let started = RemotePath::absolute(temp.path().join("started").to_string_lossy());

        let append = |label: &str| {
            ShellCommand::new("sh")
                .arg("-c")
                .arg(format!("echo {label} >> \"$1\""))
                .arg("append")
                .path(&log)
        };
        let first = Script::new()
            .run(ShellCommand::new("touch").path(&started))
            .run(append("first-start"))
            .run(ShellCommand::new("sleep").arg("1"))
            .run(append("first-end"));
        let second = Script::new().run(append("second"));

        let first_cmd = lock.scope(&first);
        let (tx, rx) = mpsc::channel();
        let holder = thread::spawn(move || {
            let status = Command::new("sh")
                .arg("-c")
                .arg(&first_cmd)
                .status()
                .expect("run first");
            tx.send(status.success()).expect("send");
        });

        let started_path = temp.path().join("started");
        for _ in 0..200 {
            if started_path.exists() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(started_path.exists(), "first holder never started");

        let status = Command::new("sh")
            .arg("-c")
            .arg(lock.scope(&second))
            .status()
            .expect("run second");
        assert!(status.success());
        holder.join().expect("join");
        assert!(rx.recv().expect("recv"));

        let log = std::fs::read_to_string(temp.path().join("log")).expect("read log");
        assert_eq!(log, "first-start\nfirst-end\nsecond\n");
    }
}
