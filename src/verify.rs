//! Password verification through the external `7z` utility.
//!
//! Each candidate costs one child process: `7z t <archive> -p<password> -y`
//! with all output suppressed. An exit status of zero is the only accept
//! signal; anything else, including a failure to spawn, counts as a reject.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::LaunchError;
use crate::status;

#[cfg(windows)]
pub const VERIFIER_EXE: &str = "7z.exe";
#[cfg(not(windows))]
pub const VERIFIER_EXE: &str = "7z";

/// Answers accept/reject for a candidate password. Implementations are
/// stateless from the caller's point of view and may be invoked from many
/// worker threads at once.
pub trait PasswordVerifier: Sync {
    fn test(&self, password: &str) -> bool;
}

/// The production verifier: one `7z` test invocation per candidate.
pub struct SevenZipVerifier {
    binary: PathBuf,
    archive: PathBuf,
}

impl SevenZipVerifier {
    pub fn new(binary: PathBuf, archive: PathBuf) -> Self {
        Self { binary, archive }
    }
}

impl PasswordVerifier for SevenZipVerifier {
    fn test(&self, password: &str) -> bool {
        // Command hands the arguments to the OS as-is; the platform layer
        // performs whatever encoding translation the host requires.
        match Command::new(&self.binary)
            .arg("t")
            .arg(&self.archive)
            .arg(format!("-p{password}"))
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(result) => result.success(),
            Err(err) => {
                status::warn(&format!("failed to spawn the verifier: {err}"));
                false
            }
        }
    }
}

/// Locates the verifier binary: `bin/` next to this executable, then the
/// parent directory's `bin/`, then (on Unix) every entry of `PATH`.
pub fn locate_verifier() -> Result<PathBuf, LaunchError> {
    let exe = std::env::current_exe().map_err(|_| LaunchError::ExecutableDirUnknown)?;
    let exe_dir = exe
        .parent()
        .ok_or(LaunchError::ExecutableDirUnknown)?
        .to_path_buf();
    status::info(&format!("running from: {}", exe_dir.display()));

    let adjacent = exe_dir.join("bin").join(VERIFIER_EXE);
    status::info(&format!("checking for verifier at {}", adjacent.display()));
    if adjacent.is_file() {
        return Ok(adjacent);
    }

    let parent = exe_dir.join("..").join("bin").join(VERIFIER_EXE);
    status::info(&format!("checking for verifier at {}", parent.display()));
    if parent.is_file() {
        return Ok(parent);
    }

    #[cfg(unix)]
    {
        status::info("verifier not found next to the executable, checking PATH");
        if let Some(path) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path) {
                let candidate = dir.join(VERIFIER_EXE);
                if candidate.is_file() {
                    status::info(&format!("found verifier on PATH: {}", candidate.display()));
                    return Ok(candidate);
                }
            }
        }
    }

    Err(LaunchError::VerifierMissing(VERIFIER_EXE.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_counts_as_reject() {
        let verifier = SevenZipVerifier::new(
            PathBuf::from("/nonexistent/verifier-binary"),
            PathBuf::from("archive.7z"),
        );
        assert!(!verifier.test("secret"));
    }
}
