//! Process tree termination
//!
//! Providers are spawned as the leader of their own process group, so killing the
//! group also reaches any grandchildren they started (e.g. `npx` wrappers spawning
//! `node`). Where group signaling is unavailable or fails, only the direct child is
//! killed.

use tokio::process::Child;
use tracing::{debug, warn};

/// Best-effort forceful termination of a child and its process group.
///
/// Returns an error only when not even the direct child could be signaled.
pub fn terminate_tree(provider_id: &str, child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                debug!(provider_id = %provider_id, pid, "Sent SIGKILL to process group");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    provider_id = %provider_id,
                    pid,
                    error = ?e,
                    "killpg SIGKILL failed, falling back to single-process kill"
                );
            }
        }
    }

    debug!(provider_id = %provider_id, pid, "Killing provider process");
    child.start_kill()
}
