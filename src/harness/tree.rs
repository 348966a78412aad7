//! Process-tree accounting and termination.

use std::collections::HashSet;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Aggregate usage of a process and all its descendants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSample {
    pub processes: usize,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Samples process trees. Keeps one `System` so CPU usage has a baseline.
pub struct TreeSampler {
    system: System,
}

impl std::fmt::Debug for TreeSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSampler").finish_non_exhaustive()
    }
}

impl Default for TreeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeSampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Resident memory and CPU summed over `root` and its descendants.
    ///
    /// Returns `None` once `root` no longer exists.
    pub fn sample(&mut self, root: u32) -> Option<TreeSample> {
        refresh(&mut self.system);
        let pids = tree_pids(&self.system, Pid::from_u32(root));
        if pids.is_empty() {
            return None;
        }
        let (memory_bytes, cpu_percent) = pids
            .iter()
            .filter_map(|pid| self.system.process(*pid))
            .fold((0_u64, 0_f32), |(mem, cpu), process| {
                (mem + process.memory(), cpu + process.cpu_usage())
            });
        Some(TreeSample {
            processes: pids.len(),
            memory_bytes,
            cpu_percent,
        })
    }
}

fn refresh(system: &mut System) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_memory().with_cpu(),
    );
}

/// `root` followed by every descendant, found through parent links.
/// Threads listed as tasks are skipped.
fn tree_pids(system: &System, root: Pid) -> Vec<Pid> {
    if system.process(root).is_none() {
        return Vec::new();
    }
    let mut tree = vec![root];
    let mut seen: HashSet<Pid> = HashSet::from([root]);
    let mut index = 0;
    while index < tree.len() {
        let parent = tree[index];
        for (pid, process) in system.processes() {
            if process.thread_kind().is_none() && process.parent() == Some(parent) && seen.insert(*pid) {
                tree.push(*pid);
            }
        }
        index += 1;
    }
    tree
}

/// Live PIDs in the tree rooted at `root` (root first).
#[must_use]
pub fn tree_members(root: u32) -> Vec<u32> {
    let mut system = System::new();
    refresh(&mut system);
    tree_pids(&system, Pid::from_u32(root))
        .into_iter()
        .map(Pid::as_u32)
        .collect()
}

/// Force-kills `root` and every descendant. Returns the PIDs signalled.
///
/// Descendants are collected before any signal is sent, so children that
/// get re-parented while the tree dies are still reached.
pub fn terminate_tree(root: u32) -> Vec<u32> {
    let members = tree_members(root);
    if members.is_empty() {
        debug!(root, "process tree already gone");
        return members;
    }
    // Checked before any signal: a killed root can be reaped before killpg.
    let leads_group = leads_own_group(root);
    // Leaves first, so parents cannot respawn children mid-kill.
    for pid in members.iter().rev() {
        kill_process(*pid);
    }
    if leads_group {
        kill_group(root);
    } else {
        debug!(root, "root does not lead its process group, group kill skipped");
    }
    info!(root, processes = members.len(), "killed process tree");
    members
}

/// Waits until none of `pids` exists, up to `timeout`.
pub async fn wait_for_exit(pids: &[u32], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut system = System::new();
    loop {
        let wanted: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        system.refresh_processes(ProcessesToUpdate::Some(&wanted), true);
        let alive = wanted
            .iter()
            .filter(|pid| system.process(**pid).is_some_and(is_alive))
            .count();
        if alive == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(alive, "processes still present after kill");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn is_alive(process: &sysinfo::Process) -> bool {
    !matches!(
        process.status(),
        sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead
    )
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "kill failed");
    }
}

/// True when `pid` is the leader of its process group. Only then is the
/// group private to the tree; otherwise it may hold unrelated jobs.
#[cfg(unix)]
fn leads_own_group(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: getpgid(2) has no memory-safety preconditions.
    unsafe { libc::getpgid(raw) == raw }
}

#[cfg(not(unix))]
fn leads_own_group(_pid: u32) -> bool {
    false
}

/// The supervised child leads its own process group; reach stragglers there.
#[cfg(unix)]
fn kill_group(root: u32) {
    let Ok(raw) = libc::pid_t::try_from(root) else {
        return;
    };
    // SAFETY: killpg(2) has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(raw, libc::SIGKILL) };
    if rc != 0 {
        debug!(root, error = %std::io::Error::last_os_error(), "process group kill skipped");
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    if let Some(process) = system.process(pid)
        && !process.kill()
    {
        debug!(pid = pid.as_u32(), "kill failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_root: u32) {}
