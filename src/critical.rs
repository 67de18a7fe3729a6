//! Non-preemptible sections around teardown callbacks

/// Runs user callbacks that must not be preempted halfway, such as the
/// notifications fired by reset, abort and transfer completion.
pub trait CriticalSection: Send + Sync {
    fn run(&self, f: &mut dyn FnMut());
}

/// Runs the closure as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBoost;

impl CriticalSection for NoBoost {
    fn run(&self, f: &mut dyn FnMut()) {
        f()
    }
}

/// Raises the calling thread to a fixed priority for the duration of the
/// closure and restores the previous priority afterwards.
///
/// On Linux the priority is the thread's nice value. If the raise is not
/// permitted the closure still runs at the current priority.
#[derive(Debug, Clone, Copy)]
pub struct PriorityBoost {
    nice: i32,
}

impl PriorityBoost {
    pub const DMA_CRITICAL: PriorityBoost = PriorityBoost { nice: -10 };

    pub const fn new(nice: i32) -> PriorityBoost {
        PriorityBoost { nice }
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }
}

impl Default for PriorityBoost {
    fn default() -> Self {
        PriorityBoost::DMA_CRITICAL
    }
}

#[cfg(target_os = "linux")]
mod imp {
    fn thread_id() -> libc::id_t {
        unsafe { libc::syscall(libc::SYS_gettid) as libc::id_t }
    }

    pub fn current() -> Option<i32> {
        unsafe {
            // getpriority can legitimately return -1, so errno decides.
            *libc::__errno_location() = 0;
            let prio = libc::getpriority(libc::PRIO_PROCESS, thread_id());
            if prio == -1 && *libc::__errno_location() != 0 {
                None
            } else {
                Some(prio)
            }
        }
    }

    pub fn set(nice: i32) -> bool {
        unsafe { libc::setpriority(libc::PRIO_PROCESS, thread_id(), nice) == 0 }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    pub fn current() -> Option<i32> {
        None
    }

    pub fn set(_nice: i32) -> bool {
        false
    }
}

impl CriticalSection for PriorityBoost {
    fn run(&self, f: &mut dyn FnMut()) {
        let previous = imp::current();
        let raised = match previous {
            Some(prev) if prev > self.nice => {
                let ok = imp::set(self.nice);
                if !ok {
                    log::debug!(
                        "could not raise thread priority to {}: {}",
                        self.nice,
                        std::io::Error::last_os_error()
                    );
                }
                ok
            }
            _ => false,
        };

        f();

        if raised {
            if let Some(prev) = previous {
                if !imp::set(prev) {
                    log::warn!("could not restore thread priority {}", prev);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_always_run() {
        let mut ran = 0;
        NoBoost.run(&mut || ran += 1);
        PriorityBoost::default().run(&mut || ran += 1);
        assert_eq!(ran, 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn priority_is_restored() {
        let before = imp::current();
        PriorityBoost::new(-5).run(&mut || {});
        assert_eq!(imp::current(), before);
    }
}
