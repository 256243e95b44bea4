//! Update/render handoff for the overlapped frame loop
//!
//! One mutex, one condition variable and an `is_rendering` flag. The update
//! thread publishes a finished draw list and immediately starts simulating
//! the next frame; the render thread presents the published list. The update
//! thread never gets more than one frame ahead: publishing blocks while the
//! previous list is still being presented.

use parking_lot::{Condvar, Mutex};

use crate::sim::render::RenderList;

struct HandoffState {
    is_rendering: bool,
    running: bool,
    list: RenderList,
}

pub struct FrameHandoff {
    state: Mutex<HandoffState>,
    changed: Condvar,
}

impl FrameHandoff {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HandoffState {
                is_rendering: false,
                running: true,
                list: RenderList::with_capacity(capacity),
            }),
            changed: Condvar::new(),
        }
    }

    /// Update side. Waits for the render thread to finish the previous list,
    /// then swaps `list` in. `list` comes back holding the old buffer, ready
    /// to be refilled. Returns false once shut down.
    pub fn publish(&self, list: &mut RenderList) -> bool {
        let mut state = self.state.lock();
        while state.is_rendering && state.running {
            self.changed.wait(&mut state);
        }
        if !state.running {
            return false;
        }

        std::mem::swap(&mut state.list, list);
        state.is_rendering = true;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Render side. Waits for a published list and hands it to `present`.
    /// Returns false when shut down with nothing left to present.
    pub fn present_next(&self, present: impl FnOnce(&RenderList)) -> bool {
        let mut state = self.state.lock();
        while !state.is_rendering && state.running {
            self.changed.wait(&mut state);
        }
        if !state.is_rendering {
            return false;
        }

        present(&state.list);
        state.is_rendering = false;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Wake both sides and refuse further publishing. A list already
    /// published is still presented.
    pub fn shutdown(&self) {
        self.state.lock().running = false;
        self.changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

/// Shuts the handoff down when dropped, so neither side is left waiting if
/// the other exits early or panics
pub struct ShutdownGuard<'a>(pub &'a FrameHandoff);

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
