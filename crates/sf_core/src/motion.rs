//! Continuous-motion workers driven by key press/release.
//!
//! Each held directional key owns at most one worker thread that applies a
//! pan step to the shared arena every tick until told to stop. Membership
//! is tracked explicitly per direction in one mutex-guarded table, so
//! simultaneous directions (diagonal panning) compose and release
//! independently. Cancellation is cooperative: `release` raises the
//! worker's stop flag and joins it, which bounds the wait by one tick and
//! means a re-press can never race a stale worker for the same direction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::field::{Direction, Starfield};

/// The four pannable directions. `Direction::Approach` is the frame loop's
/// own drift step and never runs on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanDirection {
    Up,
    Down,
    Left,
    Right,
}

impl PanDirection {
    pub const ALL: [PanDirection; 4] = [
        PanDirection::Up,
        PanDirection::Down,
        PanDirection::Left,
        PanDirection::Right,
    ];

    pub fn direction(self) -> Direction {
        match self {
            Self::Up => Direction::Up,
            Self::Down => Direction::Down,
            Self::Left => Direction::Left,
            Self::Right => Direction::Right,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
        }
    }
}

impl std::fmt::Display for PanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.direction(), f)
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the per-direction worker table and the shared arena handle.
pub struct MotionController {
    field: Arc<Starfield>,
    tick: Duration,
    workers: Mutex<[Option<Worker>; 4]>,
    started: AtomicU64,
}

impl MotionController {
    pub fn new(field: Arc<Starfield>, tick: Duration) -> Self {
        Self {
            field,
            tick,
            workers: Mutex::new([None, None, None, None]),
            started: AtomicU64::new(0),
        }
    }

    fn table(&self) -> MutexGuard<'_, [Option<Worker>; 4]> {
        self.workers.lock().expect("motion worker table poisoned")
    }

    /// Key-down: start a worker for `dir` unless one is already live.
    /// Repeated presses without a release are no-ops, so OS key repeat
    /// needs no filtering upstream.
    pub fn press(&self, dir: PanDirection) {
        let mut table = self.table();
        if table[dir.index()].is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let field = Arc::clone(&self.field);
        let tick = self.tick;
        let handle = thread::Builder::new()
            .name(format!("motion-{dir}"))
            .spawn(move || {
                log::debug!("motion worker running: {dir}");
                while !flag.load(Relaxed) {
                    field.step(dir.direction());
                    thread::sleep(tick);
                }
            })
            .expect("failed to spawn motion worker");

        self.started.fetch_add(1, Relaxed);
        table[dir.index()] = Some(Worker { stop, handle });
    }

    /// Key-up: stop and join the worker for exactly `dir`, if any. Other
    /// directions' workers are untouched.
    pub fn release(&self, dir: PanDirection) {
        let worker = self.table()[dir.index()].take();
        let Some(worker) = worker else {
            return;
        };
        worker.stop.store(true, Relaxed);
        if worker.handle.join().is_err() {
            log::warn!("motion worker for {dir} panicked");
        }
        log::debug!("motion worker stopped: {dir}");
    }

    pub fn active(&self, dir: PanDirection) -> bool {
        self.table()[dir.index()].is_some()
    }

    pub fn active_count(&self) -> usize {
        self.table().iter().filter(|w| w.is_some()).count()
    }

    /// Total workers ever started. Observable so tests can pin down the
    /// press-idempotence contract.
    pub fn started_count(&self) -> u64 {
        self.started.load(Relaxed)
    }
}

impl Drop for MotionController {
    fn drop(&mut self) {
        for dir in PanDirection::ALL {
            self.release(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Extent, StarSpec, Viewport};

    const STEP: i32 = 100;
    const TICK: Duration = Duration::from_millis(2);

    fn test_field() -> Arc<Starfield> {
        let specs = (0..4)
            .map(|i| StarSpec {
                texture: 0,
                x: i * 10,
                y: i * -5,
                z: 40_000,
                extent: Extent { w: 100, h: 50 },
            })
            .collect();
        Arc::new(Starfield::new(
            Viewport {
                width: 1400,
                height: 800,
            },
            STEP,
            specs,
        ))
    }

    #[test]
    fn press_is_idempotent_while_held() {
        let controller = MotionController::new(test_field(), TICK);
        controller.press(PanDirection::Up);
        controller.press(PanDirection::Up);
        controller.press(PanDirection::Up);
        assert_eq!(controller.started_count(), 1);
        assert!(controller.active(PanDirection::Up));
        assert_eq!(controller.active_count(), 1);
    }

    #[test]
    fn release_clears_membership_and_stops_motion() {
        let field = test_field();
        let controller = MotionController::new(Arc::clone(&field), TICK);
        controller.press(PanDirection::Left);
        thread::sleep(TICK * 5);
        controller.release(PanDirection::Left);
        assert!(!controller.active(PanDirection::Left));

        // The worker is joined, so no further steps can land.
        let x_after = field.slots()[0].position().0;
        thread::sleep(TICK * 5);
        assert_eq!(field.slots()[0].position().0, x_after);
        assert!(x_after > 0, "worker should have stepped at least once");
    }

    #[test]
    fn release_without_press_is_a_no_op() {
        let controller = MotionController::new(test_field(), TICK);
        controller.release(PanDirection::Down);
        assert_eq!(controller.started_count(), 0);
        assert_eq!(controller.active_count(), 0);
    }

    #[test]
    fn re_press_after_release_starts_a_fresh_worker() {
        let controller = MotionController::new(test_field(), TICK);
        controller.press(PanDirection::Right);
        controller.release(PanDirection::Right);
        controller.press(PanDirection::Right);
        assert_eq!(controller.started_count(), 2);
        assert!(controller.active(PanDirection::Right));
    }

    #[test]
    fn concurrent_directions_compose_additively() {
        let field = test_field();
        let before: Vec<_> = field.slots().iter().map(|s| s.position()).collect();

        let controller = MotionController::new(Arc::clone(&field), TICK);
        controller.press(PanDirection::Up);
        controller.press(PanDirection::Left);
        assert_eq!(controller.active_count(), 2);
        thread::sleep(Duration::from_millis(40));
        controller.release(PanDirection::Up);
        controller.release(PanDirection::Left);

        // Each axis is driven by exactly one worker, so the deltas are
        // positive whole multiples of the step size on every slot.
        for (slot, (x0, y0, _)) in field.slots().iter().zip(before) {
            let (x, y, _) = slot.position();
            let dx = x - x0;
            let dy = y - y0;
            assert!(dx > 0 && dx % STEP == 0, "dx = {dx}");
            assert!(dy > 0 && dy % STEP == 0, "dy = {dy}");
        }
    }

    #[test]
    fn releasing_one_direction_leaves_the_other_running() {
        let field = test_field();
        let controller = MotionController::new(Arc::clone(&field), TICK);
        controller.press(PanDirection::Up);
        controller.press(PanDirection::Left);
        controller.release(PanDirection::Up);
        assert!(!controller.active(PanDirection::Up));
        assert!(controller.active(PanDirection::Left));
        assert_eq!(controller.active_count(), 1);
    }

    #[test]
    fn drop_stops_all_workers() {
        let field = test_field();
        {
            let controller = MotionController::new(Arc::clone(&field), TICK);
            controller.press(PanDirection::Up);
            controller.press(PanDirection::Down);
            controller.press(PanDirection::Left);
            controller.press(PanDirection::Right);
        }
        // Controller dropped: every worker joined, positions are stable.
        let before: Vec<_> = field.slots().iter().map(|s| s.position()).collect();
        thread::sleep(TICK * 5);
        let after: Vec<_> = field.slots().iter().map(|s| s.position()).collect();
        assert_eq!(before, after);
    }
}
