//! Star arena, stepper, and perspective projection.
//!
//! The arena is a fixed pool: stars are created once at startup and recycled
//! to the back of the field when they pass through the screen plane, never
//! destroyed. Positions and the derived screen rects live in per-slot atomic
//! cells so the frame loop's approach step, any live motion workers, and the
//! render read can all touch the arena without a lock. Every update is a
//! read-modify-write of one slot's own cells; a reader racing a writer can
//! observe a torn rect for a frame, but the arena never changes shape.

use std::sync::atomic::{AtomicI32, Ordering::Relaxed};

/// Multiple of the viewport width a star is pushed back to when it would
/// cross the screen plane.
pub const RESPAWN_FACTOR: i32 = 50;

/// One movement increment, applied to the whole arena in a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Constant forward drift: stars fly toward the viewer.
    Approach,
    Up,
    Down,
    Left,
    Right,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Approach => "approach",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

/// Real-space size of a star, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub w: i32,
    pub h: i32,
}

/// Derived screen-space rectangle, top-left origin. Always a cache; the
/// authoritative state is the real-space position it was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Perspective divide from real space to screen space. The viewport height
/// is the focal-scale constant for both axes, so aspect is preserved by a
/// single factor. Callers must keep `z > 0`; the stepper's recycling policy
/// guarantees this.
pub fn project(extent: Extent, x: i32, y: i32, z: i32, viewport: Viewport) -> ScreenRect {
    let zf = z as f64;
    let hf = viewport.height as f64;
    ScreenRect {
        w: (extent.w as f64 * hf / zf) as i32,
        h: (extent.h as f64 * hf / zf) as i32,
        x: (x as f64 * hf / zf + (viewport.width / 2) as f64) as i32,
        y: (y as f64 * hf / zf + (viewport.height / 2) as f64) as i32,
    }
}

/// Creation-time description of one star.
#[derive(Debug, Clone, Copy)]
pub struct StarSpec {
    /// Index into the caller's texture table.
    pub texture: usize,
    pub x: i32,
    pub y: i32,
    /// Initial depth, must be positive.
    pub z: i32,
    pub extent: Extent,
}

/// One arena slot. Position and rect cells are independently atomic; the
/// texture index and extent are immutable after creation.
pub struct StarSlot {
    texture: usize,
    extent: Extent,
    x: AtomicI32,
    y: AtomicI32,
    z: AtomicI32,
    rect_x: AtomicI32,
    rect_y: AtomicI32,
    rect_w: AtomicI32,
    rect_h: AtomicI32,
}

impl StarSlot {
    fn new(spec: StarSpec) -> Self {
        debug_assert!(spec.z > 0, "star created at non-positive depth");
        Self {
            texture: spec.texture,
            extent: spec.extent,
            x: AtomicI32::new(spec.x),
            y: AtomicI32::new(spec.y),
            z: AtomicI32::new(spec.z),
            rect_x: AtomicI32::new(0),
            rect_y: AtomicI32::new(0),
            rect_w: AtomicI32::new(0),
            rect_h: AtomicI32::new(0),
        }
    }

    pub fn texture(&self) -> usize {
        self.texture
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Real-space position as of the last completed update.
    pub fn position(&self) -> (i32, i32, i32) {
        (
            self.x.load(Relaxed),
            self.y.load(Relaxed),
            self.z.load(Relaxed),
        )
    }

    /// Screen rect as of the last projection.
    pub fn rect(&self) -> ScreenRect {
        ScreenRect {
            x: self.rect_x.load(Relaxed),
            y: self.rect_y.load(Relaxed),
            w: self.rect_w.load(Relaxed),
            h: self.rect_h.load(Relaxed),
        }
    }

    fn reproject(&self, viewport: Viewport) {
        let (x, y, z) = self.position();
        let rect = project(self.extent, x, y, z, viewport);
        self.rect_x.store(rect.x, Relaxed);
        self.rect_y.store(rect.y, Relaxed);
        self.rect_w.store(rect.w, Relaxed);
        self.rect_h.store(rect.h, Relaxed);
    }
}

/// Fixed-size star arena. Length is constant for the process lifetime.
pub struct Starfield {
    slots: Box<[StarSlot]>,
    viewport: Viewport,
    step_size: i32,
    respawn_depth: i32,
}

impl Starfield {
    pub fn new(viewport: Viewport, step_size: i32, specs: Vec<StarSpec>) -> Self {
        let field = Self {
            slots: specs.into_iter().map(StarSlot::new).collect(),
            viewport,
            step_size,
            respawn_depth: RESPAWN_FACTOR * viewport.width,
        };
        for slot in field.slots.iter() {
            slot.reproject(viewport);
        }
        field
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn respawn_depth(&self) -> i32 {
        self.respawn_depth
    }

    pub fn slots(&self) -> &[StarSlot] {
        &self.slots
    }

    /// Advance every star by one increment in `direction` and re-project its
    /// rect. Slots are visited in index order within one call; there is no
    /// ordering guarantee against concurrent `step` calls from motion
    /// workers, which is fine; see the module docs.
    pub fn step(&self, direction: Direction) {
        for slot in self.slots.iter() {
            match direction {
                Direction::Approach => {
                    let z = slot.z.load(Relaxed);
                    if z - self.step_size > 0 {
                        slot.z.store(z - self.step_size, Relaxed);
                    } else {
                        // Passed through the screen plane: recycle to the
                        // back of the field on the same depth ray.
                        slot.z.store(self.respawn_depth, Relaxed);
                    }
                }
                Direction::Up => {
                    slot.y.fetch_add(self.step_size, Relaxed);
                }
                Direction::Down => {
                    slot.y.fetch_sub(self.step_size, Relaxed);
                }
                Direction::Left => {
                    slot.x.fetch_add(self.step_size, Relaxed);
                }
                Direction::Right => {
                    slot.x.fetch_sub(self.step_size, Relaxed);
                }
            }
            slot.reproject(self.viewport);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Viewport = Viewport {
        width: 1400,
        height: 800,
    };
    const STEP: i32 = 100;

    fn single_star(x: i32, y: i32, z: i32) -> Starfield {
        Starfield::new(
            VIEWPORT,
            STEP,
            vec![StarSpec {
                texture: 0,
                x,
                y,
                z,
                extent: Extent { w: 100, h: 50 },
            }],
        )
    }

    #[test]
    fn projection_at_focal_depth_is_identity_sized_and_centered() {
        let rect = project(
            Extent { w: 100, h: 50 },
            0,
            0,
            VIEWPORT.height,
            VIEWPORT,
        );
        assert_eq!(rect.w, 100);
        assert_eq!(rect.h, 50);
        assert_eq!(rect.x, VIEWPORT.width / 2);
        assert_eq!(rect.y, VIEWPORT.height / 2);
    }

    #[test]
    fn projection_shrinks_with_depth() {
        let extent = Extent { w: 100, h: 50 };
        let near = project(extent, 0, 0, VIEWPORT.height, VIEWPORT);
        let far = project(extent, 0, 0, VIEWPORT.height * 4, VIEWPORT);
        assert_eq!(far.w, near.w / 4);
        assert_eq!(far.h, near.h / 4);
    }

    #[test]
    fn rect_cache_tracks_position_after_step() {
        let field = single_star(0, 0, VIEWPORT.height + STEP);
        field.step(Direction::Approach);
        let slot = &field.slots()[0];
        let (x, y, z) = slot.position();
        assert_eq!(z, VIEWPORT.height);
        assert_eq!(slot.rect(), project(slot.extent(), x, y, z, VIEWPORT));
    }

    #[test]
    fn approach_never_leaves_non_positive_depth() {
        let field = single_star(30, -40, 5 * STEP);
        for _ in 0..500 {
            field.step(Direction::Approach);
            let (_, _, z) = field.slots()[0].position();
            assert!(z > 0, "depth went non-positive: {z}");
        }
    }

    #[test]
    fn recycle_resets_depth_and_keeps_lateral_position() {
        let field = single_star(30, -40, STEP);
        // z - STEP would be 0, so this step must recycle.
        field.step(Direction::Approach);
        let (x, y, z) = field.slots()[0].position();
        assert_eq!(z, field.respawn_depth());
        assert_eq!(z, RESPAWN_FACTOR * VIEWPORT.width);
        assert_eq!(x, 30);
        assert_eq!(y, -40);
    }

    #[test]
    fn pan_up_then_down_restores_y() {
        let field = single_star(12, 34, 4000);
        field.step(Direction::Up);
        field.step(Direction::Down);
        let (x, y, _) = field.slots()[0].position();
        assert_eq!((x, y), (12, 34));
    }

    #[test]
    fn pan_left_then_right_restores_x() {
        let field = single_star(12, 34, 4000);
        field.step(Direction::Left);
        field.step(Direction::Right);
        let (x, y, _) = field.slots()[0].position();
        assert_eq!((x, y), (12, 34));
    }

    #[test]
    fn pan_signs_mirror_camera_motion() {
        let field = single_star(0, 0, 4000);
        field.step(Direction::Up);
        assert_eq!(field.slots()[0].position().1, STEP);
        field.step(Direction::Left);
        assert_eq!(field.slots()[0].position().0, STEP);
    }

    #[test]
    fn arena_length_is_constant() {
        let specs = (0..64)
            .map(|i| StarSpec {
                texture: i % 2,
                x: i as i32 * 7,
                y: i as i32 * -3,
                z: 1000 + i as i32,
                extent: Extent { w: 10, h: 10 },
            })
            .collect();
        let field = Starfield::new(VIEWPORT, STEP, specs);
        assert_eq!(field.len(), 64);
        for _ in 0..200 {
            field.step(Direction::Approach);
            field.step(Direction::Left);
        }
        assert_eq!(field.len(), 64);
    }

    #[test]
    fn step_moves_every_slot() {
        let specs = (0..8)
            .map(|i| StarSpec {
                texture: 0,
                x: i,
                y: 0,
                z: 4000,
                extent: Extent { w: 10, h: 10 },
            })
            .collect();
        let field = Starfield::new(VIEWPORT, STEP, specs);
        field.step(Direction::Right);
        for (i, slot) in field.slots().iter().enumerate() {
            assert_eq!(slot.position().0, i as i32 - STEP);
        }
    }
}
