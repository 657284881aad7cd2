//! Spritefield -- main loop and application entry point.
//!
//! Architecture: winit drives the event loop via `ApplicationHandler`. Each
//! `RedrawRequested` iteration does one pass of the pipeline:
//!
//!   1. `clock.begin_frame()` -- frame index + FPS bookkeeping
//!   2. `field.step(Approach)` -- constant forward drift, one step per frame
//!   3. Rebuild the star mesh from the arena's screen rects and stream it
//!      into GPU buffers; consecutive same-texture quads merge into one
//!      draw call
//!   4. Clear, draw, capture (budget-gated), present, brief sleep
//!
//! Panning runs *outside* the frame loop: key press/release events feed the
//! `MotionController`, which owns one worker thread per held direction.
//! Workers and the frame loop share the arena without a lock; see the
//! `sf_core::field` docs for the per-slot independence argument.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use wgpu::util::DeviceExt;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use sf_core::{
    Direction, Extent, FrameClock, MotionController, PanDirection, StarSpec, Starfield, Viewport,
};
use sf_platform::window::PlatformConfig;
use sf_render::{FrameRecorder, GpuContext, ScreenCamera, SpritePipeline, SpriteVertex, Texture};

const WINDOW_WIDTH: u32 = 1400;
const WINDOW_HEIGHT: u32 = 800;
const STAR_COUNT: usize = 5000;
const STEP_SIZE: i32 = 100;
const STAR_SCALE: f64 = 2.8;
const MOTION_TICK: Duration = Duration::from_millis(10);
const FRAME_DELAY: Duration = Duration::from_millis(1);
const CAPTURE_FRAMES: u32 = 0;
const CAPTURE_WARMUP: u64 = 100;
const CAPTURE_DIR: &str = "captures";
const CAPTURE_SETTLE: Duration = Duration::from_millis(10);
const FPS_LOG_INTERVAL: u64 = 600;
const STAR_ASSETS: [&str; 2] = [
    "assets/textures/star_small.png",
    "assets/textures/star_large.png",
];

/// A contiguous run of indices that share the same texture binding.
/// Consecutive quads using the same star texture collapse into a single
/// `draw_indexed` call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DrawCall {
    texture: usize,
    index_start: u32,
    index_count: u32,
}

struct GpuStarTexture {
    texture: Texture,
    bind_group: wgpu::BindGroup,
}

/// All mutable state. Constructed lazily in `ApplicationHandler::resumed`
/// once the window and GPU surface are available.
struct FieldState {
    window: Arc<Window>,
    gpu: GpuContext,
    clock: FrameClock,
    sprite_pipeline: SpritePipeline,
    // Slot per entry in STAR_ASSETS; None means the asset failed to load
    // and its stars were skipped at setup.
    textures: Vec<Option<GpuStarTexture>>,
    field: Arc<Starfield>,
    motion: MotionController,
    recorder: FrameRecorder,

    // --- Per-frame GPU mesh state -----------------------------------------
    // The star mesh is rebuilt on the CPU each frame, then streamed into
    // these buffers. Buffers grow (power-of-two) but never shrink.
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    mesh_vertex_capacity: usize,
    mesh_index_capacity: usize,
    draw_calls: Vec<DrawCall>,
}

impl FieldState {
    fn new(window: Arc<Window>) -> Self {
        let gpu = GpuContext::new(window.clone());
        let sprite_pipeline = SpritePipeline::new(&gpu.device, gpu.surface_format);

        let textures = load_star_textures(&gpu, &sprite_pipeline);
        let specs = build_star_specs(&textures);
        if specs.is_empty() {
            log::error!("No star textures could be loaded; the field is empty");
        }
        let field = Arc::new(Starfield::new(
            Viewport {
                width: WINDOW_WIDTH as i32,
                height: WINDOW_HEIGHT as i32,
            },
            STEP_SIZE,
            specs,
        ));
        log::info!("Field built: {} stars", field.len());

        let motion = MotionController::new(Arc::clone(&field), MOTION_TICK);
        let recorder = FrameRecorder::new(CAPTURE_DIR, CAPTURE_WARMUP, CAPTURE_FRAMES);

        // The camera never moves (screen rects are already camera-relative),
        // so its uniform is uploaded exactly once.
        let camera = ScreenCamera::new(WINDOW_WIDTH, WINDOW_HEIGHT);
        let camera_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Camera Uniform Buffer"),
                contents: bytemuck::cast_slice(&[camera.build_uniform()]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let camera_bind_group =
            sprite_pipeline.create_camera_bind_group(&gpu.device, &camera_buffer);
        let vertex_buffer = create_vertex_buffer(&gpu.device, 1);
        let index_buffer = create_index_buffer(&gpu.device, 1);

        Self {
            window,
            gpu,
            clock: FrameClock::new(),
            sprite_pipeline,
            textures,
            field,
            motion,
            recorder,
            vertex_buffer,
            index_buffer,
            camera_bind_group,
            mesh_vertex_capacity: 0,
            mesh_index_capacity: 0,
            draw_calls: Vec::new(),
        }
    }

    fn rebuild_field_mesh(&mut self) {
        let mut vertices = Vec::with_capacity(self.field.len() * 4);
        let mut indices = Vec::with_capacity(self.field.len() * 6);
        let mut draw_calls = Vec::with_capacity(4);

        for slot in self.field.slots() {
            let rect = slot.rect();
            let base_index = vertices.len() as u32;
            let x = rect.x as f32;
            let y = rect.y as f32;
            let w = rect.w as f32;
            let h = rect.h as f32;
            vertices.push(SpriteVertex {
                position: [x, y],
                tex_coords: [0.0, 0.0],
            });
            vertices.push(SpriteVertex {
                position: [x + w, y],
                tex_coords: [1.0, 0.0],
            });
            vertices.push(SpriteVertex {
                position: [x + w, y + h],
                tex_coords: [1.0, 1.0],
            });
            vertices.push(SpriteVertex {
                position: [x, y + h],
                tex_coords: [0.0, 1.0],
            });

            let draw_start = indices.len() as u32;
            indices.extend_from_slice(&[
                base_index,
                base_index + 1,
                base_index + 2,
                base_index,
                base_index + 2,
                base_index + 3,
            ]);
            push_draw_call(&mut draw_calls, slot.texture(), draw_start, 6);
        }

        self.ensure_mesh_capacity(vertices.len(), indices.len());
        self.draw_calls = draw_calls;

        if !vertices.is_empty() {
            self.gpu
                .queue
                .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        }
        if !indices.is_empty() {
            self.gpu
                .queue
                .write_buffer(&self.index_buffer, 0, bytemuck::cast_slice(&indices));
        }
    }

    fn ensure_mesh_capacity(&mut self, vertex_count: usize, index_count: usize) {
        let needed_vertices = vertex_count.max(1);
        if needed_vertices > self.mesh_vertex_capacity {
            self.mesh_vertex_capacity = needed_vertices.next_power_of_two();
            self.vertex_buffer = create_vertex_buffer(&self.gpu.device, self.mesh_vertex_capacity);
        }

        let needed_indices = index_count.max(1);
        if needed_indices > self.mesh_index_capacity {
            self.mesh_index_capacity = needed_indices.next_power_of_two();
            self.index_buffer = create_index_buffer(&self.gpu.device, self.mesh_index_capacity);
        }
    }

    fn redraw(&mut self) {
        self.clock.begin_frame();
        if self.clock.frame_count % FPS_LOG_INTERVAL == 0 {
            log::debug!(
                "frame {}: {:.1} fps, {} motion workers",
                self.clock.frame_count,
                self.clock.smoothed_fps,
                self.motion.active_count()
            );
        }

        // Forward drift happens exactly once per frame; pan steps land
        // asynchronously from the motion workers in between.
        self.field.step(Direction::Approach);
        self.rebuild_field_mesh();

        let Some((output, view)) = self.gpu.begin_frame() else {
            return;
        };

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Field Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });

            render_pass.set_pipeline(&self.sprite_pipeline.render_pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);

            for draw in &self.draw_calls {
                let Some(Some(texture)) = self.textures.get(draw.texture) else {
                    log::warn!("Skipping draw for missing texture slot {}", draw.texture);
                    continue;
                };
                render_pass.set_bind_group(1, &texture.bind_group, &[]);
                render_pass.draw_indexed(
                    draw.index_start..(draw.index_start + draw.index_count),
                    0,
                    0..1,
                );
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        // The capture copy must be submitted before the frame is presented.
        let captured = self
            .recorder
            .maybe_capture(&self.gpu, &output, self.clock.frame_count);
        output.present();

        if captured {
            thread::sleep(CAPTURE_SETTLE);
        }
        thread::sleep(FRAME_DELAY);
    }
}

struct App {
    config: PlatformConfig,
    state: Option<FieldState>,
}

impl App {
    fn new() -> Self {
        // The projection constants bake the viewport in, so the window is
        // opened at exactly that size.
        Self {
            config: PlatformConfig {
                width: WINDOW_WIDTH,
                height: WINDOW_HEIGHT,
                ..PlatformConfig::default()
            },
            state: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let window = sf_platform::window::create_window(event_loop, &self.config);
        self.state = Some(FieldState::new(window));
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let state = match self.state.as_mut() {
            Some(s) => s,
            None => return,
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting.");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key_code) = event.physical_key else {
                    return;
                };
                if key_code == KeyCode::Escape && event.state == ElementState::Pressed {
                    log::info!("Escape pressed, exiting.");
                    event_loop.exit();
                    return;
                }
                // Key repeat needs no filtering: press is idempotent while
                // the direction's worker is live.
                if let Some(dir) = map_key(key_code) {
                    match event.state {
                        ElementState::Pressed => state.motion.press(dir),
                        ElementState::Released => state.motion.release(dir),
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if state.gpu.size.0 == 0 || state.gpu.size.1 == 0 {
                    return;
                }
                state.redraw();
            }

            _ => {}
        }
    }
}

fn create_vertex_buffer(device: &wgpu::Device, vertex_capacity: usize) -> wgpu::Buffer {
    let byte_len = (vertex_capacity * std::mem::size_of::<SpriteVertex>()).max(1) as u64;
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Field Vertex Buffer"),
        size: byte_len,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_index_buffer(device: &wgpu::Device, index_capacity: usize) -> wgpu::Buffer {
    let byte_len = (index_capacity * std::mem::size_of::<u32>()).max(1) as u64;
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Field Index Buffer"),
        size: byte_len,
        usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Append a draw call, merging with the previous one when the texture
/// matches and indices are contiguous. Stars are emitted in arena order, so
/// runs sharing a texture collapse into a single `draw_indexed` call.
fn push_draw_call(
    draw_calls: &mut Vec<DrawCall>,
    texture: usize,
    index_start: u32,
    index_count: u32,
) {
    if let Some(last) = draw_calls.last_mut() {
        let contiguous = last.index_start + last.index_count == index_start;
        if last.texture == texture && contiguous {
            last.index_count += index_count;
            return;
        }
    }
    draw_calls.push(DrawCall {
        texture,
        index_start,
        index_count,
    });
}

fn load_star_textures(gpu: &GpuContext, pipeline: &SpritePipeline) -> Vec<Option<GpuStarTexture>> {
    STAR_ASSETS
        .iter()
        .map(|path| {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("Failed to read star texture '{path}': {err}; its stars are skipped");
                    return None;
                }
            };
            match Texture::from_bytes(&gpu.device, &gpu.queue, &bytes, path) {
                Ok(texture) => {
                    log::info!(
                        "Loaded star texture '{}' ({}x{})",
                        path,
                        texture.size.0,
                        texture.size.1
                    );
                    let bind_group = pipeline.create_texture_bind_group(&gpu.device, &texture);
                    Some(GpuStarTexture {
                        texture,
                        bind_group,
                    })
                }
                Err(err) => {
                    log::warn!("{err}; its stars are skipped");
                    None
                }
            }
        })
        .collect()
}

/// Randomized placement for one star: lateral offset up to twenty viewports
/// out on either side, depth between one and fifty viewport widths, extent
/// scaled once from the texture's intrinsic size.
fn star_spec(rng: &mut impl Rng, texture: usize, texture_size: (u32, u32)) -> StarSpec {
    let sign_x = if rng.random_bool(0.5) { -1 } else { 1 };
    let sign_y = if rng.random_bool(0.5) { -1 } else { 1 };
    StarSpec {
        texture,
        x: sign_x * rng.random_range(0..WINDOW_WIDTH as i32) * 20,
        y: sign_y * rng.random_range(0..WINDOW_HEIGHT as i32) * 20,
        z: rng.random_range(1..=50) * WINDOW_WIDTH as i32,
        extent: Extent {
            w: (texture_size.0 as f64 * STAR_SCALE) as i32,
            h: (texture_size.1 as f64 * STAR_SCALE) as i32,
        },
    }
}

fn build_star_specs(textures: &[Option<GpuStarTexture>]) -> Vec<StarSpec> {
    let mut rng = rand::rng();
    let mut specs = Vec::with_capacity(STAR_COUNT);
    let mut skipped = 0usize;
    for _ in 0..STAR_COUNT {
        let pick = rng.random_range(0..STAR_ASSETS.len());
        match &textures[pick] {
            Some(tex) => specs.push(star_spec(&mut rng, pick, tex.texture.size)),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} stars whose texture failed to load");
    }
    specs
}

fn map_key(key_code: KeyCode) -> Option<PanDirection> {
    match key_code {
        KeyCode::ArrowUp | KeyCode::KeyW => Some(PanDirection::Up),
        KeyCode::ArrowDown | KeyCode::KeyS => Some(PanDirection::Down),
        KeyCode::ArrowLeft | KeyCode::KeyA => Some(PanDirection::Left),
        KeyCode::ArrowRight | KeyCode::KeyD => Some(PanDirection::Right),
        _ => None,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Spritefield starting...");

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app).expect("Event loop error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_calls_merge_contiguous_same_texture_runs() {
        let mut calls = Vec::new();
        push_draw_call(&mut calls, 0, 0, 6);
        push_draw_call(&mut calls, 0, 6, 6);
        push_draw_call(&mut calls, 1, 12, 6);
        push_draw_call(&mut calls, 1, 18, 6);
        push_draw_call(&mut calls, 0, 24, 6);
        assert_eq!(
            calls,
            vec![
                DrawCall {
                    texture: 0,
                    index_start: 0,
                    index_count: 12
                },
                DrawCall {
                    texture: 1,
                    index_start: 12,
                    index_count: 12
                },
                DrawCall {
                    texture: 0,
                    index_start: 24,
                    index_count: 6
                },
            ]
        );
    }

    #[test]
    fn draw_calls_do_not_merge_across_gaps() {
        let mut calls = Vec::new();
        push_draw_call(&mut calls, 0, 0, 6);
        // Same texture but indices skip ahead: must stay separate.
        push_draw_call(&mut calls, 0, 12, 6);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn star_spec_respects_placement_ranges() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let spec = star_spec(&mut rng, 1, (64, 32));
            assert!(spec.x.abs() < WINDOW_WIDTH as i32 * 20);
            assert!(spec.y.abs() < WINDOW_HEIGHT as i32 * 20);
            assert!(spec.z >= WINDOW_WIDTH as i32);
            assert!(spec.z <= 50 * WINDOW_WIDTH as i32);
            assert_eq!(spec.texture, 1);
            assert_eq!(spec.extent.w, (64.0 * STAR_SCALE) as i32);
            assert_eq!(spec.extent.h, (32.0 * STAR_SCALE) as i32);
        }
    }

    #[test]
    fn both_key_rows_map_to_directions() {
        assert_eq!(map_key(KeyCode::ArrowUp), Some(PanDirection::Up));
        assert_eq!(map_key(KeyCode::KeyW), Some(PanDirection::Up));
        assert_eq!(map_key(KeyCode::ArrowDown), Some(PanDirection::Down));
        assert_eq!(map_key(KeyCode::KeyS), Some(PanDirection::Down));
        assert_eq!(map_key(KeyCode::ArrowLeft), Some(PanDirection::Left));
        assert_eq!(map_key(KeyCode::KeyA), Some(PanDirection::Left));
        assert_eq!(map_key(KeyCode::ArrowRight), Some(PanDirection::Right));
        assert_eq!(map_key(KeyCode::KeyD), Some(PanDirection::Right));
        assert_eq!(map_key(KeyCode::Escape), None);
    }
}
