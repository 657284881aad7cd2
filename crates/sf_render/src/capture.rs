//! Budgeted frame capture.
//!
//! Snapshots of presented frames, written as zero-padded PNGs into a fixed
//! output directory. Capture is gated twice: nothing is saved until the
//! warm-up frame count has passed (the field needs a few frames to spread
//! out), and a fixed budget caps the total number of files.

use std::path::PathBuf;

use crate::gpu_context::GpuContext;

pub struct FrameRecorder {
    dir: PathBuf,
    warmup_frames: u64,
    budget: u32,
    taken: u32,
}

impl FrameRecorder {
    pub fn new(dir: impl Into<PathBuf>, warmup_frames: u64, budget: u32) -> Self {
        Self {
            dir: dir.into(),
            warmup_frames,
            budget,
            taken: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.taken >= self.budget
    }

    fn should_capture(&self, frame_index: u64) -> bool {
        self.budget > 0 && frame_index >= self.warmup_frames && !self.exhausted()
    }

    /// Capture the current frame if the warm-up has passed and the budget
    /// allows. Returns whether a file was written; capture errors are
    /// logged, never fatal.
    pub fn maybe_capture(
        &mut self,
        gpu: &GpuContext,
        frame: &wgpu::SurfaceTexture,
        frame_index: u64,
    ) -> bool {
        if !self.should_capture(frame_index) {
            return false;
        }
        match self.capture(gpu, &frame.texture) {
            Ok(path) => {
                self.taken += 1;
                log::info!("Saved {}", path.display());
                true
            }
            Err(err) => {
                log::warn!("Frame capture failed: {err}");
                false
            }
        }
    }

    fn capture(&self, gpu: &GpuContext, texture: &wgpu::Texture) -> Result<PathBuf, String> {
        let (width, height) = gpu.size;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| format!("Failed to create '{}': {e}", self.dir.display()))?;

        // Buffer copies need 256-byte-aligned rows; strip the padding after
        // mapping.
        let unpadded_bytes_per_row = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Capture Buffer"),
            size: (padded_bytes_per_row as u64) * (height as u64),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Capture Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| "Capture buffer map callback dropped".to_string())?
            .map_err(|e| format!("Failed to map capture buffer: {e:?}"))?;

        let swap_bgra = matches!(
            gpu.surface_format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row as usize) * (height as usize));
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_bytes_per_row as usize) {
                let row = &row[..unpadded_bytes_per_row as usize];
                if swap_bgra {
                    for px in row.chunks(4) {
                        pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                    }
                } else {
                    pixels.extend_from_slice(row);
                }
            }
        }
        readback.unmap();

        let path = self.dir.join(format!("frame_{:03}.png", self.taken));
        let img: image::RgbaImage = image::ImageBuffer::from_raw(width, height, pixels)
            .ok_or_else(|| "Capture pixel buffer has the wrong length".to_string())?;
        img.save(&path)
            .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
        Ok(path)
    }
}
