use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::scheduler::UNIFORM_CAPACITY;

use super::pipeline::{kernel_bind_group_layout, HISTORY_FORMAT, RESOLVE_FORMAT};

const NOISE_DIM: u32 = 256;

/// Two fixed resource slots addressed by a toggling destination index.
///
/// `current()` is this frame's destination, `previous()` last frame's
/// output; `swap` flips the roles. Pure so the alternation contract stays
/// testable without a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PingPong {
    dest: usize,
}

impl PingPong {
    pub fn new() -> Self {
        Self { dest: 0 }
    }

    pub fn current(&self) -> usize {
        self.dest
    }

    pub fn previous(&self) -> usize {
        self.dest ^ 1
    }

    pub fn swap(&mut self) {
        self.dest ^= 1;
    }
}

struct TextureBundle {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl TextureBundle {
    fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

type DecodeResult = Result<image::RgbaImage, String>;

/// Owns every GPU-resident resource the kernels consume.
pub(crate) struct ResourceManager {
    pub bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    noise: TextureBundle,
    media: TextureBundle,
    history: [TextureBundle; 2],
    ping_pong: PingPong,
    bind_groups: [wgpu::BindGroup; 2],
    resolve: TextureBundle,
    staging: wgpu::Buffer,
    padded_bytes_per_row: u32,
    dims: (u32, u32),
    decode_tx: Sender<DecodeResult>,
    decode_rx: Receiver<DecodeResult>,
}

impl ResourceManager {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        dims: (u32, u32),
        noise_seed: u64,
    ) -> Self {
        let bind_group_layout = kernel_bind_group_layout(device);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel uniforms"),
            size: u64::from(UNIFORM_CAPACITY),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let noise = create_noise_texture(device, queue, noise_seed);
        let media = create_placeholder_media(device, queue);

        let dims = (dims.0.max(1), dims.1.max(1));
        let history = [
            create_history_texture(device, dims, 0),
            create_history_texture(device, dims, 1),
        ];
        let resolve = create_resolve_target(device, dims);
        let (staging, padded_bytes_per_row) = create_staging_buffer(device, dims);

        let (decode_tx, decode_rx) = crossbeam_channel::unbounded();

        let bind_groups = build_bind_groups(
            device,
            &bind_group_layout,
            &uniform_buffer,
            &sampler,
            &media,
            &noise,
            &history,
        );

        Self {
            bind_group_layout,
            uniform_buffer,
            sampler,
            noise,
            media,
            history,
            ping_pong: PingPong::new(),
            bind_groups,
            resolve,
            staging,
            padded_bytes_per_row,
            dims,
            decode_tx,
            decode_rx,
        }
    }

    pub(crate) fn dims(&self) -> (u32, u32) {
        self.dims
    }

    /// Recreates the history pair, resolve target, and readback buffer at
    /// the new render size. Returns true when anything changed; the caller
    /// must then reset accumulation, because history at the old resolution
    /// is meaningless.
    pub(crate) fn resize(&mut self, device: &wgpu::Device, dims: (u32, u32)) -> bool {
        let dims = (dims.0.max(1), dims.1.max(1));
        if dims == self.dims {
            return false;
        }
        tracing::debug!(
            from = ?self.dims,
            to = ?dims,
            "recreating history pair and resolve target"
        );

        for slot in &self.history {
            slot.texture.destroy();
        }
        self.resolve.texture.destroy();

        self.dims = dims;
        self.history = [
            create_history_texture(device, dims, 0),
            create_history_texture(device, dims, 1),
        ];
        self.resolve = create_resolve_target(device, dims);
        let (staging, padded) = create_staging_buffer(device, dims);
        self.staging = staging;
        self.padded_bytes_per_row = padded;
        self.ping_pong = PingPong::new();
        self.rebuild_bind_groups(device);
        true
    }

    /// Destination view for this frame's integrator pass.
    pub(crate) fn history_dest_view(&self) -> &wgpu::TextureView {
        &self.history[self.ping_pong.current()].view
    }

    /// Bind group whose history slot reads last frame's output.
    pub(crate) fn integrator_bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_groups[self.ping_pong.previous()]
    }

    /// Bind group whose history slot reads the texture the integrator pass
    /// just wrote, consumed by the display pass in the same frame.
    pub(crate) fn display_bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_groups[self.ping_pong.current()]
    }

    pub(crate) fn resolve_view(&self) -> &wgpu::TextureView {
        &self.resolve.view
    }

    /// Flips source/destination roles after a submitted frame.
    pub(crate) fn swap_history(&mut self) {
        self.ping_pong.swap();
    }

    pub(crate) fn write_uniforms(&self, queue: &wgpu::Queue, bytes: &[u8]) {
        queue.write_buffer(&self.uniform_buffer, 0, bytes);
    }

    /// Queues an asynchronous decode of user-supplied image bytes. The frame
    /// loop keeps rendering with the current media texture; the decoded
    /// result is installed between frames by [`Self::poll_media`].
    pub(crate) fn request_media_load(&self, bytes: Vec<u8>) {
        let tx = self.decode_tx.clone();
        thread::spawn(move || {
            let result = image::load_from_memory(&bytes)
                .map(|img| img.to_rgba8())
                .map_err(|err| err.to_string());
            let _ = tx.send(result);
        });
    }

    /// Installs any finished media decode. Failures are logged and swallowed;
    /// the previous texture stays in use.
    pub(crate) fn poll_media(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        match self.decode_rx.try_recv() {
            Ok(Ok(image)) => {
                let (width, height) = image.dimensions();
                if width == 0 || height == 0 {
                    tracing::warn!("decoded media texture has zero extent; keeping previous");
                    return false;
                }
                let texture = device.create_texture_with_data(
                    queue,
                    &wgpu::TextureDescriptor {
                        label: Some("media texture"),
                        size: wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: wgpu::TextureFormat::Rgba8UnormSrgb,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[],
                    },
                    TextureDataOrder::LayerMajor,
                    image.as_raw(),
                );
                self.media = TextureBundle::new(texture);
                self.rebuild_bind_groups(device);
                tracing::info!(width, height, "installed user media texture");
                true
            }
            Ok(Err(message)) => {
                tracing::warn!(error = %message, "media decode failed; keeping previous texture");
                false
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Copies the resolve target into the staging buffer and returns tightly
    /// packed RGBA rows. Blocks on the GPU; used only for capture/record.
    pub(crate) fn read_resolve_target(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u8>> {
        let (width, height) = self.dims;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.resolve.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| anyhow!("device poll failed during readback: {err}"))?;
        rx.recv()
            .map_err(|_| anyhow!("readback callback dropped"))?
            .map_err(|err| anyhow!("failed to map readback buffer: {err}"))?;

        let data = slice.get_mapped_range();
        let row_bytes = (width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height {
            let start = (row * self.padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }
        drop(data);
        self.staging.unmap();
        Ok(pixels)
    }

    fn rebuild_bind_groups(&mut self, device: &wgpu::Device) {
        self.bind_groups = build_bind_groups(
            device,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.sampler,
            &self.media,
            &self.noise,
            &self.history,
        );
    }
}

fn build_bind_groups(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    media: &TextureBundle,
    noise: &TextureBundle,
    history: &[TextureBundle; 2],
) -> [wgpu::BindGroup; 2] {
    let build = |history_view: &wgpu::TextureView| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(history_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&media.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&noise.view),
                },
            ],
        })
    };
    [build(&history[0].view), build(&history[1].view)]
}

fn create_history_texture(device: &wgpu::Device, dims: (u32, u32), index: usize) -> TextureBundle {
    TextureBundle::new(device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&format!("history {index}")),
        size: wgpu::Extent3d {
            width: dims.0,
            height: dims.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HISTORY_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    }))
}

fn create_resolve_target(device: &wgpu::Device, dims: (u32, u32)) -> TextureBundle {
    TextureBundle::new(device.create_texture(&wgpu::TextureDescriptor {
        label: Some("resolve target"),
        size: wgpu::Extent3d {
            width: dims.0,
            height: dims.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: RESOLVE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }))
}

fn create_staging_buffer(device: &wgpu::Device, dims: (u32, u32)) -> (wgpu::Buffer, u32) {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = (dims.0 * 4).div_ceil(align) * align;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size: u64::from(padded_bytes_per_row) * u64::from(dims.1),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    (buffer, padded_bytes_per_row)
}

/// Seeded procedural noise texture; decorrelates the integrator RNG when no
/// history is available yet.
fn create_noise_texture(device: &wgpu::Device, queue: &wgpu::Queue, seed: u64) -> TextureBundle {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; (NOISE_DIM * NOISE_DIM * 4) as usize];
    rng.fill(data.as_mut_slice());

    TextureBundle::new(device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("noise texture"),
            size: wgpu::Extent3d {
                width: NOISE_DIM,
                height: NOISE_DIM,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &data,
    ))
}

/// 1x1 opaque white placeholder bound until the host supplies an image.
fn create_placeholder_media(device: &wgpu::Device, queue: &wgpu::Queue) -> TextureBundle {
    let data = [255u8, 255, 255, 255];
    TextureBundle::new(device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("placeholder media texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &data,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_roles_strictly_alternate() {
        let mut pp = PingPong::new();
        let mut currents = Vec::new();
        for _ in 0..6 {
            assert_ne!(pp.current(), pp.previous());
            currents.push(pp.current());
            pp.swap();
        }
        assert_eq!(currents, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn staging_rows_are_aligned_to_copy_granularity() {
        // 1920 * 4 = 7680 is already a multiple of 256.
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        assert_eq!((1920u32 * 4).div_ceil(align) * align, 7680);
        // 1000 * 4 = 4000 pads up to 4096.
        assert_eq!((1000u32 * 4).div_ceil(align) * align, 4096);
    }
}
