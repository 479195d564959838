use evergreen::{
    core::{
        devices::DeviceContext,
        memory::{create_buffer, GpuBuffer},
        pipeline::{MeshPipeline, PipelineProvider},
    },
    vertex::Vertex,
    Drawable, FrameUniforms, Scene,
};

use std::{mem::size_of, ptr::copy_nonoverlapping as memcpy, time::Instant};

use glam::{Mat4, Vec3};
use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use lazy_static::lazy_static;
use log::*;

pub const VERTEX_SHADER: &str = "shaders/mesh.vert.spv";
pub const FRAGMENT_SHADER: &str = "shaders/mesh.frag.spv";

lazy_static! {
    // Four vertices per face so every face gets its own normal;
    // `u x v` points along the normal, which makes the corners
    // counter-clockwise seen from outside.
    static ref VERTICES: Vec<Vertex> = {
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.9, 0.2, 0.2)),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y, Vec3::new(0.2, 0.9, 0.9)),
            (Vec3::Y, Vec3::Z, Vec3::X, Vec3::new(0.2, 0.9, 0.2)),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z, Vec3::new(0.9, 0.2, 0.9)),
            (Vec3::Z, Vec3::X, Vec3::Y, Vec3::new(0.2, 0.2, 0.9)),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X, Vec3::new(0.9, 0.9, 0.2)),
        ];

        faces
            .iter()
            .flat_map(|&(n, u, v, color)| {
                [-u - v, u - v, u + v, -u + v]
                    .map(|offset| Vertex::new((n + offset) * 0.5, n, color))
            })
            .collect()
    };

    static ref INDICES: Vec<u32> = (0..6u32)
        .flat_map(|face| [0, 1, 2, 2, 3, 0].map(|i| face * 4 + i))
        .collect();
}

/// A single spinning cube.
pub struct CubeScene {
    pipeline: MeshPipeline,
    vertices: GpuBuffer,
    indices: GpuBuffer,
    drawables: Vec<Drawable>,
    start: Instant,
}

impl CubeScene {
    pub unsafe fn create(ctx: &DeviceContext) -> Result<Self> {
        let vertices = upload(ctx, &VERTICES, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let indices = upload(ctx, &INDICES, vk::BufferUsageFlags::INDEX_BUFFER)?;
        info!("Cube buffers created.");

        Ok(Self {
            pipeline: MeshPipeline::new(VERTEX_SHADER, FRAGMENT_SHADER),
            vertices,
            indices,
            drawables: vec![Drawable {
                vertex_buffer: vertices.buffer,
                index_buffer: indices.buffer,
                index_count: INDICES.len() as u32,
                model: Mat4::IDENTITY,
            }],
            start: Instant::now(),
        })
    }
}

impl Scene for CubeScene {
    fn pipeline(&self) -> &dyn PipelineProvider {
        &self.pipeline
    }

    fn pipeline_mut(&mut self) -> &mut dyn PipelineProvider {
        &mut self.pipeline
    }

    fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    fn frame_uniforms(&mut self, extent: vk::Extent2D) -> FrameUniforms {
        let time = self.start.elapsed().as_secs_f32();
        self.drawables[0].model = Mat4::from_rotation_z(time * 45f32.to_radians());

        let view = Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Z);

        // Vulkan clip space points Y down.
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        FrameUniforms { view, proj }
    }

    unsafe fn destroy(&mut self, device: &Device) {
        self.vertices.destroy(device);
        self.indices.destroy(device);
        info!("Cube buffers destroyed.");
    }
}

/// Copies `items` into a new host-visible buffer. The cube is
/// tiny, so it skips the staging copy into device-local memory.
unsafe fn upload<T>(ctx: &DeviceContext, items: &[T], usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
    let size = (size_of::<T>() * items.len()) as vk::DeviceSize;
    let buffer = create_buffer(
        &ctx.device,
        &ctx.memory_properties,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let memory = buffer.map(&ctx.device)?;
    memcpy(items.as_ptr(), memory.cast(), items.len());
    ctx.device.unmap_memory(buffer.memory);

    Ok(buffer)
}
