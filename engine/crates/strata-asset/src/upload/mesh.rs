use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};
use strata_gfx::backend::GfxBackend;
use strata_gfx::commands::barrier::GfxBufferBarrier;
use strata_gfx::commands::command_list::GfxCommandList;
use strata_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};

use crate::context::StreamContext;
use crate::registry::{Asset, Handle};
use crate::upload::{
    OwnershipTransfer, UploadBatch, UploadError, UploadState, create_staging, log_state, register_upload,
    submit_upload,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl Vertex {
    pub const STRIDE: usize = size_of::<Vertex>();

    #[inline]
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
            ..Default::default()
        }
    }
}

/// CPU 侧的 mesh 数据，三角形列表
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// 三角形法线按面积加权累加到三个顶点上，覆盖原有的法线
    ///
    /// 用于没有法线数据的模型，应在 `generate_tangents` 之前调用
    pub fn generate_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];

        for tri in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if i0.max(i1).max(i2) >= self.vertices.len() {
                continue;
            }
            let p0 = Vec3::from(self.vertices[i0].position);
            let edge1 = Vec3::from(self.vertices[i1].position) - p0;
            let edge2 = Vec3::from(self.vertices[i2].position) - p0;

            // 叉积的长度是面积的两倍
            let weighted = edge1.cross(edge2);
            for i in [i0, i1, i2] {
                normals[i] += weighted;
            }
        }

        for (vertex, n) in self.vertices.iter_mut().zip(normals) {
            vertex.normal = n.normalize_or_zero().to_array();
        }
    }

    /// 根据 uv 为每个三角形计算 tangent 与 bitangent，并累加到三个顶点上
    ///
    /// uv 退化的三角形不参与累加
    pub fn generate_tangents(&mut self) {
        let mut tangents = vec![Vec3::ZERO; self.vertices.len()];
        let mut bitangents = vec![Vec3::ZERO; self.vertices.len()];

        for tri in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if i0.max(i1).max(i2) >= self.vertices.len() {
                continue;
            }
            let (v0, v1, v2) = (&self.vertices[i0], &self.vertices[i1], &self.vertices[i2]);

            let p0 = Vec3::from(v0.position);
            let edge1 = Vec3::from(v1.position) - p0;
            let edge2 = Vec3::from(v2.position) - p0;
            let uv0 = Vec2::from(v0.uv);
            let duv1 = Vec2::from(v1.uv) - uv0;
            let duv2 = Vec2::from(v2.uv) - uv0;

            let det = duv1.x * duv2.y - duv2.x * duv1.y;
            if det.abs() < f32::EPSILON {
                continue;
            }
            let r = 1.0 / det;
            let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
            let bitangent = (edge2 * duv1.x - edge1 * duv2.x) * r;

            for i in [i0, i1, i2] {
                tangents[i] += tangent;
                bitangents[i] += bitangent;
            }
        }

        for (vertex, (t, b)) in self.vertices.iter_mut().zip(tangents.into_iter().zip(bitangents)) {
            vertex.tangent = t.normalize_or_zero().to_array();
            vertex.bitangent = b.normalize_or_zero().to_array();
        }
    }
}

pub struct StaticMesh {
    vertex_buffer: GfxBuffer,
    index_buffer: GfxBuffer,
    vertex_count: u32,
    index_count: u32,
}

impl Asset for StaticMesh {
    fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

// getters
impl StaticMesh {
    #[inline]
    pub fn vertex_buffer(&self) -> &GfxBuffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &GfxBuffer {
        &self.index_buffer
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl StaticMesh {
    pub fn request(ctx: &Arc<StreamContext>, data: MeshData) -> Handle<StaticMesh> {
        let _span = tracy_client::span!("StaticMesh::request");
        let handle = ctx.registry().emplace_empty::<StaticMesh>();
        log::info!("request mesh: {}, {} vertices, {} indices", data.name, data.vertices.len(), data.indices.len());

        ctx.spawn(move |ctx| Self::upload_job(ctx, handle, data));
        handle
    }

    /// 在后台线程中执行，失败时标记 slot
    pub(crate) fn upload_job(ctx: &Arc<StreamContext>, handle: Handle<StaticMesh>, data: MeshData) {
        let _span = tracy_client::span!("StaticMesh::upload");
        let name = data.name.clone();
        if let Err(e) = Self::upload(ctx, handle, data) {
            ctx.registry().fail(handle, format!("mesh {}: {}", name, e));
        }
    }

    fn upload(ctx: &Arc<StreamContext>, handle: Handle<StaticMesh>, data: MeshData) -> Result<(), UploadError> {
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(UploadError::BeforeSubmit(anyhow::anyhow!("empty mesh")));
        }
        let backend = ctx.backend();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);

        let vertex_staging =
            create_staging(ctx, &format!("{}-vertex", data.name), vertex_bytes).map_err(UploadError::BeforeSubmit)?;
        let index_staging = match create_staging(ctx, &format!("{}-index", data.name), index_bytes) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(vertex_staging);
                return Err(UploadError::BeforeSubmit(e));
            }
        };
        log_state(&data.name, UploadState::Staged);

        let destinations = Self::create_buffers(backend, &data.name, vertex_bytes.len(), index_bytes.len());
        let (vertex_buffer, index_buffer) = match destinations {
            Ok(buffers) => buffers,
            Err(e) => {
                backend.destroy_buffer(vertex_staging);
                backend.destroy_buffer(index_staging);
                return Err(UploadError::BeforeSubmit(e));
            }
        };

        let families = OwnershipTransfer::from_ctx(ctx);
        let ownership = |buffer: &GfxBuffer| {
            GfxBufferBarrier::new()
                .buffer(buffer.vk_buffer(), 0, vk::WHOLE_SIZE)
                .queue_family_transfer(families.src, families.dst)
        };
        let release = |buffer: &GfxBuffer| {
            ownership(buffer).src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
        };

        let mut transfer = GfxCommandList::new(format!("mesh:{}:transfer", data.name));
        transfer
            .cmd_copy_buffer(vertex_staging.vk_buffer(), vertex_buffer.vk_buffer(), vertex_bytes.len() as u64)
            .cmd_copy_buffer(index_staging.vk_buffer(), index_buffer.vk_buffer(), index_bytes.len() as u64)
            .buffer_memory_barrier(&[release(&vertex_buffer), release(&index_buffer)]);

        let mut graphics = GfxCommandList::new(format!("mesh:{}:acquire", data.name));
        graphics.buffer_memory_barrier(&[
            ownership(&vertex_buffer)
                .dst_mask(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ),
            ownership(&index_buffer).dst_mask(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::INDEX_READ),
        ]);

        let batch = UploadBatch {
            name: data.name.clone(),
            staging: vec![vertex_staging, index_staging],
            transfer,
            graphics,
            wait_stage: vk::PipelineStageFlags2::VERTEX_INPUT,
            generates_mips: false,
        };
        match submit_upload(ctx, batch) {
            Ok(upload) => {
                let mesh = StaticMesh {
                    vertex_buffer,
                    index_buffer,
                    vertex_count: data.vertices.len() as u32,
                    index_count: data.indices.len() as u32,
                };
                register_upload(ctx, upload, move |ctx| ctx.registry().finalize(handle, mesh));
                Ok(())
            }
            Err(e @ UploadError::BeforeSubmit(_)) => {
                backend.destroy_buffer(vertex_buffer);
                backend.destroy_buffer(index_buffer);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn create_buffers(
        backend: &dyn GfxBackend,
        name: &str,
        vertex_size: usize,
        index_size: usize,
    ) -> anyhow::Result<(GfxBuffer, GfxBuffer)> {
        let vertex_buffer = backend.create_buffer(&GfxBufferCreateInfo::new_device_buffer(
            vertex_size as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            format!("{}-vertex", name),
        ))?;
        let index_buffer = match backend.create_buffer(&GfxBufferCreateInfo::new_device_buffer(
            index_size as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
            format!("{}-index", name),
        )) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };
        Ok((vertex_buffer, index_buffer))
    }
}
