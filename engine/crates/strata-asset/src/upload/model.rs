use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, ensure};
use strata_gfx::backend::GfxBackend;

use crate::completion::{CompletionStatus, CompletionStub};
use crate::config::ModelJoin;
use crate::context::StreamContext;
use crate::registry::{Asset, Handle, SlotStatus};
use crate::upload::file_view::FileView;
use crate::upload::mesh::{MeshData, StaticMesh, Vertex};
use crate::upload::texture::{StaticTexture, TextureColorSpace};

/// 模型中的一个 mesh 以及它的材质贴图
///
/// 贴图可能在模型 ready 之后仍未就绪，使用时需要 fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexturedMesh {
    pub mesh: Handle<StaticMesh>,
    pub diffuse: Option<Handle<StaticTexture>>,
    pub normal: Option<Handle<StaticTexture>>,
    pub specular: Option<Handle<StaticTexture>>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl TexturedMesh {
    pub fn textures(&self) -> impl Iterator<Item = Handle<StaticTexture>> {
        [self.diffuse, self.normal, self.specular].into_iter().flatten()
    }
}

/// 由多个 mesh 与贴图组成的模型
///
/// 只持有子资源的 handle，子资源的 GPU 对象由各自的 slot 负责释放
#[derive(Debug, Default)]
pub struct StaticModel {
    meshes: Vec<TexturedMesh>,
}

impl Asset for StaticModel {
    fn destroy(self, _backend: &dyn GfxBackend) {}
}

impl StaticModel {
    #[inline]
    pub fn meshes(&self) -> &[TexturedMesh] {
        &self.meshes
    }
}

impl StaticModel {
    /// 使用配置中的 join 策略
    pub fn request(ctx: &Arc<StreamContext>, path: impl AsRef<Path>) -> Handle<StaticModel> {
        let join = ctx.config().model_join;
        Self::request_with(ctx, path, join)
    }

    pub fn request_with(ctx: &Arc<StreamContext>, path: impl AsRef<Path>, join: ModelJoin) -> Handle<StaticModel> {
        let _span = tracy_client::span!("StaticModel::request");
        let path = path.as_ref().to_path_buf();
        let handle = ctx.registry().emplace_empty::<StaticModel>();
        log::info!("request model: {:?}, join: {:?}", path, join);

        ctx.spawn(move |ctx| {
            let _span = tracy_client::span!("StaticModel::load");
            match Self::fan_out(ctx, &path) {
                Ok(meshes) => Self::register_join(ctx, handle, &path, meshes, join),
                Err(e) => ctx.registry().fail(handle, format!("model {:?}: {:#}", path, e)),
            }
        });
        handle
    }

    /// 解析 OBJ/MTL，为每个 mesh 与贴图发出子请求
    fn fan_out(ctx: &Arc<StreamContext>, path: &Path) -> anyhow::Result<Vec<TexturedMesh>> {
        let file = FileView::open(path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let (models, materials) = tobj::load_obj_buf(
            &mut Cursor::new(&file[..]),
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ignore_lines: true,
                ignore_points: true,
                ..Default::default()
            },
            |mtl_path| tobj::load_mtl(dir.join(mtl_path)),
        )
        .with_context(|| format!("解析 OBJ 失败: {:?}", path))?;
        ensure!(!models.is_empty(), "模型中没有任何 mesh: {:?}", path);

        let materials = materials.unwrap_or_else(|e| {
            log::warn!("加载材质失败: {:?}, {}", path, e);
            Vec::new()
        });
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        let texture = |name: &Option<String>, color_space: TextureColorSpace| {
            name.as_ref().map(|name| StaticTexture::request_file(ctx, resolve(&dir, name), color_space))
        };

        let meshes = models
            .into_iter()
            .map(|model| {
                let material = model.mesh.material_id.and_then(|id| materials.get(id));
                let data = mesh_data(format!("{}:{}", file_name, model.name), &model.mesh);
                let (vertex_count, index_count) = (data.vertices.len() as u32, data.indices.len() as u32);

                TexturedMesh {
                    mesh: StaticMesh::request(ctx, data),
                    diffuse: material.and_then(|m| texture(&m.diffuse_texture, TextureColorSpace::Srgb)),
                    normal: material.and_then(|m| texture(&m.normal_texture, TextureColorSpace::Linear)),
                    specular: material.and_then(|m| texture(&m.specular_texture, TextureColorSpace::Linear)),
                    vertex_count,
                    index_count,
                }
            })
            .collect();
        Ok(meshes)
    }

    /// 每次 tick 重新检查所有子资源，全部结束之后 finalize 模型
    fn register_join(
        ctx: &Arc<StreamContext>,
        handle: Handle<StaticModel>,
        path: &Path,
        meshes: Vec<TexturedMesh>,
        join: ModelJoin,
    ) {
        let poll_ctx = ctx.clone();
        let cleanup_ctx = ctx.clone();
        let poll_meshes = meshes.clone();

        ctx.completions().insert(CompletionStub::new(
            format!("model:{:?}", path),
            move || {
                let registry = poll_ctx.registry();
                let meshes_settled = poll_meshes.iter().all(|m| registry.is_settled(m.mesh));
                let textures_settled = join == ModelJoin::MeshesOnly
                    || poll_meshes.iter().flat_map(TexturedMesh::textures).all(|t| registry.is_settled(t));
                if meshes_settled && textures_settled {
                    CompletionStatus::Done
                } else {
                    CompletionStatus::Pending
                }
            },
            move || {
                let registry = cleanup_ctx.registry();
                let failed = meshes.iter().filter(|m| registry.status(m.mesh) == SlotStatus::Failed).count();
                if failed > 0 {
                    registry.fail(handle, format!("{} of {} meshes failed", failed, meshes.len()));
                } else {
                    registry.finalize(handle, StaticModel { meshes });
                }
            },
        ));
    }
}

/// MTL 中的贴图路径相对于模型所在目录
fn resolve(dir: &Path, name: &str) -> PathBuf {
    dir.join(name.replace('\\', "/"))
}

/// tobj 的 mesh 转换为交错的顶点格式，uv 翻转为 Vulkan 的约定
///
/// 没有法线数据时由三角形生成
fn mesh_data(name: String, mesh: &tobj::Mesh) -> MeshData {
    let vertices = mesh
        .positions
        .chunks_exact(3)
        .enumerate()
        .map(|(i, p)| {
            let normal = mesh.normals.get(i * 3..i * 3 + 3).map_or([0.0; 3], |n| [n[0], n[1], n[2]]);
            let uv = mesh.texcoords.get(i * 2..i * 2 + 2).map_or([0.0; 2], |t| [t[0], 1.0 - t[1]]);
            Vertex::new([p[0], p[1], p[2]], normal, uv)
        })
        .collect();

    let mut data = MeshData {
        name,
        vertices,
        indices: mesh.indices.clone(),
    };
    if mesh.normals.is_empty() {
        data.generate_normals();
    }
    data.generate_tangents();
    data
}
