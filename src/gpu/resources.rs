//! Owned resource wrappers. Dropping one hands its native object to the
//! device's deferred-destruction path.

use std::ops::Deref;
use std::rc::Rc;

use bytemuck::Pod;

use super::{
    AccelerationInstance, AccelerationStructureId, BufferDesc, BufferId, BufferKind, Format,
    IndexType, RaytracingShaderInfo, RenderDevice, Result, RetireQueue, Retired, ShaderId,
    ShaderInfo, TextureId, TextureInfo, TextureRegion,
};

pub struct Texture {
    id: TextureId,
    info: TextureInfo,
    retire: Rc<RetireQueue>,
}

impl Texture {
    pub fn new(device: &mut RenderDevice, info: &TextureInfo) -> Result<Self> {
        Self::create(device, info, false)
    }

    /// Creates a texture and uploads `pixels` to mip 0, filling the rest of
    /// the chain when `info.mipmap` is set.
    pub fn with_data(device: &mut RenderDevice, info: &TextureInfo, pixels: &[u8]) -> Result<Self> {
        let texture = Self::new(device, info)?;
        texture.write(device, pixels)?;
        if info.mipmap {
            texture.generate_mips(device)?;
        }
        Ok(texture)
    }

    fn create(device: &mut RenderDevice, info: &TextureInfo, render_target: bool) -> Result<Self> {
        let id = device.backend().create_texture(info, render_target)?;
        Ok(Self {
            id,
            info: *info,
            retire: device.retire_queue(),
        })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub(crate) fn retire(&self) -> &Rc<RetireQueue> {
        &self.retire
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn format(&self) -> Format {
        self.info.format
    }

    pub fn mip_count(&self) -> u32 {
        self.info.mip_count()
    }

    /// Replaces all of mip 0.
    pub fn write(&self, device: &mut RenderDevice, pixels: &[u8]) -> Result<()> {
        let region = TextureRegion {
            mip_level: 0,
            offset: [0, 0],
            size: [self.info.width, self.info.height],
        };
        self.write_region(device, &region, pixels)
    }

    pub fn write_region(&self, device: &mut RenderDevice, region: &TextureRegion, pixels: &[u8]) -> Result<()> {
        device.backend().write_texture(self.id, region, pixels)
    }

    pub fn generate_mips(&self, device: &mut RenderDevice) -> Result<()> {
        device.backend().generate_mips(self.id)
    }

    pub fn read(&self, device: &mut RenderDevice) -> Result<Vec<u8>> {
        device.read_texture(self)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.retire.push(Retired::Texture(self.id));
    }
}

/// A texture that can also be drawn into. Owns a matching depth-stencil
/// attachment.
pub struct RenderTarget {
    texture: Texture,
}

impl RenderTarget {
    pub fn new(device: &mut RenderDevice, width: u32, height: u32, format: Format) -> Result<Self> {
        let info = TextureInfo::new(width, height, format);
        Ok(Self {
            texture: Texture::create(device, &info, true)?,
        })
    }
}

impl Deref for RenderTarget {
    type Target = Texture;

    fn deref(&self) -> &Texture {
        &self.texture
    }
}

pub struct Shader {
    id: ShaderId,
    retire: Rc<RetireQueue>,
}

impl Shader {
    pub fn new(device: &mut RenderDevice, info: &ShaderInfo) -> Result<Self> {
        let id = device.backend().create_shader(info)?;
        Ok(Self {
            id,
            retire: device.retire_queue(),
        })
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub(crate) fn retire(&self) -> &Rc<RetireQueue> {
        &self.retire
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.retire.push(Retired::Shader(self.id));
    }
}

pub struct RaytracingShader {
    id: ShaderId,
    retire: Rc<RetireQueue>,
}

impl RaytracingShader {
    pub fn new(device: &mut RenderDevice, info: &RaytracingShaderInfo) -> Result<Self> {
        let id = device.backend().create_raytracing_shader(info)?;
        Ok(Self {
            id,
            retire: device.retire_queue(),
        })
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }
}

impl Drop for RaytracingShader {
    fn drop(&mut self) {
        self.retire.push(Retired::Shader(self.id));
    }
}

/// Fixed-capacity device buffer.
pub struct Buffer {
    id: BufferId,
    desc: BufferDesc,
    retire: Rc<RetireQueue>,
}

impl Buffer {
    fn create(device: &mut RenderDevice, desc: BufferDesc) -> Result<Self> {
        let id = device.backend().create_buffer(&desc)?;
        Ok(Self {
            id,
            desc,
            retire: device.retire_queue(),
        })
    }

    fn with_data(device: &mut RenderDevice, desc: BufferDesc, data: &[u8]) -> Result<Self> {
        let buffer = Self::create(device, desc)?;
        buffer.write(device, data)?;
        Ok(buffer)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub(crate) fn retire(&self) -> &Rc<RetireQueue> {
        &self.retire
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn kind(&self) -> BufferKind {
        self.desc.kind
    }

    pub fn write(&self, device: &mut RenderDevice, data: &[u8]) -> Result<()> {
        self.write_at(device, 0, data)
    }

    pub fn write_at(&self, device: &mut RenderDevice, offset: u64, data: &[u8]) -> Result<()> {
        device.backend().write_buffer(self.id, offset, data)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.retire.push(Retired::Buffer(self.id));
    }
}

fn desc(kind: BufferKind, size: u64) -> BufferDesc {
    BufferDesc {
        kind,
        size,
        stride: 0,
        index_type: IndexType::U32,
    }
}

pub struct VertexBuffer {
    buffer: Buffer,
}

impl VertexBuffer {
    pub fn new(device: &mut RenderDevice, size: u64, stride: u32) -> Result<Self> {
        let desc = BufferDesc {
            stride,
            ..desc(BufferKind::Vertex, size)
        };
        Ok(Self {
            buffer: Buffer::create(device, desc)?,
        })
    }

    pub fn from_slice<T: Pod>(device: &mut RenderDevice, vertices: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let desc = BufferDesc {
            stride: std::mem::size_of::<T>() as u32,
            ..desc(BufferKind::Vertex, bytes.len() as u64)
        };
        Ok(Self {
            buffer: Buffer::with_data(device, desc, bytes)?,
        })
    }

    pub fn stride(&self) -> u32 {
        self.buffer.desc.stride
    }

    pub fn write_slice<T: Pod>(&self, device: &mut RenderDevice, vertices: &[T]) -> Result<()> {
        self.buffer.write(device, bytemuck::cast_slice(vertices))
    }
}

impl Deref for VertexBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

/// Integer types usable as indices.
pub trait Index: Pod {
    const TYPE: IndexType;
}

impl Index for u16 {
    const TYPE: IndexType = IndexType::U16;
}

impl Index for u32 {
    const TYPE: IndexType = IndexType::U32;
}

pub struct IndexBuffer {
    buffer: Buffer,
}

impl IndexBuffer {
    pub fn new(device: &mut RenderDevice, size: u64, index_type: IndexType) -> Result<Self> {
        let desc = BufferDesc {
            index_type,
            ..desc(BufferKind::Index, size)
        };
        Ok(Self {
            buffer: Buffer::create(device, desc)?,
        })
    }

    pub fn from_slice<T: Index>(device: &mut RenderDevice, indices: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        let desc = BufferDesc {
            index_type: T::TYPE,
            ..desc(BufferKind::Index, bytes.len() as u64)
        };
        Ok(Self {
            buffer: Buffer::with_data(device, desc, bytes)?,
        })
    }

    pub fn index_type(&self) -> IndexType {
        self.buffer.desc.index_type
    }
}

impl Deref for IndexBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

pub struct UniformBuffer {
    buffer: Buffer,
}

impl UniformBuffer {
    pub fn new(device: &mut RenderDevice, size: u64) -> Result<Self> {
        Ok(Self {
            buffer: Buffer::create(device, desc(BufferKind::Uniform, size))?,
        })
    }

    pub fn from_value<T: Pod>(device: &mut RenderDevice, value: &T) -> Result<Self> {
        let bytes = bytemuck::bytes_of(value);
        Ok(Self {
            buffer: Buffer::with_data(device, desc(BufferKind::Uniform, bytes.len() as u64), bytes)?,
        })
    }

    pub fn write_value<T: Pod>(&self, device: &mut RenderDevice, value: &T) -> Result<()> {
        self.buffer.write(device, bytemuck::bytes_of(value))
    }
}

impl Deref for UniformBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

pub struct StorageBuffer {
    buffer: Buffer,
}

impl StorageBuffer {
    pub fn new(device: &mut RenderDevice, size: u64) -> Result<Self> {
        Ok(Self {
            buffer: Buffer::create(device, desc(BufferKind::Storage, size))?,
        })
    }

    pub fn from_slice<T: Pod>(device: &mut RenderDevice, items: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(items);
        Ok(Self {
            buffer: Buffer::with_data(device, desc(BufferKind::Storage, bytes.len() as u64), bytes)?,
        })
    }
}

impl Deref for StorageBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

/// Retires an acceleration structure when dropped.
struct StructureOwner {
    id: AccelerationStructureId,
    retire: Rc<RetireQueue>,
}

impl Drop for StructureOwner {
    fn drop(&mut self) {
        self.retire.push(Retired::AccelerationStructure(self.id));
    }
}

/// Triangle geometry for ray tracing. Top-level structures built from it
/// keep it alive after this handle is dropped.
pub struct BottomLevelAccelerationStructure {
    owner: Rc<StructureOwner>,
}

impl BottomLevelAccelerationStructure {
    pub fn new(device: &mut RenderDevice, vertices: &[[f32; 3]], indices: &[u32]) -> Result<Self> {
        let id = device.backend().create_bottom_level(vertices, indices)?;
        Ok(Self {
            owner: Rc::new(StructureOwner {
                id,
                retire: device.retire_queue(),
            }),
        })
    }

    pub fn id(&self) -> AccelerationStructureId {
        self.owner.id
    }
}

pub const IDENTITY_TRANSFORM: [[f32; 4]; 3] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// Instances of bottom-level structures, each with a row-major 3x4
/// transform.
pub struct TopLevelAccelerationStructure {
    owner: StructureOwner,
    _geometry: Vec<Rc<StructureOwner>>,
}

impl TopLevelAccelerationStructure {
    pub fn new(
        device: &mut RenderDevice,
        instances: &[(&BottomLevelAccelerationStructure, [[f32; 4]; 3])],
    ) -> Result<Self> {
        let descs: Vec<AccelerationInstance> = instances
            .iter()
            .map(|(blas, transform)| AccelerationInstance {
                blas: blas.id(),
                transform: *transform,
            })
            .collect();
        let id = device.backend().create_top_level(&descs)?;
        let mut geometry: Vec<Rc<StructureOwner>> = Vec::with_capacity(instances.len());
        for (blas, _) in instances {
            if !geometry.iter().any(|g| Rc::ptr_eq(g, &blas.owner)) {
                geometry.push(Rc::clone(&blas.owner));
            }
        }
        Ok(Self {
            owner: StructureOwner {
                id,
                retire: device.retire_queue(),
            },
            _geometry: geometry,
        })
    }

    pub fn id(&self) -> AccelerationStructureId {
        self.owner.id
    }
}
