//! # Pipes
//!
//! A [`Pipe`] names one execution engine (core index plus execution state)
//! on a [`Device`] and carries the capabilities the kernel reports for it.

use etna_core::{Deadline, Error, Fence, PipeId, Result};
use etna_drm::{KernelGateway, Param};
use etna_mem::Device;

// =============================================================================
// GPU SPECS
// =============================================================================

/// Capabilities of one GPU core, queried once when the pipe is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSpecs {
    /// Chip model
    pub model: u32,
    /// Chip revision
    pub revision: u32,
    /// Feature words 0..=4
    pub features: [u32; 5],
    /// Vertex stream count
    pub stream_count: u32,
    /// Highest register index
    pub register_max: u32,
    /// Thread count
    pub thread_count: u32,
    /// Vertex cache size
    pub vertex_cache_size: u32,
    /// Shader core count
    pub shader_core_count: u32,
    /// Pixel pipe count
    pub pixel_pipes: u32,
    /// Vertex output buffer size
    pub vertex_output_buffer_size: u32,
    /// Buffer size
    pub buffer_size: u32,
    /// Shader instruction count
    pub instruction_count: u32,
    /// Shader constant count
    pub num_constants: u32,
}

impl GpuSpecs {
    /// Query every parameter of `core`, one request each
    fn query(gateway: &dyn KernelGateway, core: u32) -> Result<Self> {
        let get = |param: Param| -> Result<u32> {
            gateway
                .get_param(core, param.raw())
                .map(|v| v as u32)
                .map_err(|e| {
                    log::error!("querying {:?} of core {} failed: {}", param, core, e);
                    Error::QueryFailed(e)
                })
        };

        Ok(Self {
            model: get(Param::Model)?,
            revision: get(Param::Revision)?,
            features: [
                get(Param::Features0)?,
                get(Param::Features1)?,
                get(Param::Features2)?,
                get(Param::Features3)?,
                get(Param::Features4)?,
            ],
            stream_count: get(Param::StreamCount)?,
            register_max: get(Param::RegisterMax)?,
            thread_count: get(Param::ThreadCount)?,
            vertex_cache_size: get(Param::VertexCacheSize)?,
            shader_core_count: get(Param::ShaderCoreCount)?,
            pixel_pipes: get(Param::PixelPipes)?,
            vertex_output_buffer_size: get(Param::VertexOutputBufferSize)?,
            buffer_size: get(Param::BufferSize)?,
            instruction_count: get(Param::InstructionCount)?,
            num_constants: get(Param::NumConstants)?,
        })
    }

    /// Value of one parameter
    pub fn get(&self, param: Param) -> u64 {
        let v = match param {
            Param::Model => self.model,
            Param::Revision => self.revision,
            Param::Features0 => self.features[0],
            Param::Features1 => self.features[1],
            Param::Features2 => self.features[2],
            Param::Features3 => self.features[3],
            Param::Features4 => self.features[4],
            Param::StreamCount => self.stream_count,
            Param::RegisterMax => self.register_max,
            Param::ThreadCount => self.thread_count,
            Param::VertexCacheSize => self.vertex_cache_size,
            Param::ShaderCoreCount => self.shader_core_count,
            Param::PixelPipes => self.pixel_pipes,
            Param::VertexOutputBufferSize => self.vertex_output_buffer_size,
            Param::BufferSize => self.buffer_size,
            Param::InstructionCount => self.instruction_count,
            Param::NumConstants => self.num_constants,
        };
        v as u64
    }
}

// =============================================================================
// PIPE
// =============================================================================

/// One execution engine of a device
///
/// Borrows the device; it does not keep it alive on its own.
#[derive(Debug)]
pub struct Pipe<'d> {
    device: &'d Device,
    core: u32,
    id: PipeId,
    specs: GpuSpecs,
}

impl<'d> Pipe<'d> {
    /// Open execution state `id` on GPU core `core`
    pub fn new(device: &'d Device, core: u32, id: PipeId) -> Result<Self> {
        let specs = GpuSpecs::query(device.gateway(), core)?;
        if specs.model == 0 {
            log::error!("no GPU behind core {}", core);
            return Err(Error::GpuNotFound);
        }

        log::info!(
            "GPU core {}: GC{:x} rev {:x}, {:?} pipe",
            core,
            specs.model,
            specs.revision,
            id
        );
        Ok(Self {
            device,
            core,
            id,
            specs,
        })
    }

    /// Owning device
    #[inline]
    pub fn device(&self) -> &'d Device {
        self.device
    }

    /// Core index
    #[inline]
    pub fn core(&self) -> u32 {
        self.core
    }

    /// Execution state
    #[inline]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Cached capabilities
    #[inline]
    pub fn specs(&self) -> &GpuSpecs {
        &self.specs
    }

    /// Cached value of a raw parameter id
    pub fn param(&self, raw: u32) -> Result<u64> {
        match Param::from_raw(raw) {
            Some(param) => Ok(self.specs.get(param)),
            None => {
                log::error!("invalid parameter {:#x}", raw);
                Err(Error::InvalidParameter)
            }
        }
    }

    /// Block until `fence` has signalled or `timeout_ms` elapses
    pub fn wait(&self, fence: Fence, timeout_ms: u32) -> Result<()> {
        self.wait_until(fence, Deadline::after_ms(timeout_ms))
    }

    /// Block until `fence` has signalled or `deadline` passes
    pub fn wait_until(&self, fence: Fence, deadline: Deadline) -> Result<()> {
        match self.device.gateway().wait_fence(self.core, fence, deadline) {
            Ok(()) => Ok(()),
            Err(e) if e.is_timeout() => Err(Error::WaitTimeout),
            Err(e) => {
                log::error!("waiting for fence {} failed: {}", fence, e);
                Err(Error::WaitFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etna_core::Errno;
    use etna_drm::{CoreSpec, SimGpu, SimOp, SubmitRequest};
    use etna_mem::DeviceRegistry;
    use std::sync::Arc;

    #[test]
    fn test_specs_cached() {
        let gpu = SimGpu::single_core();
        let file = Arc::new(gpu.open());
        let dev = DeviceRegistry::new().open(Arc::clone(&file) as Arc<dyn KernelGateway>);

        let pipe = Pipe::new(&dev, 0, PipeId::ThreeD).unwrap();
        assert_eq!(file.calls(SimOp::GetParam), Param::ALL.len() as u32);
        assert_eq!(pipe.specs().model, 0x2000);
        assert_eq!(pipe.param(Param::Revision.raw()), Ok(0x5108));
        assert_eq!(pipe.param(Param::NumConstants.raw()), Ok(168));

        // Served from the cache
        assert_eq!(file.calls(SimOp::GetParam), Param::ALL.len() as u32);
    }

    #[test]
    fn test_unknown_param() {
        let gpu = SimGpu::single_core();
        let dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        let pipe = Pipe::new(&dev, 0, PipeId::TwoD).unwrap();
        assert_eq!(pipe.param(0x42), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_gpu_not_found() {
        let gpu = SimGpu::new(vec![CoreSpec::gc2000(), CoreSpec::absent()]);
        let dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        assert!(Pipe::new(&dev, 0, PipeId::ThreeD).is_ok());
        assert_eq!(Pipe::new(&dev, 1, PipeId::ThreeD).unwrap_err(), Error::GpuNotFound);
        assert_eq!(
            Pipe::new(&dev, 2, PipeId::ThreeD).unwrap_err(),
            Error::QueryFailed(Errno::ENODEV)
        );
    }

    #[test]
    fn test_query_failure() {
        let gpu = SimGpu::single_core();
        let file = Arc::new(gpu.open());
        let dev = DeviceRegistry::new().open(Arc::clone(&file) as Arc<dyn KernelGateway>);
        file.fail_next(SimOp::GetParam, Errno::EINVAL);
        assert_eq!(
            Pipe::new(&dev, 0, PipeId::ThreeD).unwrap_err(),
            Error::QueryFailed(Errno::EINVAL)
        );
    }

    #[test]
    fn test_wait_timeout_and_failure() {
        let gpu = SimGpu::single_core();
        let file = Arc::new(gpu.open());
        let dev = DeviceRegistry::new().open(Arc::clone(&file) as Arc<dyn KernelGateway>);
        let pipe = Pipe::new(&dev, 0, PipeId::ThreeD).unwrap();

        gpu.hold_completion(true);
        let fence = file
            .submit(&SubmitRequest {
                core: 0,
                pipe: PipeId::ThreeD,
                bos: &[],
                relocs: &[],
                stream: &[0, 0],
            })
            .unwrap();
        assert_eq!(pipe.wait(fence, 5), Err(Error::WaitTimeout));

        gpu.hold_completion(false);
        assert_eq!(pipe.wait(fence, 5), Ok(()));
        assert_eq!(
            pipe.wait(fence.next(), 5),
            Err(Error::WaitFailed(Errno::EINVAL))
        );
    }
}
