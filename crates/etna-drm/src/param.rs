//! # GPU Parameters
//!
//! Capability ids understood by the `GET_PARAM` request.

/// Queryable GPU capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Param {
    /// Chip model (e.g. 0x2000)
    Model = 0x01,
    /// Chip revision
    Revision = 0x02,
    /// Feature word 0
    Features0 = 0x03,
    /// Feature word 1 (minor features 0)
    Features1 = 0x04,
    /// Feature word 2 (minor features 1)
    Features2 = 0x05,
    /// Feature word 3 (minor features 2)
    Features3 = 0x06,
    /// Feature word 4 (minor features 3)
    Features4 = 0x07,
    /// Vertex stream count
    StreamCount = 0x10,
    /// Highest register index
    RegisterMax = 0x11,
    /// Thread count
    ThreadCount = 0x12,
    /// Vertex cache size
    VertexCacheSize = 0x13,
    /// Shader core count
    ShaderCoreCount = 0x14,
    /// Pixel pipe count
    PixelPipes = 0x15,
    /// Vertex output buffer size
    VertexOutputBufferSize = 0x16,
    /// Buffer size
    BufferSize = 0x17,
    /// Shader instruction count
    InstructionCount = 0x18,
    /// Shader constant count
    NumConstants = 0x19,
}

impl Param {
    /// Every parameter, in query order
    pub const ALL: [Param; 17] = [
        Param::Model,
        Param::Revision,
        Param::Features0,
        Param::Features1,
        Param::Features2,
        Param::Features3,
        Param::Features4,
        Param::StreamCount,
        Param::RegisterMax,
        Param::ThreadCount,
        Param::VertexCacheSize,
        Param::ShaderCoreCount,
        Param::PixelPipes,
        Param::VertexOutputBufferSize,
        Param::BufferSize,
        Param::InstructionCount,
        Param::NumConstants,
    ];

    /// Raw id sent to the kernel
    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Parse a raw id
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.raw() == raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        assert_eq!(Param::from_raw(0x01), Some(Param::Model));
        assert_eq!(Param::from_raw(0x19), Some(Param::NumConstants));
        assert_eq!(Param::from_raw(0x08), None);
    }
}
