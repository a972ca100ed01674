use std::path::PathBuf;

pub type EngineResult<T, E = EngineReport> = core::result::Result<T, E>;

/// Failures the engine reports by kind. Everything else travels as an opaque report.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("descriptor pool exhausted ({capacity} slots in use)")]
    DescriptorPoolExhausted { capacity: u32 },
    #[error("no run of {count} contiguous free descriptors")]
    NoContiguousRange { count: u32 },
    #[error("descriptor index {index} is outside a pool of {capacity}")]
    DescriptorOutOfRange { index: u32, capacity: u32 },
    #[error("descriptor index {index} freed twice")]
    DescriptorDoubleFree { index: u32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("constant buffer update of {requested} bytes exceeds capacity {capacity}")]
    ConstantBufferOverflow { requested: usize, capacity: usize },
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("buffer is not mapped")]
    NotMapped,
    #[error("unsupported image format {0:?}")]
    UnsupportedImageFormat(String),
    #[error("{call} called while the frame is {phase}")]
    FrameOutOfOrder {
        call: &'static str,
        phase: &'static str,
    },
    #[error("device stopped making progress waiting for fence {value}")]
    DeviceHung { value: u64 },
    #[error("fence value {value} was never signaled (last signaled {last})")]
    FenceNeverSignaled { value: u64, last: u64 },
    #[error("shader bytecode not found at {0}")]
    ShaderMissing(PathBuf),
    #[error("pipeline rejected: {0}")]
    PipelineRejected(String),
}

pub struct EngineReport {
    inner: eyre::Report,
}

impl EngineReport {
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    pub fn gpu_error(&self) -> Option<&GpuError> {
        self.downcast_ref::<GpuError>()
    }

    pub fn wrap_err<D>(self, msg: D) -> Self
    where
        D: std::fmt::Display + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.wrap_err(msg),
        }
    }
}

impl From<eyre::Report> for EngineReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<EngineReport> for eyre::Report {
    fn from(report: EngineReport) -> Self {
        report.inner
    }
}

impl From<GpuError> for EngineReport {
    fn from(error: GpuError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl From<std::io::Error> for EngineReport {
    fn from(error: std::io::Error) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl From<image::ImageError> for EngineReport {
    fn from(error: image::ImageError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl std::fmt::Display for EngineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::fmt::Debug for EngineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for EngineReport {
    fn from(error: windows::core::Error) -> Self {
        Self {
            inner: eyre::Report::new(WrappedWindowsError::from(error)),
        }
    }
}

/// HRESULT and system message of a failed COM call.
#[cfg(windows)]
pub struct WrappedWindowsError {
    code: windows::core::HRESULT,
    message: String,
}

#[cfg(windows)]
impl WrappedWindowsError {
    pub fn code(&self) -> windows::core::HRESULT {
        self.code
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for WrappedWindowsError {
    fn from(error: windows::core::Error) -> Self {
        Self {
            code: error.code(),
            message: error.message(),
        }
    }
}

#[cfg(windows)]
impl std::error::Error for WrappedWindowsError {}

#[cfg(windows)]
impl std::fmt::Display for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.message, self.code)
    }
}

#[cfg(windows)]
impl std::fmt::Debug for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.message, self.code)
    }
}
