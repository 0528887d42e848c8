//! Renderer error types.
//!
//! Every fallible operation returns [`RenderResult`]. Only
//! [`RenderError::SurfaceStale`] is recoverable: the renderer absorbs it by
//! recreating the swapchain and everything derived from it. All other kinds
//! are fatal and surface to the caller unchanged.

use thiserror::Error;

/// How the caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Handled internally by resize-and-retry.
    Recoverable,
    /// No degraded mode exists; stop rendering.
    Fatal,
}

/// Renderer error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Failed to initialize renderer: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Invalid render graph: {0}")]
    InvalidGraph(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Surface is stale and must be recreated")]
    SurfaceStale,
    #[error("{resource} capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded {
        resource: &'static str,
        requested: u64,
        available: u64,
    },
    #[error("Unsupported hardware: {0}")]
    UnsupportedHardware(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

impl RenderError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RenderError::SurfaceStale => ErrorSeverity::Recoverable,
            _ => ErrorSeverity::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() == ErrorSeverity::Recoverable
    }

    pub(crate) fn capacity(resource: &'static str, requested: u64, available: u64) -> Self {
        RenderError::CapacityExceeded {
            resource,
            requested,
            available,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_surface_is_recoverable() {
        assert!(RenderError::SurfaceStale.is_recoverable());
        assert_eq!(RenderError::DeviceLost.severity(), ErrorSeverity::Fatal);
        assert_eq!(
            RenderError::capacity("ring region", 512, 256).severity(),
            ErrorSeverity::Fatal
        );
        assert!(!RenderError::UnsupportedHardware("no anisotropy".into()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = RenderError::capacity("ring region", 512, 256);
        assert_eq!(
            err.to_string(),
            "ring region capacity exceeded: requested 512, available 256"
        );
        assert_eq!(
            RenderError::SurfaceStale.to_string(),
            "Surface is stale and must be recreated"
        );
    }
}
