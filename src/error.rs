use std::fmt;

#[derive(Debug)]
pub enum GrabError {
    /// Opening the input desktop or duplicating an output was refused.
    AccessDenied,

    /// Duplication was invalidated (device lost, desktop switch, invalid call).
    AccessLost,

    /// Duplication is not implemented or unsupported for this configuration.
    Unsupported(String),

    /// The display driver is applying a mode change.
    ModeChangeInProgress,

    Timeout,

    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    BufferOverflow,

    /// A grabbed screen references a capture session that no longer exists.
    MissingSession(usize),

    InvalidConfig(String),

    WorkerDead,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrabErrorClass {
    /// Capture can never work for this configuration.
    FatalToFeature,
    /// Expected, self-healing access restriction.
    TransientDenied,
    /// Fixed by the next reallocation.
    Recoverable,
    Hard,
}

impl GrabError {
    pub fn class(&self) -> GrabErrorClass {
        match self {
            Self::Unsupported(_) => GrabErrorClass::FatalToFeature,
            Self::AccessDenied => GrabErrorClass::TransientDenied,
            Self::AccessLost | Self::ModeChangeInProgress | Self::Timeout => {
                GrabErrorClass::Recoverable
            }
            Self::DimensionMismatch { .. }
            | Self::BufferOverflow
            | Self::MissingSession(_)
            | Self::InvalidConfig(_)
            | Self::WorkerDead
            | Self::Platform(_) => GrabErrorClass::Hard,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            GrabErrorClass::TransientDenied | GrabErrorClass::Recoverable
        )
    }
}

impl fmt::Display for GrabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "access to the desktop or output was denied"),
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::Unsupported(message) => {
                write!(f, "desktop duplication is not supported: {message}")
            }
            Self::ModeChangeInProgress => write!(f, "display mode change in progress"),
            Self::Timeout => write!(f, "no desktop frame available within timeout"),
            Self::DimensionMismatch {
                expected_width,
                expected_height,
                actual_width,
                actual_height,
            } => write!(
                f,
                "captured surface is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
            ),
            Self::BufferOverflow => write!(f, "screen buffer size overflow"),
            Self::MissingSession(id) => {
                write!(f, "grabbed screen references missing capture session #{id}")
            }
            Self::InvalidConfig(message) => write!(f, "invalid grabber configuration: {message}"),
            Self::WorkerDead => write!(f, "reallocation worker is not running"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for GrabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type GrabResult<T> = Result<T, GrabError>;

/// Outcome of one `grab_screens` cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrabStatus {
    /// Buffers refreshed, at least one screen updated.
    Ok,
    /// Nothing usable this cycle. Previous buffers, if any, stay valid.
    FrameNotReady,
    /// The cycle failed. The caller may retry on the next cycle.
    Error,
}
