use std::error::Error;
use std::fmt::{Display, Formatter};

pub type HarmResult<T> = Result<T, HarmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarmErrorKind {
    Memory,
    InvalidArgument,
    Io,
    DistributedConsistency,
}

impl HarmErrorKind {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidArgument => 2,
            Self::Io => 3,
            Self::DistributedConsistency => 4,
            Self::Memory => 5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "MemoryError",
            Self::InvalidArgument => "InvalidArgument",
            Self::Io => "IOError",
            Self::DistributedConsistency => "DistributedConsistencyError",
        }
    }
}

/// One entry of the propagation trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

impl Display for ErrorFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} in {}", self.file, self.line, self.function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarmError {
    kind: HarmErrorKind,
    code: &'static str,
    message: String,
    frames: Vec<ErrorFrame>,
}

impl HarmError {
    pub fn new(kind: HarmErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn memory(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarmErrorKind::Memory, code, message)
    }

    pub fn invalid_argument(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarmErrorKind::InvalidArgument, code, message)
    }

    pub fn io(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarmErrorKind::Io, code, message)
    }

    pub fn distributed(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarmErrorKind::DistributedConsistency, code, message)
    }

    pub const fn kind(&self) -> HarmErrorKind {
        self.kind
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[ErrorFrame] {
        &self.frames
    }

    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Appends a frame to the trail. Used through [`propagate!`](crate::propagate).
    pub fn with_frame(mut self, file: &'static str, line: u32, function: &'static str) -> Self {
        self.frames.push(ErrorFrame {
            file,
            line,
            function,
        });
        self
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.code, self.message)
    }

    pub fn diagnostic_report(&self) -> String {
        let mut report = self.diagnostic_line();
        report.push_str(&format!("\n  kind: {}", self.kind.as_str()));
        for frame in &self.frames {
            report.push_str(&format!("\n  at {frame}"));
        }
        report
    }
}

impl Display for HarmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.kind.as_str(),
            self.code,
            self.message
        )
    }
}

impl Error for HarmError {}

impl From<std::collections::TryReserveError> for HarmError {
    fn from(error: std::collections::TryReserveError) -> Self {
        Self::memory("MEM.ALLOC", format!("failed to reserve storage: {error}"))
    }
}

/// Wraps a fallible expression so the error gains a frame naming the caller.
#[macro_export]
macro_rules! propagate {
    ($result:expr, $function:expr) => {
        $result.map_err(|error| {
            $crate::domain::HarmError::from(error).with_frame(file!(), line!(), $function)
        })
    };
}

/// Reusable error holder mirroring the caller-side half of the error contract.
///
/// A distributed context must be paired with distributed structures; the
/// synthesis and analysis entry points reject mismatches.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    error: Option<HarmError>,
    distributed: bool,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_distributed() -> Self {
        Self {
            error: None,
            distributed: true,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_none()
    }

    pub fn last(&self) -> Option<&HarmError> {
        self.error.as_ref()
    }

    pub fn record(&mut self, error: HarmError) {
        self.error = Some(error);
    }

    /// Stores the error of a failed result and returns the success value otherwise.
    pub fn capture<T>(&mut self, result: HarmResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.record(error);
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.error = None;
    }

    /// Prints the recorded error to stderr.
    ///
    /// With `terminate` the process exits with the error's exit code. Otherwise
    /// the context is reset and the exit code is returned (0 when empty).
    pub fn handle(&mut self, terminate: bool) -> i32 {
        let Some(error) = self.error.take() else {
            return 0;
        };
        eprintln!("{}", error.diagnostic_report());
        let code = error.exit_code();
        if terminate {
            std::process::exit(code);
        }
        code
    }
}
