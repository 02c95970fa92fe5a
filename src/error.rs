//! Error representations
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::Utf8Error,
    string::FromUtf8Error,
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GeneralError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GeneralError {
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load(..))
    }

    pub fn as_load(&self) -> Option<&LoadError> {
        if let Self::Load(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn try_into_load(self) -> Result<LoadError, Self> {
        if let Self::Load(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(..))
    }

    pub fn as_io(&self) -> Option<&std::io::Error> {
        if let Self::Io(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

/// Error for a record or archive that could not be loaded.
#[derive(Debug, thiserror::Error)]
pub struct LoadError {
    kind: LoadErrorKind,
    context: Box<LoadContext>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind) -> Self {
        Self {
            kind,
            context: Default::default(),
            source: None,
        }
    }

    pub fn other(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::new(LoadErrorKind::Other).with_source(error)
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.context.file = Some(path.into());
        self
    }

    pub fn with_offset(mut self, value: u64) -> Self {
        self.context.offset = Some(value);
        self
    }

    pub fn with_snippet<S: Into<String>>(mut self, value: S) -> Self {
        self.context.snippet = Some(value.into());
        self
    }

    pub fn with_source<T: Into<Box<dyn std::error::Error + Send + Sync>>>(
        mut self,
        source: T,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> &LoadErrorKind {
        &self.kind
    }

    pub fn file(&self) -> Option<&Path> {
        self.context.file.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.context.offset
    }

    pub fn snippet(&self) -> Option<&String> {
        self.context.snippet.as_ref()
    }

    /// Wraps the error for use in `std::io::Read` implementations.
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, self)
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "archive load failed: {}", self.kind)?;

        if let Some(file) = self.file() {
            write!(f, " file '{:?}'", file)?;
        }

        if let Some(offset) = self.offset() {
            write!(f, " offset {}", offset)?;
        }

        if let Some(snippet) = self.snippet() {
            write!(f, " near '{}'", snippet)?;
        }

        Ok(())
    }
}

impl From<FromUtf8Error> for LoadError {
    fn from(value: FromUtf8Error) -> Self {
        LoadError::new(LoadErrorKind::HeaderDecode).with_source(value)
    }
}

impl From<Utf8Error> for LoadError {
    fn from(value: Utf8Error) -> Self {
        LoadError::new(LoadErrorKind::HeaderDecode).with_source(value)
    }
}

impl From<chrono::ParseError> for LoadError {
    fn from(value: chrono::ParseError) -> Self {
        LoadError::new(LoadErrorKind::StatusLine).with_source(value)
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum LoadErrorKind {
    /// Statusline does not begin with any of the expected prefixes.
    StatusLine,
    /// The record header block has no `Content-Length` field.
    MissingContentLength,
    /// `Content-Length` is not a non-negative integer.
    InvalidContentLength,
    /// A format-pinned iterator encountered a record of the other format.
    WrongRecordFormat,
    /// A gzip member contains more than one record.
    MultiRecordGzipMember,
    /// A declared digest did not match the computed digest.
    DigestMismatch,
    /// Chunked transfer-encoding framing failure.
    ChunkedData,
    /// Header bytes decode under neither UTF-8 nor ISO-8859-1.
    HeaderDecode,
    /// A header block exceeded the size cap.
    HeaderTooBig,
    /// The stream ended inside a record.
    UnexpectedEof,
    Other,
}

impl Display for LoadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::StatusLine => "unexpected status line",
            Self::MissingContentLength => "missing content length",
            Self::InvalidContentLength => "invalid content length",
            Self::WrongRecordFormat => "wrong record format",
            Self::MultiRecordGzipMember => {
                "gzip member contains multiple records; \
                run 'recompress' to repair the archive"
            }
            Self::DigestMismatch => "digest mismatch",
            Self::ChunkedData => "invalid chunked encoding",
            Self::HeaderDecode => "undecodable header bytes",
            Self::HeaderTooBig => "header block too big",
            Self::UnexpectedEof => "unexpected end of stream",
            Self::Other => "other",
        };

        f.write_str(value)
    }
}

#[derive(Debug, Default)]
struct LoadContext {
    file: Option<PathBuf>,
    offset: Option<u64>,
    snippet: Option<String>,
}
