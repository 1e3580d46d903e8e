use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing tunable parameter, found before any processing starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed command-line argument of the job generator.
    #[error("argument error: {0}")]
    Argument(String),

    #[error("invalid source directory {}: missing `{}` subdirectory", .path.display(), .missing)]
    DirectoryStructure { path: PathBuf, missing: &'static str },

    #[error("directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to load image {}: {}", .path.display(), .source)]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save image {}: {}", .path.display(), .source)]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to copy {} to {}: {}", .from.display(), .to.display(), .source)]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by a matcher or filter.
    #[error("disparity computation failed: {0}")]
    Matching(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
