use std::{
    io,
    path::PathBuf,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external program ran and exited unsuccessfully.
    #[error("command failed ({exit_code}): {}\n{stderr}", crate::command::render_argv(.argv))]
    ExternalCommand {
        argv: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    /// An external program could not be started at all.
    #[error("unable to run {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A cluster resource the caller depends on is not there (yet).
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The caller passed something meaningless. Indicates a bug in the calling code.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing required executable `{program}`. {hint}")]
    MissingExecutable { program: String, hint: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
