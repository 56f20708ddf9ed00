use thiserror::Error;

/// Fatal configuration and join failures. I/O failures travel as plain
/// `anyhow` errors with context attached at the call site.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("unknown join kind `{kind}` for column `{name}` (expected one of binary, binary_full, numeric, nearest, popmul, max)")]
    UnknownJoin { kind: String, name: String },

    #[error("join `{kind}` for column `{name}` needs a source `column`")]
    MissingSource { kind: String, name: String },

    #[error("{0} not found in config file")]
    MissingOutputType(String),

    #[error("jurisdiction `{0}` is listed more than once")]
    DuplicateJurisdiction(String),

    #[error("unsupported coordinate reference system `{0}`")]
    UnsupportedCrs(String),

    #[error("source column `{column}` not present in attribute layer {layer}")]
    MissingColumn { column: String, layer: String },

    #[error("population column `{0}` not present on pixels")]
    MissingPopulation(String),
}
