use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Lex error: unexpected character '{ch}' at position {position}")]
    Lex { ch: char, position: usize },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Table '{0}' is not registered")]
    UnresolvedTable(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    /// Stable short name of the error class, for callers that report it.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Lex { .. } => "LexError",
            CompileError::Parse(_) => "ParseError",
            CompileError::UnresolvedTable(_) => "UnresolvedTableError",
            CompileError::UnsupportedFeature(_) => "UnsupportedFeatureError",
            CompileError::Binding(_) => "BindingError",
            CompileError::Config(_) => "ConfigError",
            CompileError::Io(_) => "IoError",
        }
    }
}

impl serde::Serialize for CompileError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<toml::de::Error> for CompileError {
    fn from(err: toml::de::Error) -> Self {
        CompileError::Config(err.to_string())
    }
}
