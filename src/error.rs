use thiserror::Error;

/// Pipeline stage a hook error was raised in, carried for attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Config,
    ConfigResolved,
    Resolve,
    Load,
    Transform,
    BuildEnd,
    Finish,
    ConfigureDevServer,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HookStage::Config => "config",
            HookStage::ConfigResolved => "configResolved",
            HookStage::Resolve => "resolve",
            HookStage::Load => "load",
            HookStage::Transform => "transform",
            HookStage::BuildEnd => "buildEnd",
            HookStage::Finish => "finish",
            HookStage::ConfigureDevServer => "configureDevServer",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Virtual module error: {0}")]
    Virtual(#[from] VirtualModuleError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown module type: {0}")]
    UnknownModuleType(String),
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("duplicate plugin name: {0}")]
    DuplicatePluginName(String),

    #[error("resolution cycle while resolving '{specifier}' from {importer:?}")]
    ResolutionCycle {
        specifier: String,
        importer: Option<String>,
    },

    #[error("plugin '{plugin}' failed to transform '{module}': {message}")]
    TransformFailed {
        plugin: String,
        module: String,
        message: String,
    },

    #[error("plugin '{plugin}' failed in {stage} hook for '{module}': {message}")]
    Failed {
        plugin: String,
        stage: HookStage,
        module: String,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum VirtualModuleError {
    #[error("virtual module not found: {0}")]
    NotFound(String),

    #[error("malformed virtual module id: {0}")]
    MalformedId(String),

    #[error("virtual module generator failed for '{id}': {message}")]
    GeneratorFailed { id: String, message: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session id already in use: {0}")]
    Conflict(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("delivery to session '{session_id}' failed: {message}")]
    DeliveryFailed { session_id: String, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl warp::reject::Reject for PipelineError {}
