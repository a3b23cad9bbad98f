use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error(
        "declaration file not found. Looked for:\n\
        - current directory: infra.local.kdl, infra.kdl, .infra.kdl\n\
        - ./.fleetform/ directory\n\
        - ~/.config/fleetform/infra.kdl\n\
        Set FLEETFORM_CONFIG_PATH to point at a file directly"
    )]
    DeclarationFileNotFound,

    #[error("invalid settings file {path}: {source}")]
    InvalidSettings {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
