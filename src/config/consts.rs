/// Worker count used when the platform cannot report its available parallelism
pub const DEFAULT_WORKERS_FALLBACK: usize = 4;
/// File extensions recognised as YAML pipeline configurations
pub const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];
/// File extension recognised as a TOML pipeline configuration
pub const TOML_EXTENSION: &str = "toml";
