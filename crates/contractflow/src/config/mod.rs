pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    ApiFormat, BackendConfig, CacheSettings, ClientSettings, Config, ModelRoles, OcrEngineKind,
    OcrSettings, PipelineSettings, RateLimitSettings, RouterSettings,
};
