// Declare submodules for the cross-context messaging domain
pub mod bridge;
pub mod types;

pub use bridge::{
    bridge, request_upload_config, spawn_config_responder, BridgeChannels, StaticConfigProvider,
    UploadConfigProvider,
};
pub use types::{ForegroundRequest, WorkerCommand, WorkerEvent};
