//! VIGIL 服务端: 配置装载、控制面客户端与运行时装配

pub mod config;
pub mod control;
pub mod worker;

pub use config::AppConfig;
pub use control::ControlPlaneClient;
pub use worker::Runtime;
