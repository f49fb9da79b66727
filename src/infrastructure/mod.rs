//! 基础设施：传输层、Bitcoin 数据源、注册表、助记词保险库与日志

pub mod bitcoin_provider;
pub mod log_redact;
pub mod logging;
pub mod registry;
pub mod rpc;
pub mod rpc_validator;
pub mod vault;
