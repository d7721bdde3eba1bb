//! Kiln 工具集
//!
//! 提供日志初始化、工作区路径管理和 TOML 配置读取。
//!
//! # KilnPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # 配置
//! 各个 crate 的配置结构体都实现了 `serde::Deserialize`，
//! 通过 [`toml_config::load_toml`] 从文件读取，缺省字段使用默认值。

pub mod init_log;
pub mod path;
pub mod toml_config;
