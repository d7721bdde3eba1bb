//! 无窗口的应用框架
//!
//! [`app::HeadlessApp`] 负责日志、配置、图形后端和资源管理器的创建，
//! 以固定的帧间隔驱动 [`outer_app::OuterApp`]，并可以在指定帧模拟一次设备丢失。

pub mod app;
pub mod config;
pub mod outer_app;
