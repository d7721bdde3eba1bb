use std::sync::Arc;

use kiln_gfx::backend::GfxBackend;
use kiln_resource::manager::ResourceManager;

pub mod global_uniforms;

/// 外部应用接口 trait
///
/// 定义应用生命周期的关键钩子函数。所有自定义应用需实现此 trait。
///
/// # 开发模式
/// ```ignore
/// #[derive(Default)]
/// struct MyApp { texture: Option<ResourcePtr<Texture>> }
///
/// impl OuterApp for MyApp {
///     fn init(&mut self, manager: &ResourceManager) {
///         self.texture = manager.load("textures/a.png", UpdatePolicy::Manual, Some("textures/a.png")).ok();
///     }
/// }
///
/// fn main() {
///     HeadlessApp::run(Box::new(MyApp::default()));
/// }
/// ```
pub trait OuterApp {
    fn init(&mut self, _manager: &ResourceManager) {}

    /// 每帧更新逻辑（可选），在 `ResourceManager::update` 之后调用
    fn update(&mut self, _manager: &ResourceManager, _frame: u64) {}

    /// 使用已经可用的资源（可选）
    fn draw(&self, _gfx: &Arc<dyn GfxBackend>) {}

    /// 在资源管理器销毁之前调用，释放 relation 和资源指针
    fn shutdown(&mut self, _manager: &ResourceManager) {}
}
