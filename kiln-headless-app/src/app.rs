use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use kiln_crate_tools::init_log::init_log;
use kiln_crate_tools::path::KilnPath;
use kiln_crate_tools::toml_config::load_toml_or_default;
use kiln_gfx::backend::{ContextKind, GfxBackend};
use kiln_gfx::headless::HeadlessBackend;
use kiln_resource::manager::ResourceManager;
use kiln_resource::status::ResetMode;

use crate::config::{AppConfig, RunConfig};
use crate::outer_app::OuterApp;

pub struct HeadlessApp {
    gfx: Arc<dyn GfxBackend>,
    manager: ResourceManager,
    outer_app: Box<dyn OuterApp>,
    run_config: RunConfig,
}
// 总的 main 函数
impl HeadlessApp {
    /// 整个程序的入口
    pub fn run(outer_app: Box<dyn OuterApp>) {
        Self::init_env();

        let mut app = match Self::new(outer_app) {
            Ok(app) => app,
            Err(e) => {
                log::error!("Failed to start: {e:#}");
                return;
            }
        };
        app.run_loop();

        log::info!("end run.");
        app.destroy();
    }

    fn init_env() {
        init_log();
        #[cfg(feature = "profiling")]
        tracy_client::Client::start();
    }
}
// new & init
impl HeadlessApp {
    fn new(mut outer_app: Box<dyn OuterApp>) -> anyhow::Result<Self> {
        let config: AppConfig = load_toml_or_default(KilnPath::config_path("kiln.toml"))?;
        let config = config.resolve_content_root(&KilnPath::workspace_path());
        log::info!("Content root: {}", config.resource.content_root.display());

        let gfx: Arc<dyn GfxBackend> = Arc::new(HeadlessBackend::new(config.headless));
        if !gfx.bind_context(ContextKind::Render) {
            anyhow::bail!("render context could not be bound to the main thread");
        }

        let manager = ResourceManager::new(gfx.clone(), config.resource).context("failed to create resource manager")?;
        outer_app.init(&manager);

        Ok(Self {
            gfx,
            manager,
            outer_app,
            run_config: config.run,
        })
    }
}
// destroy
impl HeadlessApp {
    fn destroy(mut self) {
        self.outer_app.shutdown(&self.manager);
        let Self { gfx, manager, .. } = self;
        drop(manager);
        gfx.unbind_context(ContextKind::Render);
    }
}
// update
impl HeadlessApp {
    fn run_loop(&mut self) {
        let frame_time = Duration::from_millis(self.run_config.frame_ms);
        for frame in 0..self.run_config.frames {
            let _span = tracy_client::span!("frame");
            self.manager.update();
            self.outer_app.update(&self.manager, frame);
            self.outer_app.draw(&self.gfx);

            if self.run_config.reset_at_frame == Some(frame) {
                self.simulate_device_loss(frame);
            }
            thread::sleep(frame_time);
        }
    }

    /// 与真实的上下文丢失相同的流程：先整体退出，再整体初始化
    fn simulate_device_loss(&mut self, frame: u64) {
        let _span = tracy_client::span!("simulate_device_loss");
        log::warn!("Simulating device loss at frame {}", frame);
        if let Err(e) = self.manager.reset(ResetMode::Exit) {
            log::error!("Reset (exit) failed: {}", e);
        }
        if let Err(e) = self.manager.reset(ResetMode::Init) {
            log::error!("Reset (init) failed: {}", e);
        }
    }
}
