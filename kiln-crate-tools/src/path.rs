use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let shader = KilnPath::assets_path("shaders/default.vert"); // assets/shaders/default.vert
/// let config = KilnPath::config_path("kiln.toml");            // config/kiln.toml
/// ```
pub struct KilnPath {}
// 核心路径
impl KilnPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }
}
// 根目录下
impl KilnPath {
    /// 资源的根目录，`ResourceManager` 的相对路径都基于这里
    pub fn assets_root() -> PathBuf {
        Self::workspace_path().join("assets")
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::assets_root().join(filename)
    }

    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_workspace() {
        let root = KilnPath::workspace_path();
        assert!(root.join("Cargo.toml").exists());
        assert!(KilnPath::assets_path("shaders/default.vert").starts_with(&root));
        assert_eq!(KilnPath::config_path("kiln.toml"), root.join("config").join("kiln.toml"));
    }
}
