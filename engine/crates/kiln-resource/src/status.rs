use std::fmt;

/// 一次 `Resource::load` / `Resource::unload` 调用的结果
///
/// `Busy` 不是错误：状态机还有剩余步骤，稍后再调用一次 `load`。
/// `Ok` 是成功的终态，其余都是失败的终态，终态之后不会再对同一个实例调用 `load`。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum LoadStatus {
    Ok,
    Busy,
    /// 当前状态下不允许这次调用 (例如重复 unload)
    InvalidCall,
    /// 请求本身是错误的 (例如没有给出文件)
    InvalidInput,
    /// 数据无法解码、编译或链接
    InvalidData,
    /// 文件没有数据
    ErrorFile,
}
impl LoadStatus {
    #[inline]
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        *self == Self::Busy
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok | Self::Busy)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_busy()
    }
}
impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::Busy => "busy",
            Self::InvalidCall => "invalid call",
            Self::InvalidInput => "invalid input",
            Self::InvalidData => "invalid data",
            Self::ErrorFile => "file error",
        };
        f.write_str(text)
    }
}

/// 句柄在资源线程里的更新方式
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum UpdatePolicy {
    /// 到达终态后离开更新队列，只有 reload 或 reset 才会重新进入
    #[default]
    Manual,
    /// 每一轮都会检查，reload 请求会被自动处理
    Automatic,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResetMode {
    Init,
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(LoadStatus::Ok.is_terminal());
        assert!(!LoadStatus::Ok.is_failure());
        assert!(!LoadStatus::Busy.is_terminal());
        for status in [
            LoadStatus::InvalidCall,
            LoadStatus::InvalidInput,
            LoadStatus::InvalidData,
            LoadStatus::ErrorFile,
        ] {
            assert!(status.is_failure());
            assert!(status.is_terminal());
        }
    }
}
