use std::io::Write;

/// 初始化全局 logger
///
/// 格式: `[时间] LEVEL (线程) [文件:行] 消息`。
/// 资源线程和主线程交替输出，所以线程名是必须的。
/// 默认级别为 Info，可以通过 `RUST_LOG` 覆盖。
pub fn init_log() {
    env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => {
                    buf.default_level_style(log::Level::Warn).fg_color(Some(anstyle::AnsiColor::Yellow.into()))
                }
                log::Level::Error => {
                    buf.default_level_style(log::Level::Error).fg_color(Some(anstyle::AnsiColor::Red.into()))
                }
                _ => buf.default_level_style(record.level()),
            };
            let thread_style = info_style.fg_color(Some(anstyle::AnsiColor::Cyan.into()));
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let current = std::thread::current();
            let thread = current.name().unwrap_or("unnamed");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {thread_style}({thread}){thread_style:#} \
                 {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
