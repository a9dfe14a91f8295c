use std::io::Write;

/// 初始化全局 logger
///
/// 输出格式：`[时间] 级别 [文件:行号] (线程名) 内容`。
/// 资源流送的大部分日志来自后台 worker，所以额外输出线程名。
///
/// 默认级别为 Info，可以通过 `RUST_LOG` 覆盖。重复调用不会 panic，测试中可以随意调用。
pub fn init_log() {
    let _ = builder().try_init();
}

fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let thread_style = info_style.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Cyan)));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let current = std::thread::current();
            let thread = current.name().unwrap_or("<unnamed>");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {thread_style}({thread}){thread_style:#} {}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env();
    builder
}
