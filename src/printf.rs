//! 定义系统内核的输出方法
//!
//! 日志经由 `log` 门面输出；[`init`] 安装的 [`KernelLogger`] 把每条记录串行地写到
//! 标准错误，并标上产生它的 hart 号。

use core::fmt;
use std::io::{self, Write as _};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::process::CpuManager;
use crate::spinlock::SpinLock;

/// 零大小类型（ZST）的打印结构体，用于在多个 hart 之间对打印操作进行排序。
struct Print;

impl fmt::Write for Print {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        io::stderr().write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

/// 核心打印函数
///
/// 使用自旋锁保证多个 hart 的输出不会交错。写失败时静默丢弃。
fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    static PRINT: SpinLock<()> = SpinLock::new((), "print");

    let guard = PRINT.lock();
    let _ = Print.write_fmt(args);
    drop(guard);
}

/// 内核日志后端
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        _print(format_args!(
            "[hart {}] {:<5} {}: {}\n",
            CpuManager::cpu_id(),
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// 安装 [`KernelLogger`] 并设置最高输出级别。
///
/// # 可能的错误
/// 进程中已经安装过日志后端时返回 `SetLoggerError`，级别不会被修改。
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
