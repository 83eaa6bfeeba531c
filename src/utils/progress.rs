use std::time::Duration;

/// 计算上传百分比，四舍五入并限制在 0..=100
///
/// `total` 为 0 时无法计算，返回 None。
pub fn percentage(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }

    let loaded = loaded as u128;
    let total = total as u128;
    let percent = (loaded * 100 + total / 2) / total;

    Some(percent.min(100) as u8)
}

/// 以 KB 显示文件大小，四舍五入
pub fn format_kib(bytes: u64) -> String {
    format!("{} KB", bytes.saturating_add(512) / 1024)
}

/// 任务耗时，`m:ss`，超过一小时为 `h:mm:ss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    match total / 3600 {
        0 => format!("{}:{:02}", total / 60, total % 60),
        hours => format!("{}:{:02}:{:02}", hours, total % 3600 / 60, total % 60),
    }
}
