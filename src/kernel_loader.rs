//! OpenCL 内核源代码加载模块
//!
//! 内核源文件不随程序编译，运行时从内核目录按依赖顺序读取并拼接。

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::PROFANITY_MAX_SCORE;

/// 按依赖顺序排列的内核源文件
///
/// 1. Keccak-256 (地址派生)
/// 2. SHA-256 (Base58Check 校验和)
/// 3. 主搜索内核 (椭圆曲线、批量求逆、匹配评分)
pub const KERNEL_FILES: [&str; 3] = ["keccak.cl", "sha256.cl", "profanity.cl"];

/// 内核入口函数名
pub const KERNEL_NAME: &str = "profanity_search";

/// 默认内核目录
pub const DEFAULT_KERNEL_DIR: &str = "kernels";

/// 加载完整内核源代码
///
/// 主内核中的 `#include` 行会被去掉，依赖文件已按顺序拼接在前面。
///
/// # Example
/// ```no_run
/// use tron_profanity::load_kernel_source;
///
/// let kernel_source = load_kernel_source("kernels").expect("Failed to load kernel source");
/// ```
pub fn load_kernel_source(dir: impl AsRef<Path>) -> anyhow::Result<String> {
    let dir = dir.as_ref();
    let mut source = String::new();

    for name in KERNEL_FILES {
        let path = dir.join(name);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read kernel source {}", path.display()))?;
        for line in content.lines() {
            if !line.trim_start().starts_with("#include") {
                source.push_str(line);
                source.push('\n');
            }
        }
        source.push('\n');
    }

    Ok(source)
}

/// 程序构建选项
pub fn build_options(inverse_size: usize) -> String {
    format!(
        "-D PROFANITY_INVERSE_SIZE={} -D PROFANITY_MAX_SCORE={}",
        inverse_size, PROFANITY_MAX_SCORE
    )
}
