//! GPU Tron 靓号地址搜索系统 - 主程序
//!
//! 使用方式:
//!   tron-profanity --matching TUqEg3dzVEJNQSVW2HY98z5X8SBdhmao8D --suffix-count 6
//!   tron-profanity --matching targets.txt --prefix-count 2 --suffix-count 5 --quit-count 1
//!   tron-profanity --generate 100 --output keys.txt

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use tron_profanity::{Backend, BatchSizing, MatchTarget, SearchRequest, prepare_search};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "tron-profanity")]
#[command(about = "GPU Tron 靓号地址搜索系统")]
#[command(version = "0.1.0")]
struct Args {
    /// 匹配目标: 完整地址、20 字符 (前 10 + 后 10) 目标或地址文件
    #[arg(short, long)]
    matching: Option<String>,

    /// 生成任意地址的数量 (1..=10000)，与 --matching 互斥
    #[arg(short, long)]
    generate: Option<u64>,

    /// 前缀至少匹配的字符数 (0..=10)
    #[arg(short = 'b', long, default_value = "0")]
    prefix_count: usize,

    /// 后缀至少匹配的字符数 (0..=10)
    #[arg(short = 'e', long, default_value = "6")]
    suffix_count: usize,

    /// 找到这么多个匹配后退出 (0 表示不退出)
    #[arg(short, long, default_value = "0")]
    quit_count: u64,

    /// 跳过指定序号的设备，可重复
    #[arg(short, long)]
    skip: Vec<usize>,

    /// 本地工作组大小
    #[arg(short = 'w', long, default_value = "64")]
    work: usize,

    /// 每次调度的候选数上限 (0 表示 inverse-size * inverse-multiple)
    #[arg(short = 'W', long, default_value = "0")]
    work_max: usize,

    /// 每次批量求逆覆盖的候选数
    #[arg(short, long, default_value = "255")]
    inverse_size: usize,

    /// 求逆批次的倍数
    #[arg(short = 'I', long, default_value = "16384")]
    inverse_multiple: usize,

    /// 不读写程序二进制缓存
    #[arg(short, long, default_value_t = false)]
    no_cache: bool,

    /// 结果输出文件 (每行 私钥,地址)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 结果 POST 地址
    #[arg(short, long)]
    post: Option<String>,

    /// 内核源文件目录
    #[arg(long, default_value = "kernels")]
    kernel_dir: PathBuf,

    /// 程序缓存目录
    #[arg(long, default_value = ".")]
    cache_dir: PathBuf,

    /// 使用指定数量的 CPU 线程代替 OpenCL 设备
    #[arg(long)]
    cpu: Option<usize>,

    /// 进度输出间隔 (毫秒)
    #[arg(long, default_value = "1000")]
    poll_interval: u64,
}

impl Args {
    fn into_request(self) -> anyhow::Result<SearchRequest> {
        let target = MatchTarget::from_options(self.matching, self.generate)?;
        let mut request = SearchRequest::new(target);
        request.prefix_count = self.prefix_count;
        request.suffix_count = self.suffix_count;
        request.quit_count = self.quit_count;
        request.skip = self.skip;
        request.sizing = BatchSizing {
            local_work_size: self.work,
            work_max: self.work_max,
            inverse_size: self.inverse_size,
            inverse_multiple: self.inverse_multiple,
        };
        request.no_cache = self.no_cache;
        request.cache_dir = self.cache_dir;
        request.kernel_dir = self.kernel_dir;
        request.output = self.output;
        request.post_url = self.post;
        request.backend = match self.cpu {
            Some(threads) => Backend::Cpu(threads),
            None => Backend::OpenCl,
        };
        request.poll_interval = Duration::from_millis(self.poll_interval);
        Ok(request)
    }
}

/// 主函数
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("启动 GPU Tron 靓号地址搜索系统");
    info!("参数: {:?}", args);

    let request = args.into_request()?;
    match &request.target {
        MatchTarget::Matching(target) => info!(
            "搜索条件: {} (前缀 {} / 后缀 {})",
            target, request.prefix_count, request.suffix_count
        ),
        MatchTarget::Generate(count) => info!("生成模式: {} 个地址", count),
    }

    let prepared = prepare_search(&request)?;
    let control = prepared.control();
    ctrlc::set_handler(move || {
        warn!("收到中断信号，等待进行中的批次结束...");
        control.request_stop();
    })?;

    let response = prepared.run()?;

    println!();
    println!("========================================");
    if response.found() {
        println!("✓ 找到 {} 个符合条件的地址", response.delivered);
        // 无界运行不保留结果，只在输出文件/推送端
        for m in &response.matches {
            println!("{}", m.to_line());
        }
    } else {
        println!("✗ 未找到符合条件的地址");
    }
    println!("搜索时间: {:.2} 秒", response.elapsed().as_secs_f64());
    println!(
        "检查地址数: {} | 平均速度: {:.0} 地址/秒",
        response.total_checked(),
        response.speed()
    );
    for device in &response.summary.devices {
        println!(
            "  设备 {} ({}): {} 个候选{}{}",
            device.device_index,
            device.name,
            device.candidates,
            if device.dropped > 0 {
                format!(" [丢弃 {} 个命中]", device.dropped)
            } else {
                String::new()
            },
            if device.failed { " [失效]" } else { "" }
        );
    }
    println!("========================================");

    Ok(())
}
