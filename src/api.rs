//! 对外提供的 Rust 调用接口

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};
use secp256k1::SecretKey;

use crate::config::{BatchSizing, MAX_GENERATE_COUNT, MatchCriteria, TerminationPolicy};
use crate::cpu::CpuDevice;
use crate::device::ComputeDevice;
use crate::engine::{SearchControl, SearchEngine, SearchSummary};
use crate::error::{Result, SearchError};
use crate::kernel_loader::{DEFAULT_KERNEL_DIR, load_kernel_source};
use crate::opencl::{
    OpenClDevice, ProgramCache, enumerate_devices, platform_contexts, select_devices,
};
use crate::pattern::PatternSet;
use crate::sink::{Match, ResultSink, Retention};

/// 搜索目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTarget {
    /// 单个地址、20 字符目标或地址文件路径
    Matching(String),
    /// 生成指定数量的任意地址
    Generate(u64),
}

impl MatchTarget {
    /// 由两个互斥的命令行选项得到目标
    pub fn from_options(
        matching: Option<String>,
        generate: Option<u64>,
    ) -> Result<Self> {
        match (matching, generate) {
            (Some(_), Some(_)) => Err(SearchError::ConflictingTarget),
            (Some(target), None) => Ok(MatchTarget::Matching(target)),
            (None, Some(count)) => Ok(MatchTarget::Generate(count)),
            (None, None) => Err(SearchError::MissingTarget),
        }
    }
}

/// 计算后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    OpenCl,
    /// 指定数量的主机线程设备
    Cpu(usize),
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub target: MatchTarget,
    pub prefix_count: usize,
    pub suffix_count: usize,
    /// 0 表示不限
    pub quit_count: u64,
    /// 跳过的设备序号
    pub skip: Vec<usize>,
    pub sizing: BatchSizing,
    pub no_cache: bool,
    pub cache_dir: PathBuf,
    pub kernel_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub post_url: Option<String>,
    pub backend: Backend,
    pub poll_interval: Duration,
    pub base_seed: Option<[u8; 32]>,
}

impl SearchRequest {
    pub fn new(target: MatchTarget) -> Self {
        let criteria = MatchCriteria::default();
        Self {
            target,
            prefix_count: criteria.prefix_count,
            suffix_count: criteria.suffix_count,
            quit_count: 0,
            skip: Vec::new(),
            sizing: BatchSizing::default(),
            no_cache: false,
            cache_dir: PathBuf::from("."),
            kernel_dir: PathBuf::from(DEFAULT_KERNEL_DIR),
            output: None,
            post_url: None,
            backend: Backend::OpenCl,
            poll_interval: Duration::from_millis(1000),
            base_seed: None,
        }
    }

    /// 在任何设备工作开始前完成全部配置校验
    pub fn plan(&self) -> Result<SearchPlan> {
        self.sizing.validate()?;
        match &self.target {
            MatchTarget::Generate(count) => {
                if *count == 0 || *count > MAX_GENERATE_COUNT {
                    return Err(SearchError::GenerateCountOutOfRange {
                        count: *count,
                        max: MAX_GENERATE_COUNT,
                    });
                }
                Ok(SearchPlan {
                    patterns: PatternSet::generate(),
                    criteria: MatchCriteria::any(),
                    policy: TerminationPolicy::after(*count),
                })
            }
            MatchTarget::Matching(input) => {
                let criteria = MatchCriteria::new(self.prefix_count, self.suffix_count)?;
                let patterns = PatternSet::compile(input)?;
                Ok(SearchPlan {
                    patterns,
                    criteria,
                    policy: TerminationPolicy::after(self.quit_count),
                })
            }
        }
    }

    fn program_cache(&self) -> ProgramCache {
        if self.no_cache {
            ProgramCache::disabled()
        } else {
            ProgramCache::new(&self.cache_dir)
        }
    }
}

/// 校验后的运行参数
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub patterns: PatternSet,
    pub criteria: MatchCriteria,
    pub policy: TerminationPolicy,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// 有 quit count 时为全部结果，无界运行时为空 (结果只在输出端)
    pub matches: Vec<Match>,
    /// 投递过的结果数
    pub delivered: u64,
    pub summary: SearchSummary,
}

impl SearchResponse {
    pub fn found(&self) -> bool {
        self.delivered > 0
    }

    pub fn elapsed(&self) -> Duration {
        self.summary.elapsed
    }

    pub fn total_checked(&self) -> u64 {
        self.summary.candidates
    }

    pub fn speed(&self) -> f64 {
        self.summary.speed()
    }
}

/// 已准备好设备的搜索，运行前可取得控制句柄 (例如给 Ctrl-C 使用)
pub struct PreparedSearch {
    engine: SearchEngine,
    sink: ResultSink,
}

impl PreparedSearch {
    pub fn control(&self) -> Arc<SearchControl> {
        self.engine.control()
    }

    pub fn device_count(&self) -> usize {
        self.engine.session_count()
    }

    pub fn run(self) -> anyhow::Result<SearchResponse> {
        let result = self.engine.run(&self.sink);
        let report = self.sink.finish();
        let summary = result?;
        Ok(SearchResponse {
            matches: report.matches,
            delivered: report.delivered,
            summary,
        })
    }
}

/// 按请求枚举设备并执行搜索
pub fn search(request: SearchRequest) -> anyhow::Result<SearchResponse> {
    prepare_search(&request)?.run()
}

/// 按请求枚举设备，返回尚未启动的搜索
pub fn prepare_search(request: &SearchRequest) -> anyhow::Result<PreparedSearch> {
    let plan = request.plan()?;
    let devices = open_devices(request)?;
    search_with_devices(request, plan, devices)
}

/// 使用调用方提供的设备
pub fn search_with_devices(
    request: &SearchRequest,
    plan: SearchPlan,
    devices: Vec<(usize, Box<dyn ComputeDevice>)>,
) -> anyhow::Result<PreparedSearch> {
    let retention = Retention::for_policy(plan.policy);
    let mut engine = SearchEngine::new(plan.patterns, plan.criteria, plan.policy)?
        .with_poll_interval(request.poll_interval);
    if let Some(seed) = request.base_seed {
        let base = SecretKey::from_slice(&seed).context("invalid seed base")?;
        engine = engine.with_seed_base(base);
    }

    for (index, device) in devices {
        engine.add_device(index, device);
    }

    let sink = ResultSink::from_config(
        request.output.as_deref(),
        request.post_url.as_deref(),
        retention,
    )?;
    Ok(PreparedSearch { engine, sink })
}

fn open_devices(request: &SearchRequest) -> anyhow::Result<Vec<(usize, Box<dyn ComputeDevice>)>> {
    let devices: Vec<(usize, Box<dyn ComputeDevice>)> = match request.backend {
        Backend::Cpu(count) => (0..count)
            .filter(|index| !request.skip.contains(index))
            .map(|index| {
                let device: Box<dyn ComputeDevice> =
                    Box::new(CpuDevice::new(index, &request.sizing));
                (index, device)
            })
            .collect(),
        Backend::OpenCl => open_opencl_devices(request)?,
    };

    if devices.is_empty() {
        return Err(SearchError::NoDevices.into());
    }
    info!("{} compute device(s) selected", devices.len());
    Ok(devices)
}

fn open_opencl_devices(
    request: &SearchRequest,
) -> anyhow::Result<Vec<(usize, Box<dyn ComputeDevice>)>> {
    let source: Arc<str> = Arc::from(load_kernel_source(&request.kernel_dir)?);
    let targets = select_devices(enumerate_devices()?, &request.skip);
    let contexts = platform_contexts(&targets);
    let cache = request.program_cache();

    let mut devices: Vec<(usize, Box<dyn ComputeDevice>)> = Vec::new();
    for target in targets {
        match contexts.get(&target.platform_index) {
            Some(Ok(context)) => {
                let index = target.index;
                let device: Box<dyn ComputeDevice> = Box::new(OpenClDevice::new(
                    target,
                    context.clone(),
                    source.clone(),
                    &request.sizing,
                    cache.clone(),
                ));
                devices.push((index, device));
            }
            Some(Err(e)) => warn!("Device {} ({}) excluded: {:#}", target.index, target.name, e),
            None => {}
        }
    }
    Ok(devices)
}
