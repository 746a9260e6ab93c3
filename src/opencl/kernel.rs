//! OpenCL 程序构建与搜索内核执行

use std::sync::Arc;

use anyhow::Context as _;
use log::{debug, info, warn};
use ocl::enums::{ProgramInfo, ProgramInfoResult};
use ocl::{Buffer, Context, Kernel, Program, Queue, SpatialDims};
use secp256k1::SecretKey;

use super::cache::ProgramCache;
use super::context::OpenClTarget;
use crate::config::{
    BatchSizing, DispatchConfig, MAX_RESULTS_PER_DISPATCH, MatchCriteria, ResultRecord,
};
use crate::device::{ComputeDevice, DeviceHit, LaneRangeOutput, WorkSize, dispatch_in_ranges};
use crate::kernel_loader::{KERNEL_NAME, build_options};
use crate::keyspace::offset_key;
use crate::pattern::PatternSet;

/// prepare 之后才存在的设备资源
struct Prepared {
    /// 程序与模式缓冲区必须保持存活以确保内核正常工作
    #[allow(dead_code)]
    program: Program,
    #[allow(dead_code)]
    pattern_buffers: (Buffer<u8>, Buffer<u8>),
    kernel: Kernel,
    config: DispatchConfig,
    config_buffer: Buffer<u8>,
    result_buffer: Buffer<u8>,
    count_buffer: Buffer<u32>,
}

impl Prepared {
    /// 执行 lane 区间 `[first_lane, first_lane + lanes)`
    ///
    /// 全局尺寸向上取整到工作组大小，内核按 `config.lanes` 跳过多出的工作项。
    fn run_lanes(
        &self,
        seed: &SecretKey,
        first_lane: usize,
        lanes: usize,
        local: usize,
    ) -> anyhow::Result<LaneRangeOutput> {
        let start = offset_key(seed, (first_lane as u128) * (self.config.inverse_size as u128))?;
        let config = DispatchConfig {
            seed: DispatchConfig::seed_limbs(&start.secret_bytes()),
            lanes: lanes as u32,
            ..self.config
        };
        self.config_buffer.write(&config.to_bytes()[..]).enq()?;
        self.count_buffer.write(&[0u32][..]).enq()?;

        let global = lanes.div_ceil(local) * local;
        unsafe {
            self.kernel
                .cmd()
                .global_work_size(SpatialDims::One(global))
                .enq()?;
        }

        // 阻塞读取，等待本批完成
        let mut count = [0u32];
        self.count_buffer.read(&mut count[..]).enq()?;
        let reported = count[0] as usize;
        if reported == 0 {
            return Ok(LaneRangeOutput {
                hits: Vec::new(),
                reported,
            });
        }

        let kept = reported.min(MAX_RESULTS_PER_DISPATCH);
        let mut bytes = vec![0u8; kept * ResultRecord::SIZE];
        self.result_buffer.read(&mut bytes).enq()?;
        let hits = bytes
            .chunks_exact(ResultRecord::SIZE)
            .map(|chunk| ResultRecord::from_bytes(chunk).map(DeviceHit::from))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(LaneRangeOutput { hits, reported })
    }
}

/// 一个 OpenCL 设备
pub struct OpenClDevice {
    target: OpenClTarget,
    context: Context,
    source: Arc<str>,
    cache: ProgramCache,
    work_size: WorkSize,
    inverse_size: usize,
    prepared: Option<Prepared>,
    dropped: u64,
}

impl OpenClDevice {
    /// `context` 必须属于 `target` 所在的平台
    pub fn new(
        target: OpenClTarget,
        context: Context,
        source: Arc<str>,
        sizing: &BatchSizing,
        cache: ProgramCache,
    ) -> Self {
        Self {
            target,
            context,
            source,
            cache,
            work_size: WorkSize {
                local: sizing.local_work_size,
                global: sizing.lanes(),
            },
            inverse_size: sizing.inverse_size,
            prepared: None,
            dropped: 0,
        }
    }

    pub fn target(&self) -> &OpenClTarget {
        &self.target
    }

    /// 优先使用缓存的二进制，未命中或被拒绝时从源码编译
    fn build_program(&self) -> anyhow::Result<Program> {
        let options = build_options(self.inverse_size);
        let identity = &self.target.identity;

        if let Some(binary) = self.cache.load(self.inverse_size, identity) {
            let binaries = [binary.as_slice()];
            match Program::builder()
                .devices(self.target.device)
                .binaries(&binaries)
                .cmplr_opt(options.as_str())
                .build(&self.context)
            {
                Ok(program) => return Ok(program),
                Err(e) => {
                    warn!("{}: cached program rejected, rebuilding: {}", self.describe(), e);
                    self.cache.invalidate(self.inverse_size, identity);
                }
            }
        }

        info!("Building OpenCL program for {} ({})...", self.describe(), options);
        let program = Program::builder()
            .devices(self.target.device)
            .src(self.source.to_string())
            .cmplr_opt(options.as_str())
            .build(&self.context)
            .with_context(|| format!("program build failed on {}", self.describe()))?;
        info!("OpenCL program built successfully");

        if self.cache.is_enabled() {
            match program.info(ProgramInfo::Binaries) {
                Ok(ProgramInfoResult::Binaries(binaries)) => {
                    if let Some(binary) = binaries.first() {
                        self.cache.store(self.inverse_size, identity, binary);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{}: could not read program binary: {}", self.describe(), e),
            }
        }
        Ok(program)
    }
}

impl ComputeDevice for OpenClDevice {
    fn describe(&self) -> String {
        format!("GPU{} {}", self.target.index, self.target.name)
    }

    fn work_size(&self) -> WorkSize {
        self.work_size
    }

    fn inverse_size(&self) -> usize {
        self.inverse_size
    }

    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()> {
        let program = self.build_program()?;
        let queue = Queue::new(&self.context, self.target.device, None)?;

        let (mask, value) = patterns.flatten();
        let mask_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(mask.len())
            .copy_host_slice(&mask)
            .build()?;
        let value_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(value.len())
            .copy_host_slice(&value)
            .build()?;

        let config_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(DispatchConfig::SIZE)
            .build()?;
        let result_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_WRITE_ONLY)
            .len(MAX_RESULTS_PER_DISPATCH * ResultRecord::SIZE)
            .build()?;
        let count_buffer = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(ocl::flags::MEM_READ_WRITE)
            .len(1)
            .build()?;

        let kernel = Kernel::builder()
            .program(&program)
            .name(KERNEL_NAME)
            .queue(queue)
            .global_work_size(SpatialDims::One(self.work_size.global))
            .local_work_size(SpatialDims::One(self.work_size.local))
            .arg(&config_buffer)
            .arg(&mask_buffer)
            .arg(&value_buffer)
            .arg(&result_buffer)
            .arg(&count_buffer)
            .build()?;

        let config = DispatchConfig {
            seed: [0; 4],
            lanes: self.work_size.global as u32,
            inverse_size: self.inverse_size as u32,
            pattern_count: patterns.len() as u32,
            pattern_width: patterns.width() as u32,
            prefix_count: criteria.prefix_count as u32,
            suffix_count: criteria.suffix_count as u32,
            window: patterns.window().as_u32(),
        };
        debug!("{}: patterns uploaded ({} bytes)", self.describe(), mask.len());

        self.prepared = Some(Prepared {
            program,
            pattern_buffers: (mask_buffer, value_buffer),
            kernel,
            config,
            config_buffer,
            result_buffer,
            count_buffer,
        });
        Ok(())
    }

    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        let name = self.describe();
        let local = self.work_size.local;
        let prepared = self
            .prepared
            .as_ref()
            .context("device used before prepare")?;

        let (hits, dropped) = dispatch_in_ranges(&name, self.work_size.global, |first, lanes| {
            prepared.run_lanes(seed, first, lanes, local)
        })?;
        self.dropped += dropped;
        Ok(hits)
    }

    fn dropped_results(&self) -> u64 {
        self.dropped
    }
}
