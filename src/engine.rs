//! 多设备搜索引擎
//!
//! 每个设备会话在独立线程中循环: 取种子、调度一批、把命中还原为私钥并交给结果汇聚点。
//! 已接受计数与停止标志集中在 [`SearchControl`] 中，由所有会话共享。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use secp256k1::{PublicKey, SECP256K1, SecretKey};

use crate::address::CandidateAddress;
use crate::config::{MatchCriteria, TerminationPolicy};
use crate::device::{ComputeDevice, DeviceHit, WorkSize};
use crate::error::{Result, SearchError};
use crate::keyspace::{SeedSchedule, offset_key, random_secret_key};
use crate::pattern::PatternSet;
use crate::sink::{Match, MatchSender, ResultSink};

/// 引擎运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// 正在准备设备
    Building,
    Running,
    /// 已请求停止，等待进行中的批次结束
    Draining,
    Stopped,
    Failed,
}

struct ControlState {
    accepted: u64,
    state: EngineState,
}

/// 所有设备循环共享的计数与停止控制
pub struct SearchControl {
    inner: Mutex<ControlState>,
    stop: AtomicBool,
    policy: TerminationPolicy,
}

impl SearchControl {
    pub fn new(policy: TerminationPolicy) -> Self {
        Self {
            inner: Mutex::new(ControlState {
                accepted: 0,
                state: EngineState::Idle,
            }),
            stop: AtomicBool::new(false),
            policy,
        }
    }

    /// 为一个候选申请接受名额
    ///
    /// 计数递增与停止判断在同一把锁内完成，达到 quit count 后不再发放名额。
    pub fn try_accept(&self) -> bool {
        let mut inner = self.inner.lock();
        if self.policy.is_bounded() && inner.accepted >= self.policy.quit_count {
            return false;
        }
        inner.accepted += 1;
        if self.policy.is_bounded() && inner.accepted == self.policy.quit_count {
            self.stop.store(true, Ordering::SeqCst);
            if inner.state == EngineState::Running {
                inner.state = EngineState::Draining;
            }
        }
        true
    }

    /// 协作式停止，进行中的批次仍会完成
    pub fn request_stop(&self) {
        let mut inner = self.inner.lock();
        self.stop.store(true, Ordering::SeqCst);
        if inner.state == EngineState::Running {
            inner.state = EngineState::Draining;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> u64 {
        self.inner.lock().accepted
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    fn set_state(&self, state: EngineState) {
        self.inner.lock().state = state;
    }

    fn enter_running(&self) {
        let mut inner = self.inner.lock();
        inner.state = if self.is_stopped() {
            EngineState::Draining
        } else {
            EngineState::Running
        };
    }
}

#[derive(Default)]
struct SessionStats {
    candidates: AtomicU64,
    batches: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicBool,
}

/// 一个已注册设备的运行状态
struct DeviceSession {
    id: usize,
    device_index: usize,
    name: String,
    device: Box<dyn ComputeDevice>,
    work_size: WorkSize,
    inverse_size: usize,
    next_batch: u64,
    stats: Arc<SessionStats>,
}

impl DeviceSession {
    fn run_loop(&mut self, schedule: &SeedSchedule, control: &SearchControl, sender: &MatchSender) {
        info!(
            "Device session {} started on {} (local {}, global {}, inverse {})",
            self.id, self.name, self.work_size.local, self.work_size.global, self.inverse_size
        );
        let per_dispatch = self.device.candidates_per_dispatch();

        while !control.is_stopped() {
            let seed = match schedule.seed_for(self.id, self.next_batch) {
                Ok(seed) => seed,
                Err(e) => {
                    error!("{}: {:#}", self.name, e);
                    self.stats.failed.store(true, Ordering::SeqCst);
                    return;
                }
            };
            self.next_batch += 1;

            let hits = match self.device.dispatch(&seed) {
                Ok(hits) => hits,
                Err(e) => {
                    error!("{} dispatch failed, device removed from run: {:#}", self.name, e);
                    self.stats.failed.store(true, Ordering::SeqCst);
                    return;
                }
            };
            self.stats.candidates.fetch_add(per_dispatch, Ordering::Relaxed);
            self.stats.batches.fetch_add(1, Ordering::Relaxed);
            self.stats
                .dropped
                .store(self.device.dropped_results(), Ordering::Relaxed);
            debug!("{}: batch {} returned {} hit(s)", self.name, self.next_batch - 1, hits.len());

            for hit in hits {
                let m = match self.resolve(&seed, &hit) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("{}: discarded hit: {:#}", self.name, e);
                        continue;
                    }
                };
                if !control.try_accept() {
                    break;
                }
                sender.send(m);
            }
        }
        debug!("Device session {} on {} stopped", self.id, self.name);
    }

    /// 由种子和命中位置还原私钥，并在主机上重新派生地址核对
    fn resolve(&self, seed: &SecretKey, hit: &DeviceHit) -> anyhow::Result<Match> {
        let key = offset_key(seed, hit.candidate_index(self.inverse_size))?;
        let candidate =
            CandidateAddress::from_public_key(&PublicKey::from_secret_key(SECP256K1, &key));
        if candidate.raw() != &hit.address {
            anyhow::bail!(
                "address mismatch at lane {} offset {}: device {}, host {}",
                hit.lane,
                hit.offset,
                hex::encode(hit.address),
                hex::encode(candidate.raw())
            );
        }
        let (raw_address, address) = candidate.into_parts();
        Ok(Match {
            private_key: key.secret_bytes(),
            address,
            raw_address,
            score: hit.score,
            pattern: hit.pattern as usize,
            device: self.device_index,
        })
    }

    fn report(&self) -> DeviceReport {
        DeviceReport {
            session: self.id,
            device_index: self.device_index,
            name: self.name.clone(),
            candidates: self.stats.candidates.load(Ordering::Relaxed),
            batches: self.stats.batches.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::SeqCst),
        }
    }
}

/// 单个设备的运行统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub session: usize,
    pub device_index: usize,
    pub name: String,
    pub candidates: u64,
    pub batches: u64,
    /// 结果缓冲区溢出且无法拆分时丢弃的命中数
    pub dropped: u64,
    pub failed: bool,
}

/// 一次运行的汇总
#[derive(Debug, Clone)]
pub struct SearchSummary {
    pub accepted: u64,
    pub candidates: u64,
    pub elapsed: Duration,
    pub devices: Vec<DeviceReport>,
    pub state: EngineState,
}

impl SearchSummary {
    /// 平均速度 (候选/秒)
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.candidates as f64 / secs
        } else {
            0.0
        }
    }
}

/// 搜索引擎
pub struct SearchEngine {
    patterns: PatternSet,
    criteria: MatchCriteria,
    control: Arc<SearchControl>,
    sessions: Vec<DeviceSession>,
    excluded: usize,
    seed_base: Option<SecretKey>,
    poll_interval: Duration,
}

impl SearchEngine {
    pub fn new(
        patterns: PatternSet,
        criteria: MatchCriteria,
        policy: TerminationPolicy,
    ) -> Result<Self> {
        if patterns.is_empty() {
            return Err(SearchError::EmptyPatternSet(String::from("engine input")));
        }
        Ok(Self {
            patterns,
            criteria,
            control: Arc::new(SearchControl::new(policy)),
            sessions: Vec::new(),
            excluded: 0,
            seed_base: None,
            poll_interval: Duration::from_millis(1000),
        })
    }

    /// 固定种子起点 (默认每次运行随机抽取)
    pub fn with_seed_base(mut self, base: SecretKey) -> Self {
        self.seed_base = Some(base);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn control(&self) -> Arc<SearchControl> {
        self.control.clone()
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 注册设备并上传模式，准备失败的设备被排除，返回会话编号
    pub fn add_device(
        &mut self,
        device_index: usize,
        mut device: Box<dyn ComputeDevice>,
    ) -> Option<usize> {
        self.control.set_state(EngineState::Building);
        let name = device.describe();
        if let Err(e) = device.prepare(&self.patterns, self.criteria) {
            warn!("Device {} ({}) excluded: {:#}", device_index, name, e);
            self.excluded += 1;
            return None;
        }

        let id = self.sessions.len();
        info!("Device {} ({}) registered as session {}", device_index, name, id);
        self.sessions.push(DeviceSession {
            id,
            device_index,
            name,
            work_size: device.work_size(),
            inverse_size: device.inverse_size(),
            device,
            next_batch: 0,
            stats: Arc::new(SessionStats::default()),
        });
        Some(id)
    }

    /// 运行直到停止标志被设置或所有设备失效
    pub fn run(mut self, sink: &ResultSink) -> Result<SearchSummary> {
        if self.sessions.is_empty() {
            self.control.set_state(EngineState::Failed);
            return Err(if self.excluded > 0 {
                SearchError::AllDevicesFailed
            } else {
                SearchError::NoDevices
            });
        }

        let stride = self
            .sessions
            .iter()
            .map(|s| s.device.candidates_per_dispatch())
            .max()
            .unwrap_or(1);
        let base = self.seed_base.unwrap_or_else(random_secret_key);
        let schedule = SeedSchedule::new(base, self.sessions.len(), stride);
        let stats: Vec<Arc<SessionStats>> = self.sessions.iter().map(|s| s.stats.clone()).collect();

        info!(
            "Searching with {} device(s), {} pattern(s), prefix >= {}, suffix >= {}, quit after {}",
            self.sessions.len(),
            self.patterns.len(),
            self.criteria.prefix_count,
            self.criteria.suffix_count,
            match self.control.policy().quit_count {
                0 => String::from("never"),
                n => n.to_string(),
            }
        );

        let start = Instant::now();
        self.control.enter_running();
        let control: &SearchControl = &self.control;
        let poll_interval = self.poll_interval;
        let tick = poll_interval.min(Duration::from_millis(50));

        thread::scope(|scope| {
            let schedule = &schedule;
            let handles: Vec<_> = self
                .sessions
                .iter_mut()
                .map(|session| {
                    let sender = sink.sender();
                    scope.spawn(move || session.run_loop(schedule, control, &sender))
                })
                .collect();

            let mut last_report = Instant::now();
            while !handles.iter().all(|h| h.is_finished()) {
                sleep(tick);
                if last_report.elapsed() >= poll_interval {
                    last_report = Instant::now();
                    report_progress(&stats, control, start.elapsed());
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    error!("device loop panicked");
                }
            }
        });

        let elapsed = start.elapsed();
        let devices: Vec<DeviceReport> = self.sessions.iter().map(|s| s.report()).collect();
        let candidates = devices.iter().map(|d| d.candidates).sum();
        let dropped: u64 = devices.iter().map(|d| d.dropped).sum();
        if dropped > 0 {
            warn!("{} hit(s) dropped by full result buffers", dropped);
        }

        if !self.control.is_stopped() && devices.iter().all(|d| d.failed) {
            self.control.set_state(EngineState::Failed);
            error!("所有设备均已失效");
            return Err(SearchError::AllDevicesFailed);
        }

        self.control.set_state(EngineState::Stopped);
        let summary = SearchSummary {
            accepted: self.control.accepted(),
            candidates,
            elapsed,
            devices,
            state: EngineState::Stopped,
        };
        info!(
            "Search stopped: {} match(es), {} candidates in {:.2}s",
            summary.accepted,
            summary.candidates,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}

fn report_progress(stats: &[Arc<SessionStats>], control: &SearchControl, elapsed: Duration) {
    let total: u64 = stats
        .iter()
        .map(|s| s.candidates.load(Ordering::Relaxed))
        .sum();
    let alive = stats
        .iter()
        .filter(|s| !s.failed.load(Ordering::Relaxed))
        .count();
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { total as f64 / secs } else { 0.0 };
    info!(
        "[{:.1}s] {:.3} MH/s | {} candidates | {} match(es) | {}/{} device(s)",
        secs,
        rate / 1_000_000.0,
        total,
        control.accepted(),
        alive,
        stats.len()
    );
}

/// 主机端复核一条匹配: 私钥重新派生出的地址必须与记录一致
pub fn verify_match(m: &Match) -> anyhow::Result<()> {
    let key = SecretKey::from_slice(&m.private_key).context("invalid private key in match")?;
    let candidate = CandidateAddress::from_public_key(&PublicKey::from_secret_key(SECP256K1, &key));
    if candidate.encoded() != m.address || candidate.raw() != &m.raw_address {
        anyhow::bail!("match {} does not derive from its private key", m.address);
    }
    Ok(())
}
