//! 结果投递
//!
//! 设备循环只把 [`Match`] 放进通道，真正的文件写入与 HTTP 推送在单独的投递线程中完成，
//! 投递失败只记录日志，不影响搜索。

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{info, warn};
use serde::Serialize;

use crate::config::{RAW_ADDRESS_LEN, TerminationPolicy};
use crate::pattern::Score;

/// 一个被接受的候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// 完整私钥 (大端 32 字节)
    pub private_key: [u8; 32],
    /// Base58Check 地址
    pub address: String,
    pub raw_address: [u8; RAW_ADDRESS_LEN],
    pub score: Score,
    /// 命中的模式下标
    pub pattern: usize,
    /// 设备在发现列表中的下标
    pub device: usize,
}

impl Match {
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }

    /// 输出文件中的一行: `<私钥>,<地址>`
    pub fn to_line(&self) -> String {
        format!("{},{}", self.private_key_hex(), self.address)
    }
}

/// HTTP 推送的 JSON 记录
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchRecord<'a> {
    address: &'a str,
    private_key: String,
    prefix_score: usize,
    suffix_score: usize,
    device: usize,
}

impl<'a> From<&'a Match> for MatchRecord<'a> {
    fn from(m: &'a Match) -> Self {
        Self {
            address: &m.address,
            private_key: m.private_key_hex(),
            prefix_score: m.score.prefix,
            suffix_score: m.score.suffix,
            device: m.device,
        }
    }
}

/// 一个投递目标
pub trait MatchOutput: Send {
    fn name(&self) -> String;
    fn deliver(&mut self, m: &Match) -> anyhow::Result<()>;
}

/// 追加写入文件
pub struct FileOutput {
    path: PathBuf,
}

impl FileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

impl MatchOutput for FileOutput {
    fn name(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn deliver(&mut self, m: &Match) -> anyhow::Result<()> {
        let mut file = self.open()?;
        writeln!(file, "{}", m.to_line())?;
        Ok(())
    }
}

/// POST JSON 到指定 URL
pub struct HttpOutput {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpOutput {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl MatchOutput for HttpOutput {
    fn name(&self) -> String {
        format!("post {}", self.url)
    }

    fn deliver(&mut self, m: &Match) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&MatchRecord::from(m))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

/// 设备循环持有的投递句柄
#[derive(Clone)]
pub struct MatchSender {
    sender: Sender<Match>,
}

impl MatchSender {
    /// 入队后立即返回，不等待投递
    pub fn send(&self, m: Match) {
        if self.sender.send(m).is_err() {
            warn!("result sink already closed, match dropped");
        }
    }
}

/// 投递线程在内存中保留多少条结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// 只计数
    Discard,
    /// 保留最先投递的 n 条
    First(usize),
    All,
}

impl Retention {
    /// 有 quit count 时保留全部 (最多 quit count 条)，无界运行只计数
    pub fn for_policy(policy: TerminationPolicy) -> Self {
        if policy.is_bounded() {
            Retention::First(usize::try_from(policy.quit_count).unwrap_or(usize::MAX))
        } else {
            Retention::Discard
        }
    }

    fn limit(self) -> usize {
        match self {
            Retention::Discard => 0,
            Retention::First(n) => n,
            Retention::All => usize::MAX,
        }
    }
}

/// 投递线程结束后的汇总
#[derive(Debug, Default)]
pub struct SinkReport {
    /// 投递过的结果总数
    pub delivered: u64,
    /// 按 [`Retention`] 保留下来的结果
    pub matches: Vec<Match>,
}

/// 结果汇聚点，所有设备共享一个
pub struct ResultSink {
    sender: Sender<Match>,
    handle: JoinHandle<SinkReport>,
}

impl ResultSink {
    pub fn spawn(
        outputs: Vec<Box<dyn MatchOutput>>,
        retention: Retention,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(String::from("result-sink"))
            .spawn(move || deliver_loop(receiver, outputs, retention.limit()))
            .context("failed to spawn result sink thread")?;
        Ok(Self { sender, handle })
    }

    /// 按配置组装输出: 文件和/或 HTTP
    pub fn from_config(
        output: Option<&Path>,
        post_url: Option<&str>,
        retention: Retention,
    ) -> anyhow::Result<Self> {
        let mut outputs: Vec<Box<dyn MatchOutput>> = Vec::new();
        if let Some(path) = output {
            outputs.push(Box::new(FileOutput::new(path)));
        }
        if let Some(url) = post_url {
            outputs.push(Box::new(HttpOutput::new(url)?));
        }
        Self::spawn(outputs, retention)
    }

    pub fn sender(&self) -> MatchSender {
        MatchSender {
            sender: self.sender.clone(),
        }
    }

    /// 关闭通道，等待剩余结果投递完毕
    pub fn finish(self) -> SinkReport {
        drop(self.sender);
        match self.handle.join() {
            Ok(report) => report,
            Err(_) => {
                warn!("result sink thread panicked");
                SinkReport::default()
            }
        }
    }
}

fn deliver_loop(
    receiver: Receiver<Match>,
    mut outputs: Vec<Box<dyn MatchOutput>>,
    retain: usize,
) -> SinkReport {
    let mut report = SinkReport::default();
    for m in receiver {
        report.delivered += 1;
        info!(
            "Match #{}: {} private 0x{} (prefix {}, suffix {}, device {})",
            report.delivered,
            m.address,
            m.private_key_hex(),
            m.score.prefix,
            m.score.suffix,
            m.device
        );
        for output in outputs.iter_mut() {
            if let Err(e) = output.deliver(&m) {
                warn!("delivery to {} failed: {:#}", output.name(), e);
            }
        }
        if report.matches.len() < retain {
            report.matches.push(m);
        }
    }
    report
}
